//! Game automation through the Remote Control API
//!
//! This crate drives a running Unreal game over its object-call RPC surface,
//! inspired by Playwright's web automation model: locate reliably despite
//! spawn races, wait on state transitions instead of sleeping, and plan
//! provably safe moves across lanes of moving hazards from sampled
//! telemetry.

pub mod client;
pub mod errors;
pub mod hazards;
pub mod locator;
pub mod planner;
pub mod probe;
pub mod resolver;
pub mod state;
#[cfg(test)]
mod tests;
pub mod transport;

pub use client::{ClientConfig, GameConfig, NavigateOptions, NavigationReport, PlayUnreal};
pub use errors::AutomationError;
pub use hazards::{Hazard, HazardModel, HazardSnapshot, MotionDirection, VelocityEstimate};
pub use locator::{
    wait_for, wait_for_element, CancellationToken, DriverSurface, Locator, PollOutcome,
    WaitOptions, WidgetSurface, CONNECTIVITY_FAILURE_BUDGET,
};
pub use planner::{
    HopDirection, NavigationTarget, PlanStep, Planner, FRESHNESS_THRESHOLD, LOOKAHEAD_HORIZON,
    MAX_PLAN_HOPS, SAFETY_MARGIN,
};
pub use probe::{DiagnosticPhaseResult, DiagnosticProbe, DiagnosticReport, ProbePhase};
pub use resolver::{ObjectResolver, RemoteObjectPath, ResolvedObject};
pub use state::{FieldChange, GameState, StateDiff, StateTracker};
pub use transport::{HttpRemoteEngine, RemoteEngine};
