//! Multi-phase diagnostic probe.
//!
//! Runs a fixed ordered sequence of health checks and records every outcome
//! instead of aborting on the first failure, so one pass yields the full
//! picture. The single exception: an unreachable server at phase 1 is fatal,
//! since nothing later could succeed.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::errors::AutomationError;
use crate::hazards::HazardModel;
use crate::resolver::{ObjectResolver, RemoteObjectPath, ResolvedObject};
use crate::state::StateTracker;
use crate::transport::{routes_from_info, RemoteEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbePhase {
    Connectivity,
    RouteListing,
    ObjectResolution,
    FunctionCall,
    PropertyRoundTrip,
    StateFetch,
    HazardFetch,
}

impl ProbePhase {
    pub fn name(self) -> &'static str {
        match self {
            ProbePhase::Connectivity => "connectivity",
            ProbePhase::RouteListing => "route listing",
            ProbePhase::ObjectResolution => "object resolution",
            ProbePhase::FunctionCall => "function-call round trip",
            ProbePhase::PropertyRoundTrip => "property read/write round trip",
            ProbePhase::StateFetch => "state fetch",
            ProbePhase::HazardFetch => "hazard fetch",
        }
    }
}

/// Outcome of one probe phase.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticPhaseResult {
    pub phase: ProbePhase,
    pub ordinal: usize,
    pub passed: bool,
    pub detail: String,
    pub elapsed: Duration,
}

/// The finalized, ordered report. Immutable once the probe returns it.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    phases: Vec<DiagnosticPhaseResult>,
    fatal: bool,
}

impl DiagnosticReport {
    pub fn phases(&self) -> &[DiagnosticPhaseResult] {
        &self.phases
    }

    pub fn phase(&self, phase: ProbePhase) -> Option<&DiagnosticPhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn passed_count(&self) -> usize {
        self.phases.iter().filter(|p| p.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        !self.fatal && self.phases.iter().all(|p| p.passed)
    }

    /// True when the probe aborted on a fatal connectivity failure.
    pub fn fatal(&self) -> bool {
        self.fatal
    }
}

/// Exercises every component in sequence: transport, routes, resolver,
/// function calls, properties, state tracker, hazard model.
pub struct DiagnosticProbe {
    engine: Arc<dyn RemoteEngine>,
    resolver: ObjectResolver,
    game_mode_class: String,
    pawn_class: String,
}

struct ReportBuilder {
    phases: Vec<DiagnosticPhaseResult>,
}

impl ReportBuilder {
    fn record(&mut self, phase: ProbePhase, started: Instant, passed: bool, detail: String) {
        let ordinal = self.phases.len() + 1;
        if passed {
            info!(phase = phase.name(), ordinal, "probe phase passed");
        } else {
            warn!(phase = phase.name(), ordinal, detail, "probe phase failed");
        }
        self.phases.push(DiagnosticPhaseResult {
            phase,
            ordinal,
            passed,
            detail,
            elapsed: started.elapsed(),
        });
    }

    fn finalize(self, fatal: bool) -> DiagnosticReport {
        DiagnosticReport {
            phases: self.phases,
            fatal,
        }
    }
}

impl DiagnosticProbe {
    pub fn new(
        engine: Arc<dyn RemoteEngine>,
        resolver: ObjectResolver,
        game_mode_class: &str,
        pawn_class: &str,
    ) -> Self {
        Self {
            engine,
            resolver,
            game_mode_class: game_mode_class.to_string(),
            pawn_class: pawn_class.to_string(),
        }
    }

    /// Best-effort path for later phases when resolution fell through:
    /// the class default still allows introspection attempts.
    fn fallback_path(&self, resolved: &ResolvedObject, class_name: &str) -> RemoteObjectPath {
        resolved
            .path()
            .cloned()
            .unwrap_or_else(|| self.resolver.class_default_path(class_name))
    }

    #[instrument(skip(self))]
    pub fn run(&self) -> DiagnosticReport {
        let mut report = ReportBuilder { phases: Vec::new() };

        // Phase 1: connectivity. Fatal when unreachable.
        let started = Instant::now();
        let info = match self.engine.info() {
            Ok(v) => {
                report.record(ProbePhase::Connectivity, started, true, "API responds".into());
                v
            }
            Err(e) => {
                report.record(ProbePhase::Connectivity, started, false, e.to_string());
                return report.finalize(true);
            }
        };

        // Phase 2: route listing out of the info payload.
        let started = Instant::now();
        let routes = routes_from_info(&info);
        report.record(
            ProbePhase::RouteListing,
            started,
            !routes.is_empty(),
            format!("{} routes advertised", routes.len()),
        );

        // Phase 3: object resolution for the game mode and the pawn. A
        // non-live result is recorded as the stale-reference failure it
        // would become on first mutating use.
        let started = Instant::now();
        let game_mode = self
            .resolver
            .resolve(&self.game_mode_class)
            .unwrap_or(ResolvedObject::NotFound);
        let pawn = self
            .resolver
            .resolve(&self.pawn_class)
            .unwrap_or(ResolvedObject::NotFound);
        let both_live = game_mode.is_live() && pawn.is_live();
        let detail = if both_live {
            format!(
                "game mode {}, pawn {}",
                game_mode.path().unwrap(),
                pawn.path().unwrap()
            )
        } else {
            let gm_err = game_mode
                .live_path(&self.game_mode_class)
                .err()
                .map(|e| e.to_string());
            let pawn_err = pawn
                .live_path(&self.pawn_class)
                .err()
                .map(|e| e.to_string());
            [gm_err, pawn_err]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("; ")
        };
        report.record(ProbePhase::ObjectResolution, started, both_live, detail);

        let gm_path = self.fallback_path(&game_mode, &self.game_mode_class);
        let pawn_path = self.fallback_path(&pawn, &self.pawn_class);

        // Phase 4: function-call round trip.
        let started = Instant::now();
        match self
            .engine
            .call_function(gm_path.as_str(), "GetGameStateJSON", None)
        {
            Ok(result) => {
                let len = result
                    .get("ReturnValue")
                    .and_then(Value::as_str)
                    .map(str::len)
                    .unwrap_or(0);
                report.record(
                    ProbePhase::FunctionCall,
                    started,
                    len > 0,
                    format!("GetGameStateJSON returned {len} bytes"),
                );
            }
            Err(e) => report.record(ProbePhase::FunctionCall, started, false, e.to_string()),
        }

        // Phase 5: property read, then write the same value back. The write
        // half is guarded: mutating a class default must fail fast locally.
        let started = Instant::now();
        let round_trip = self.property_round_trip(&game_mode, &gm_path);
        match round_trip {
            Ok(detail) => report.record(ProbePhase::PropertyRoundTrip, started, true, detail),
            Err(e) => {
                report.record(ProbePhase::PropertyRoundTrip, started, false, e.to_string())
            }
        }

        // Phase 6: state fetch through the tracker.
        let started = Instant::now();
        let tracker = StateTracker::new(self.engine.clone(), gm_path.clone(), Some(pawn_path));
        match tracker.fetch() {
            Ok(state) => {
                let detail = match state.game_state_name() {
                    Some(name) => format!("gameState = {name}"),
                    None => "snapshot fetched (no gameState field)".to_string(),
                };
                report.record(ProbePhase::StateFetch, started, !state.is_empty(), detail);
            }
            Err(e) => report.record(ProbePhase::StateFetch, started, false, e.to_string()),
        }

        // Phase 7: hazard telemetry fetch.
        let started = Instant::now();
        let mut model = HazardModel::new(self.engine.clone(), gm_path);
        match model.poll() {
            Ok(snapshot) => {
                let count = snapshot.hazards().len();
                report.record(
                    ProbePhase::HazardFetch,
                    started,
                    true,
                    format!("{count} hazards sampled"),
                );
            }
            Err(e) => report.record(ProbePhase::HazardFetch, started, false, e.to_string()),
        }

        report.finalize(false)
    }

    fn property_round_trip(
        &self,
        game_mode: &ResolvedObject,
        gm_path: &RemoteObjectPath,
    ) -> Result<String, AutomationError> {
        let value = self.engine.read_property(gm_path.as_str(), "CurrentWave")?;
        // Writing the value just read back is idempotent on a healthy game.
        let live = game_mode.live_path(&self.game_mode_class)?;
        self.engine
            .write_property(live.as_str(), "CurrentWave", value.clone())?;
        Ok(format!("CurrentWave = {value} read and written back"))
    }
}
