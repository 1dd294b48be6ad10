//! Element location and the auto-wait engine.
//!
//! Waiting for a condition and retrying on transport failure are different
//! things. A predicate that is still false keeps polling until the deadline;
//! a connectivity failure burns one unit of a small fixed budget and aborts
//! the wait once the budget is spent. Conflating the two turns an
//! unreachable server into a silent hang.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::errors::AutomationError;
use crate::resolver::RemoteObjectPath;
use crate::transport::RemoteEngine;

/// Consecutive connectivity failures tolerated inside one wait before
/// failing fast.
pub const CONNECTIVITY_FAILURE_BUDGET: u32 = 3;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// How to select a remote UI element. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// By automation id assigned on the remote side.
    ById(String),
    /// By full object path.
    ByPath(String),
}

impl Locator {
    pub fn by_id(id: impl Into<String>) -> Self {
        Locator::ById(id.into())
    }

    pub fn by_path(path: impl Into<String>) -> Self {
        Locator::ByPath(path.into())
    }

    pub fn key(&self) -> &str {
        match self {
            Locator::ById(k) | Locator::ByPath(k) => k,
        }
    }
}

/// Capability surface for widget interaction, implemented remotely by the
/// automation driver actor. The core never inspects widget internals.
pub trait WidgetSurface {
    fn exists(&self, id: &str) -> Result<bool, AutomationError>;
    fn is_visible(&self, id: &str) -> Result<bool, AutomationError>;
    fn click(&self, id: &str) -> Result<bool, AutomationError>;
}

/// [`WidgetSurface`] backed by the in-game driver actor's `ElementExists`,
/// `IsVisible` and `ClickById` functions.
pub struct DriverSurface {
    engine: Arc<dyn RemoteEngine>,
    driver: RemoteObjectPath,
}

impl DriverSurface {
    pub fn new(engine: Arc<dyn RemoteEngine>, driver: RemoteObjectPath) -> Self {
        Self { engine, driver }
    }

    fn bool_call(&self, function: &str, id: &str) -> Result<bool, AutomationError> {
        let result = self.engine.call_function(
            self.driver.as_str(),
            function,
            Some(serde_json::json!({ "Id": id })),
        )?;
        Ok(result
            .get("ReturnValue")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

impl WidgetSurface for DriverSurface {
    fn exists(&self, id: &str) -> Result<bool, AutomationError> {
        self.bool_call("ElementExists", id)
    }

    fn is_visible(&self, id: &str) -> Result<bool, AutomationError> {
        self.bool_call("IsVisible", id)
    }

    fn click(&self, id: &str) -> Result<bool, AutomationError> {
        self.bool_call("ClickById", id)
    }
}

/// Cooperative cancellation flag, checked between poll iterations. Cloning
/// yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// One predicate evaluation: either the condition holds (carrying the
/// witness), or it does not yet (carrying what was observed instead).
pub enum PollOutcome<T> {
    Satisfied(T),
    NotYet(Value),
}

/// Knobs for one wait. Defaults: 10 s deadline, 200 ms fixed poll interval.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub cancel: Option<CancellationToken>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: None,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Poll `probe` until it reports satisfied, the deadline passes, or the
/// connectivity budget is spent.
///
/// The probe is evaluated at least once, even with a zero timeout. A
/// deadline failure carries the last observed value. Connectivity failures
/// are counted consecutively; any successful probe resets the count. All
/// other errors propagate immediately.
pub fn wait_for<T, F>(mut probe: F, options: &WaitOptions) -> Result<T, AutomationError>
where
    F: FnMut() -> Result<PollOutcome<T>, AutomationError>,
{
    let started = Instant::now();
    let mut consecutive_connectivity: u32 = 0;
    let mut last_observed: Option<Value> = None;
    let mut polls: u32 = 0;

    loop {
        if let Some(token) = &options.cancel {
            if token.is_cancelled() {
                return Err(AutomationError::Cancelled(format!(
                    "wait cancelled after {polls} polls"
                )));
            }
        }

        polls += 1;
        match probe() {
            Ok(PollOutcome::Satisfied(value)) => {
                trace!(polls, "predicate satisfied");
                return Ok(value);
            }
            Ok(PollOutcome::NotYet(observed)) => {
                consecutive_connectivity = 0;
                last_observed = Some(observed);
            }
            Err(e) if e.is_connectivity() => {
                consecutive_connectivity += 1;
                warn!(
                    consecutive = consecutive_connectivity,
                    budget = CONNECTIVITY_FAILURE_BUDGET,
                    "connectivity failure during wait"
                );
                if consecutive_connectivity >= CONNECTIVITY_FAILURE_BUDGET {
                    return Err(AutomationError::Connectivity(format!(
                        "gave up after {consecutive_connectivity} consecutive failures: {e}"
                    )));
                }
            }
            Err(e) => return Err(e),
        }

        if started.elapsed() >= options.timeout {
            debug!(?options.timeout, polls, "wait deadline passed");
            return Err(AutomationError::Timeout {
                message: format!(
                    "predicate not satisfied within {:?} ({polls} polls)",
                    options.timeout
                ),
                last_observed,
            });
        }
        std::thread::sleep(options.poll_interval);
    }
}

/// Wait until a widget selected by `locator` exists (and, if requested, is
/// visible) on the remote surface.
pub fn wait_for_element(
    surface: &dyn WidgetSurface,
    locator: &Locator,
    require_visible: bool,
    options: &WaitOptions,
) -> Result<(), AutomationError> {
    let id = match locator {
        Locator::ById(id) => id.clone(),
        Locator::ByPath(path) => {
            // Paths are not mediated by the widget surface; existence of the
            // object itself is what counts.
            return Err(AutomationError::InvalidArgument(format!(
                "wait_for_element expects an id locator, got path {path:?}"
            )));
        }
    };
    wait_for(
        || {
            let present = if require_visible {
                surface.is_visible(&id)?
            } else {
                surface.exists(&id)?
            };
            if present {
                Ok(PollOutcome::Satisfied(()))
            } else {
                Ok(PollOutcome::NotYet(Value::Bool(false)))
            }
        },
        options,
    )
}
