use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    /// Remote Control API is unreachable (refused, DNS, socket timeout).
    /// Never retried by the transport itself; callers own the retry budget.
    #[error("Remote Control API unreachable: {0}")]
    Connectivity(String),

    /// The server answered, but with a non-2xx status or a malformed body.
    #[error("Remote Control call failed: {0}")]
    Transport(String),

    /// A wait predicate was never satisfied within its deadline. Carries the
    /// last value observed before giving up, for diagnosability.
    #[error("Operation timed out: {message}")]
    Timeout {
        message: String,
        last_observed: Option<serde_json::Value>,
    },

    /// A behavior-mutating call was attempted against a class-default or
    /// unresolved object path.
    #[error("Object is not a live instance: {0}")]
    StaleReference(String),

    /// The planner exhausted its hop/time budget without reaching the target.
    #[error("No safe route found: {0}")]
    PlanningExhausted(String),

    /// Hazard telemetry is older than the freshness threshold. Recoverable:
    /// re-poll and plan again.
    #[error("Hazard telemetry is stale: {0}")]
    HazardDataStale(String),

    /// A caller-supplied cancellation signal fired between poll iterations.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl AutomationError {
    /// Connectivity failures are the only kind the wait engine counts
    /// against its bounded retry budget.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AutomationError::Connectivity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_includes_message_not_value() {
        let err = AutomationError::Timeout {
            message: "waited 5s for gameState == Playing".to_string(),
            last_observed: Some(serde_json::json!("Title")),
        };
        let text = err.to_string();
        assert!(text.contains("waited 5s"));
        assert!(text.starts_with("Operation timed out"));
    }

    #[test]
    fn connectivity_classification() {
        assert!(AutomationError::Connectivity("refused".into()).is_connectivity());
        assert!(!AutomationError::Transport("500".into()).is_connectivity());
    }
}
