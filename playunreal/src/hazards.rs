//! Hazard telemetry: normalization, timestamped snapshots, and velocity
//! estimation over a bounded two-snapshot history.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::errors::AutomationError;
use crate::resolver::RemoteObjectPath;
use crate::transport::RemoteEngine;

/// Sign of a hazard's motion along the lane axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MotionDirection {
    Left,
    Right,
}

impl MotionDirection {
    pub fn sign(self) -> f64 {
        match self {
            MotionDirection::Left => -1.0,
            MotionDirection::Right => 1.0,
        }
    }

    pub fn from_moves_right(moves_right: bool) -> Self {
        if moves_right {
            MotionDirection::Right
        } else {
            MotionDirection::Left
        }
    }
}

/// One hazard as sampled from telemetry. Positions and widths are in grid
/// columns; speed (when reported) is in columns per second, unsigned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hazard {
    pub lane: i32,
    pub position: f64,
    /// Unsigned speed as reported by telemetry; `None` when the wire record
    /// carried no speed and it must be derived from consecutive samples.
    pub speed: Option<f64>,
    pub width: f64,
    pub direction: MotionDirection,
    pub rideable: bool,
}

impl Hazard {
    /// Signed velocity in columns/second, when the speed is reported.
    pub fn reported_velocity(&self) -> Option<f64> {
        self.speed.map(|s| s * self.direction.sign())
    }

    /// Parse one wire record (`row`, `x`, `speed`, `width`, `movesRight`,
    /// `rideable`). Returns `None` for records missing the required fields.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let lane = value.get("row")?.as_i64()? as i32;
        let position = value.get("x")?.as_f64()?;
        let width = value.get("width")?.as_f64()?;
        let speed = value.get("speed").and_then(Value::as_f64);
        let moves_right = value
            .get("movesRight")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let rideable = value
            .get("rideable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Some(Hazard {
            lane,
            position,
            speed,
            width,
            direction: MotionDirection::from_moves_right(moves_right),
            rideable,
        })
    }
}

/// A full hazard sample with the instant it was taken, for freshness checks.
#[derive(Debug, Clone)]
pub struct HazardSnapshot {
    hazards: Vec<Hazard>,
    taken_at: Instant,
}

impl HazardSnapshot {
    pub fn new(hazards: Vec<Hazard>) -> Self {
        Self {
            hazards,
            taken_at: Instant::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn taken(hazards: Vec<Hazard>, taken_at: Instant) -> Self {
        Self { hazards, taken_at }
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    pub fn age(&self) -> Duration {
        self.taken_at.elapsed()
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    pub fn lane(&self, lane: i32) -> impl Iterator<Item = &Hazard> {
        self.hazards.iter().filter(move |h| h.lane == lane)
    }

    pub fn lane_is_empty(&self, lane: i32) -> bool {
        self.lane(lane).next().is_none()
    }
}

/// How a hazard's velocity was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VelocityEstimate {
    /// Telemetry reported the speed directly.
    Reported(f64),
    /// Derived by linear fit over the two most recent samples.
    Derived(f64),
    /// Single sample, no reported speed. The planner must assume zero
    /// extrapolation credit: the hazard is treated as holding position.
    Unknown,
}

impl VelocityEstimate {
    /// The velocity the planner extrapolates with. Unknown collapses to
    /// zero, the worst-case-no-margin-growth policy for first-sample
    /// hazards.
    pub fn extrapolation_velocity(self) -> f64 {
        match self {
            VelocityEstimate::Reported(v) | VelocityEstimate::Derived(v) => v,
            VelocityEstimate::Unknown => 0.0,
        }
    }
}

/// Largest position jump between consecutive samples still attributable to
/// the same hazard; beyond this the record is a new arrival.
const MATCH_DISTANCE: f64 = 3.0;

/// Polls hazard telemetry and retains the current snapshot plus at most one
/// prior snapshot, enough for velocity fits and nothing more.
pub struct HazardModel {
    engine: Arc<dyn RemoteEngine>,
    game_mode: RemoteObjectPath,
    current: Option<HazardSnapshot>,
    previous: Option<HazardSnapshot>,
}

impl HazardModel {
    pub fn new(engine: Arc<dyn RemoteEngine>, game_mode: RemoteObjectPath) -> Self {
        Self {
            engine,
            game_mode,
            current: None,
            previous: None,
        }
    }

    /// Fetch a fresh hazard sample, rotating the history.
    pub fn poll(&mut self) -> Result<&HazardSnapshot, AutomationError> {
        let result =
            self.engine
                .call_function(self.game_mode.as_str(), "GetLaneHazardsJSON", None)?;
        let raw = result
            .get("ReturnValue")
            .and_then(Value::as_str)
            .unwrap_or("");
        let hazards = parse_hazard_payload(raw)?;
        debug!(count = hazards.len(), "hazard telemetry sampled");
        self.ingest(HazardSnapshot::new(hazards));
        Ok(self.current.as_ref().unwrap())
    }

    /// Push a snapshot into the bounded history. Exposed separately from
    /// [`poll`](Self::poll) so planning can be driven from recorded data.
    pub fn ingest(&mut self, snapshot: HazardSnapshot) {
        self.previous = self.current.take();
        self.current = Some(snapshot);
    }

    pub fn current(&self) -> Option<&HazardSnapshot> {
        self.current.as_ref()
    }

    /// Velocity estimate for a hazard in the current snapshot.
    ///
    /// Reported speed wins. Otherwise the hazard is matched against the
    /// prior snapshot (same lane and kind, nearest position within a small
    /// bound) and velocity is the position delta over the sample interval.
    pub fn estimate_velocity(&self, hazard: &Hazard) -> VelocityEstimate {
        if let Some(v) = hazard.reported_velocity() {
            return VelocityEstimate::Reported(v);
        }
        let (current, previous) = match (&self.current, &self.previous) {
            (Some(c), Some(p)) => (c, p),
            _ => return VelocityEstimate::Unknown,
        };
        let dt = current
            .taken_at
            .saturating_duration_since(previous.taken_at)
            .as_secs_f64();
        if dt <= f64::EPSILON {
            return VelocityEstimate::Unknown;
        }
        let matched = previous
            .lane(hazard.lane)
            .filter(|p| p.rideable == hazard.rideable && p.speed.is_none())
            .map(|p| (p, (p.position - hazard.position).abs()))
            .filter(|(_, d)| *d <= MATCH_DISTANCE)
            .min_by(|(_, a), (_, b)| a.total_cmp(b));
        match matched {
            Some((prev, _)) => {
                let v = (hazard.position - prev.position) / dt;
                trace!(lane = hazard.lane, velocity = v, "velocity derived from samples");
                VelocityEstimate::Derived(v)
            }
            None => VelocityEstimate::Unknown,
        }
    }

    /// Drop all history, for session resets.
    pub fn clear(&mut self) {
        self.current = None;
        self.previous = None;
    }
}

fn parse_hazard_payload(raw: &str) -> Result<Vec<Hazard>, AutomationError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let parsed: Value = serde_json::from_str(raw).map_err(|e| {
        AutomationError::Transport(format!("GetLaneHazardsJSON is not valid JSON: {e}"))
    })?;
    let records = parsed
        .get("hazards")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(records.iter().filter_map(Hazard::from_wire).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn hazard(lane: i32, position: f64, speed: f64, rideable: bool) -> Hazard {
        Hazard {
            lane,
            position,
            speed: Some(speed.abs()),
            width: 1.0,
            direction: MotionDirection::from_moves_right(speed >= 0.0),
            rideable,
        }
    }

    #[test]
    fn wire_record_roundtrip() {
        let h = Hazard::from_wire(&json!({
            "row": 3, "x": 2.0, "speed": 1.0, "width": 1.5,
            "movesRight": false, "rideable": true
        }))
        .unwrap();
        assert_eq!(h.lane, 3);
        assert_eq!(h.direction, MotionDirection::Left);
        assert_eq!(h.reported_velocity(), Some(-1.0));
        assert!(h.rideable);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let hazards = parse_hazard_payload(
            &json!({
                "hazards": [
                    { "row": 1, "x": 0.0, "speed": 1.0, "width": 1.0, "movesRight": true },
                    { "row": 2 },
                    "not an object"
                ]
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(hazards.len(), 1);
        assert_eq!(hazards[0].lane, 1);
    }

    #[test]
    fn empty_payload_is_empty_set() {
        assert!(parse_hazard_payload("").unwrap().is_empty());
        assert!(parse_hazard_payload("{}").unwrap().is_empty());
    }

    fn model_without_engine() -> HazardModel {
        struct NoEngine;
        impl RemoteEngine for NoEngine {
            fn call_function(
                &self,
                _: &str,
                _: &str,
                _: Option<Value>,
            ) -> Result<Value, AutomationError> {
                Err(AutomationError::Connectivity("test model is offline".into()))
            }
            fn read_property(&self, _: &str, _: &str) -> Result<Value, AutomationError> {
                Err(AutomationError::Connectivity("offline".into()))
            }
            fn write_property(&self, _: &str, _: &str, _: Value) -> Result<(), AutomationError> {
                Err(AutomationError::Connectivity("offline".into()))
            }
            fn describe_object(&self, _: &str) -> Result<Value, AutomationError> {
                Err(AutomationError::Connectivity("offline".into()))
            }
            fn info(&self) -> Result<Value, AutomationError> {
                Err(AutomationError::Connectivity("offline".into()))
            }
        }
        HazardModel::new(Arc::new(NoEngine), RemoteObjectPath::new("/Script/Test"))
    }

    fn unreported(lane: i32, position: f64) -> Hazard {
        Hazard {
            lane,
            position,
            speed: None,
            width: 1.0,
            direction: MotionDirection::Right,
            rideable: false,
        }
    }

    #[test]
    fn reported_speed_wins() {
        let model = model_without_engine();
        let h = hazard(1, 0.0, 2.0, false);
        assert_eq!(model.estimate_velocity(&h), VelocityEstimate::Reported(2.0));
    }

    #[test]
    fn velocity_derived_from_two_samples() {
        let mut model = model_without_engine();
        let t0 = Instant::now() - Duration::from_secs(1);
        model.ingest(HazardSnapshot::taken(vec![unreported(4, 1.0)], t0));
        model.ingest(HazardSnapshot::taken(
            vec![unreported(4, 2.5)],
            t0 + Duration::from_secs(1),
        ));
        let h = unreported(4, 2.5);
        match model.estimate_velocity(&h) {
            VelocityEstimate::Derived(v) => assert!((v - 1.5).abs() < 1e-9),
            other => panic!("expected Derived, got {other:?}"),
        }
    }

    #[test]
    fn first_sample_only_is_unknown() {
        let mut model = model_without_engine();
        model.ingest(HazardSnapshot::new(vec![unreported(4, 1.0)]));
        let h = unreported(4, 1.0);
        assert_eq!(model.estimate_velocity(&h), VelocityEstimate::Unknown);
        assert_eq!(model.estimate_velocity(&h).extrapolation_velocity(), 0.0);
    }

    #[test]
    fn new_arrivals_do_not_match_distant_records() {
        let mut model = model_without_engine();
        let t0 = Instant::now() - Duration::from_secs(1);
        model.ingest(HazardSnapshot::taken(vec![unreported(4, 0.0)], t0));
        model.ingest(HazardSnapshot::taken(
            vec![unreported(4, 11.0)],
            t0 + Duration::from_secs(1),
        ));
        // 11 columns in one second is a spawn at the lane edge, not motion.
        assert_eq!(
            model.estimate_velocity(&unreported(4, 11.0)),
            VelocityEstimate::Unknown
        );
    }

    #[test]
    fn history_is_bounded_to_two_snapshots() {
        let mut model = model_without_engine();
        for i in 0..5 {
            model.ingest(HazardSnapshot::new(vec![unreported(1, i as f64)]));
        }
        assert!(model.current.is_some());
        assert!(model.previous.is_some());
        model.clear();
        assert!(model.current.is_none());
        assert!(model.previous.is_none());
    }
}
