//! Predictive hazard-avoidance path planning.
//!
//! The planner consumes periodic hazard samples, extrapolates each hazard
//! linearly, and only ever commits to a hop whose arrival is outside every
//! blocking footprint (or inside a rideable one) with a margin to spare.
//! It never guesses: no safe window within the lookahead means a hold, and
//! stale telemetry is a hard precondition failure, not a warning.

use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::errors::AutomationError;
use crate::hazards::{Hazard, HazardModel, HazardSnapshot};

/// Fraction of a hazard's width kept clear on both sides to absorb
/// sampling and telemetry jitter. A tunable safety factor, not a
/// correctness requirement.
pub const SAFETY_MARGIN: f64 = 0.2;

/// How far into the future safe windows are searched before holding.
pub const LOOKAHEAD_HORIZON: Duration = Duration::from_secs(6);

/// Telemetry older than this invalidates the current plan step and forces a
/// re-poll. Stale extrapolation is the dominant source of false "safe"
/// classifications.
pub const FRESHNESS_THRESHOLD: Duration = Duration::from_millis(500);

/// Hop budget per planning session.
pub const MAX_PLAN_HOPS: usize = 64;

/// Granularity of the safe-window scan.
const TIME_STEP: f64 = 0.05;

/// How long one hop takes to land, when the game config does not say.
pub const DEFAULT_HOP_DURATION: f64 = 0.25;

/// One discrete directional move in the navigation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum HopDirection {
    Up,
    Down,
    Left,
    Right,
}

impl HopDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            HopDirection::Up => "up",
            HopDirection::Down => "down",
            HopDirection::Left => "left",
            HopDirection::Right => "right",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AutomationError> {
        match s {
            "up" => Ok(HopDirection::Up),
            "down" => Ok(HopDirection::Down),
            "left" => Ok(HopDirection::Left),
            "right" => Ok(HopDirection::Right),
            other => Err(AutomationError::InvalidArgument(format!(
                "invalid direction '{other}'; use: up, down, left, right"
            ))),
        }
    }

    /// Grid delta as (column, lane).
    pub fn delta(self) -> (i32, i32) {
        match self {
            HopDirection::Up => (0, 1),
            HopDirection::Down => (0, -1),
            HopDirection::Left => (-1, 0),
            HopDirection::Right => (1, 0),
        }
    }
}

impl std::fmt::Display for HopDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a planning session is headed. Constant for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationTarget {
    pub lane: i32,
    pub column: i32,
    /// Acceptable column slack around the target.
    pub tolerance: i32,
}

impl NavigationTarget {
    pub fn new(lane: i32, column: i32) -> Self {
        Self {
            lane,
            column,
            tolerance: 0,
        }
    }

    pub fn with_tolerance(mut self, tolerance: i32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn is_reached(&self, column: i32, lane: i32) -> bool {
        lane == self.lane && (column - self.column).abs() <= self.tolerance
    }
}

/// One planned step: either a hop that is safe to issue now, or a hold.
#[derive(Debug, Clone)]
pub enum PlanStep {
    Hop {
        direction: HopDirection,
        /// Wall-clock instant by which the hop must be issued to remain
        /// safe. Beyond it the safe window or the telemetry's freshness has
        /// run out.
        deadline: Instant,
        /// The hazard snapshot this step was computed against.
        observed: HazardSnapshot,
    },
    /// No safe hop right now; re-evaluate after this long (normally one
    /// poll interval, or sooner when a window is known to open).
    Hold { reassess_after: Duration },
}

/// Hazard position extrapolated `dt` seconds after its sample.
pub fn extrapolate(hazard: &Hazard, velocity: f64, dt: f64) -> f64 {
    hazard.position + velocity * dt
}

/// Whether a blocking hazard's footprint, extrapolated to `dt`, overlaps
/// the player cell `[column, column + 1)` with the safety margin applied.
pub fn blocking_overlaps(hazard: &Hazard, velocity: f64, column: i32, dt: f64) -> bool {
    let margin = SAFETY_MARGIN * hazard.width;
    let left = extrapolate(hazard, velocity, dt);
    let col = f64::from(column);
    left - margin < col + 1.0 && left + hazard.width + margin > col
}

/// Whether a rideable hazard's footprint, extrapolated to `dt`, covers the
/// center of the player cell with margin inside both edges.
pub fn rideable_covers(hazard: &Hazard, velocity: f64, column: i32, dt: f64) -> bool {
    let margin = SAFETY_MARGIN * hazard.width;
    let left = extrapolate(hazard, velocity, dt);
    let center = f64::from(column) + 0.5;
    center >= left + margin && center <= left + hazard.width - margin
}

/// Whether landing on `column` is safe `dt` seconds after the sample, given
/// the lane's hazards paired with their extrapolation velocities.
///
/// A lane with no hazards is unconditionally safe. On a lane with rideable
/// hazards the condition inverts: the player is only safe standing on one.
/// Blocking hazards must always be clear of the cell.
pub fn landing_is_safe(lane_hazards: &[(Hazard, f64)], column: i32, dt: f64) -> bool {
    let mut lane_has_rideable = false;
    let mut on_rideable = false;
    for (hazard, velocity) in lane_hazards {
        if hazard.rideable {
            lane_has_rideable = true;
            if rideable_covers(hazard, *velocity, column, dt) {
                on_rideable = true;
            }
        } else if blocking_overlaps(hazard, *velocity, column, dt) {
            return false;
        }
    }
    !lane_has_rideable || on_rideable
}

/// Outcome of assessing one candidate landing cell.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LandingWindow {
    /// Safe for a hop issued immediately; the window (as an offset from the
    /// sample time) closes at `until`.
    OpenNow { until: f64 },
    /// Closed now, opens at this offset from the sample time.
    OpensAt(f64),
    /// No safe window inside the lookahead horizon.
    None,
}

fn assess_landing(
    lane_hazards: &[(Hazard, f64)],
    column: i32,
    arrival: f64,
    horizon: f64,
) -> LandingWindow {
    if lane_hazards.is_empty() {
        return LandingWindow::OpenNow { until: horizon };
    }
    if landing_is_safe(lane_hazards, column, arrival) {
        let mut until = arrival;
        while until < horizon && landing_is_safe(lane_hazards, column, until + TIME_STEP) {
            until += TIME_STEP;
        }
        return LandingWindow::OpenNow { until };
    }
    let mut t = arrival + TIME_STEP;
    while t <= horizon {
        if landing_is_safe(lane_hazards, column, t) {
            return LandingWindow::OpensAt(t);
        }
        t += TIME_STEP;
    }
    LandingWindow::None
}

/// One planning session: owns the hop budget and the target, nothing else.
/// Hazard history lives in the [`HazardModel`] the caller supplies per
/// step, keeping memory bounded and sessions independent.
pub struct Planner {
    target: NavigationTarget,
    hop_duration: f64,
    hops_planned: usize,
}

impl Planner {
    pub fn new(target: NavigationTarget) -> Self {
        Self {
            target,
            hop_duration: DEFAULT_HOP_DURATION,
            hops_planned: 0,
        }
    }

    /// Use the hop duration from the live game config instead of the
    /// default.
    pub fn with_hop_duration(mut self, seconds: f64) -> Self {
        self.hop_duration = seconds;
        self
    }

    pub fn target(&self) -> NavigationTarget {
        self.target
    }

    pub fn hops_planned(&self) -> usize {
        self.hops_planned
    }

    /// Record that a planned hop was actually issued. The budget counts
    /// issued hops only: a step the caller discards because its deadline
    /// passed costs nothing.
    pub fn record_hop(&mut self) {
        self.hops_planned += 1;
    }

    /// Candidate directions in preference order: the hop that reduces lane
    /// distance first, then the lateral hop toward the target column.
    /// Forward beats lateral on ties to minimize plan length.
    fn candidates(&self, column: i32, lane: i32) -> Vec<HopDirection> {
        let mut out = Vec::with_capacity(2);
        if self.target.lane > lane {
            out.push(HopDirection::Up);
        } else if self.target.lane < lane {
            out.push(HopDirection::Down);
        }
        if self.target.column > column {
            out.push(HopDirection::Right);
        } else if self.target.column < column {
            out.push(HopDirection::Left);
        }
        out
    }

    /// Compute the next step from `(column, lane)` against the model's
    /// current snapshot.
    ///
    /// Fails with [`AutomationError::HazardDataStale`] when the snapshot is
    /// missing or older than [`FRESHNESS_THRESHOLD`]; the caller re-polls
    /// and retries. Fails with [`AutomationError::PlanningExhausted`] once
    /// the hop budget is spent.
    pub fn next_step(
        &mut self,
        position: (i32, i32),
        model: &HazardModel,
    ) -> Result<PlanStep, AutomationError> {
        let (column, lane) = position;
        if self.target.is_reached(column, lane) {
            return Err(AutomationError::InvalidArgument(format!(
                "already at target (column {column}, lane {lane})"
            )));
        }
        if self.hops_planned >= MAX_PLAN_HOPS {
            return Err(AutomationError::PlanningExhausted(format!(
                "hop budget of {MAX_PLAN_HOPS} spent before reaching lane {}, column {}",
                self.target.lane, self.target.column
            )));
        }
        let snapshot = model.current().ok_or_else(|| {
            AutomationError::HazardDataStale("no hazard telemetry sampled yet".into())
        })?;
        let age = snapshot.age();
        if age > FRESHNESS_THRESHOLD {
            return Err(AutomationError::HazardDataStale(format!(
                "sample is {age:?} old, threshold {FRESHNESS_THRESHOLD:?}"
            )));
        }

        let now_offset = age.as_secs_f64();
        let arrival = now_offset + self.hop_duration;
        let horizon = now_offset + LOOKAHEAD_HORIZON.as_secs_f64();

        let mut earliest_opening: Option<f64> = None;
        for direction in self.candidates(column, lane) {
            let (dc, dl) = direction.delta();
            let (dest_col, dest_lane) = (column + dc, lane + dl);
            let lane_hazards: Vec<(Hazard, f64)> = snapshot
                .lane(dest_lane)
                .map(|h| {
                    let v = model.estimate_velocity(h).extrapolation_velocity();
                    (h.clone(), v)
                })
                .collect();

            match assess_landing(&lane_hazards, dest_col, arrival, horizon) {
                LandingWindow::OpenNow { until } => {
                    // The hop must be issued while arrival stays inside the
                    // window and the sample stays fresh.
                    let issue_slack = (until - self.hop_duration - now_offset).max(0.0);
                    let deadline = snapshot.taken_at()
                        + age
                        + Duration::from_secs_f64(
                            issue_slack.min(FRESHNESS_THRESHOLD.as_secs_f64()),
                        );
                    debug!(%direction, dest_col, dest_lane, "hop scheduled");
                    return Ok(PlanStep::Hop {
                        direction,
                        deadline,
                        observed: snapshot.clone(),
                    });
                }
                LandingWindow::OpensAt(t) => {
                    trace!(%direction, opens_at = t, "window closed, opens later");
                    let wait = (t - self.hop_duration - now_offset).max(TIME_STEP);
                    earliest_opening = Some(match earliest_opening {
                        Some(w) if w < wait => w,
                        _ => wait,
                    });
                }
                LandingWindow::None => {
                    trace!(%direction, "no safe window within horizon");
                }
            }
        }

        let reassess_after = earliest_opening
            .map(Duration::from_secs_f64)
            .unwrap_or(crate::locator::DEFAULT_POLL_INTERVAL);
        debug!(?reassess_after, "holding");
        Ok(PlanStep::Hold { reassess_after })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazards::MotionDirection;
    use crate::resolver::RemoteObjectPath;
    use crate::transport::RemoteEngine;
    use serde_json::Value;
    use std::sync::Arc;

    fn hazard(lane: i32, position: f64, velocity: f64, width: f64, rideable: bool) -> Hazard {
        Hazard {
            lane,
            position,
            speed: Some(velocity.abs()),
            width,
            direction: MotionDirection::from_moves_right(velocity >= 0.0),
            rideable,
        }
    }

    struct OfflineEngine;
    impl RemoteEngine for OfflineEngine {
        fn call_function(
            &self,
            _: &str,
            _: &str,
            _: Option<Value>,
        ) -> Result<Value, AutomationError> {
            Err(AutomationError::Connectivity("offline".into()))
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

    fn model_with(hazards: Vec<Hazard>) -> HazardModel {
        let mut model = HazardModel::new(
            Arc::new(OfflineEngine),
            RemoteObjectPath::new("/Script/Test.Default__GameMode"),
        );
        model.ingest(HazardSnapshot::new(hazards));
        model
    }

    #[test]
    fn empty_lane_hops_immediately() {
        let model = model_with(vec![]);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        match planner.next_step((6, 0), &model).unwrap() {
            PlanStep::Hop { direction, .. } => assert_eq!(direction, HopDirection::Up),
            other => panic!("expected immediate hop, got {other:?}"),
        }
        assert_eq!(planner.hops_planned(), 0);
        planner.record_hop();
        assert_eq!(planner.hops_planned(), 1);
    }

    #[test]
    fn distant_blocking_hazard_allows_hop() {
        // Lane 3 hazard at 2.0 moving right at 1.0, width 1.0: far from
        // column 6, margin holds, hop allowed.
        let model = model_with(vec![hazard(3, 2.0, 1.0, 1.0, false)]);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        match planner.next_step((6, 2), &model).unwrap() {
            PlanStep::Hop { direction, .. } => assert_eq!(direction, HopDirection::Up),
            other => panic!("expected hop, got {other:?}"),
        }
    }

    #[test]
    fn approaching_blocking_hazard_forces_hold() {
        // Same hazard but already at 5.0: extrapolated position + width +
        // margin crosses column 6 at arrival, so the planner must hold.
        let model = model_with(vec![hazard(3, 5.0, 1.0, 1.0, false)]);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        match planner.next_step((6, 2), &model).unwrap() {
            PlanStep::Hold { reassess_after } => {
                assert!(reassess_after > Duration::ZERO);
            }
            other => panic!("expected hold, got {other:?}"),
        }
        assert_eq!(planner.hops_planned(), 0);
    }

    #[test]
    fn margin_is_a_true_lower_bound() {
        // Replay the planner's decision against the exact trajectory: for a
        // sweep of hazard start positions, whenever a hop is emitted the
        // ground-truth footprint never overlaps the landing cell at arrival.
        for tenth in 0..120 {
            let start = f64::from(tenth) / 10.0;
            let h = hazard(3, start, 1.0, 1.0, false);
            let model = model_with(vec![h.clone()]);
            let mut planner = Planner::new(NavigationTarget::new(12, 6));
            if let PlanStep::Hop { .. } = planner.next_step((6, 2), &model).unwrap() {
                let arrival = DEFAULT_HOP_DURATION;
                let truth = h.position + 1.0 * arrival;
                let overlaps = truth < 7.0 && truth + h.width > 6.0;
                assert!(
                    !overlaps,
                    "hop at start {start} overlaps: footprint [{truth}, {}]",
                    truth + h.width
                );
            }
        }
    }

    #[test]
    fn rideable_lane_requires_landing_on_platform() {
        // Platform covering column 6 at arrival: safe. Open water at the
        // landing column: hold even though nothing blocks.
        let covered = model_with(vec![hazard(3, 5.5, 0.0, 2.0, true)]);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        assert!(matches!(
            planner.next_step((6, 2), &covered).unwrap(),
            PlanStep::Hop { .. }
        ));

        let open_water = model_with(vec![hazard(3, 0.0, 0.0, 2.0, true)]);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        assert!(matches!(
            planner.next_step((6, 2), &open_water).unwrap(),
            PlanStep::Hold { .. }
        ));
    }

    #[test]
    fn rideable_near_future_footprint_counts() {
        // Platform left of the cell drifting right reaches column 6 within
        // the horizon: the plan is a hold that opens, not a dead end.
        let model = model_with(vec![hazard(3, 2.0, 1.5, 2.0, true)]);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        match planner.next_step((6, 2), &model).unwrap() {
            PlanStep::Hold { reassess_after } => {
                assert!(reassess_after < LOOKAHEAD_HORIZON);
            }
            other => panic!("expected hold-until-window, got {other:?}"),
        }
    }

    #[test]
    fn tie_break_prefers_forward_over_lateral() {
        let model = model_with(vec![]);
        let mut planner = Planner::new(NavigationTarget::new(5, 9));
        // Both Up and Right reduce distance and both are safe.
        match planner.next_step((6, 2), &model).unwrap() {
            PlanStep::Hop { direction, .. } => assert_eq!(direction, HopDirection::Up),
            other => panic!("expected hop, got {other:?}"),
        }
    }

    #[test]
    fn lateral_hop_when_lane_matches() {
        let model = model_with(vec![]);
        let mut planner = Planner::new(NavigationTarget::new(2, 9));
        match planner.next_step((6, 2), &model).unwrap() {
            PlanStep::Hop { direction, .. } => assert_eq!(direction, HopDirection::Right),
            other => panic!("expected lateral hop, got {other:?}"),
        }
    }

    #[test]
    fn stale_snapshot_is_a_hard_precondition() {
        let mut model = model_with(vec![]);
        let stale = HazardSnapshot::taken(
            vec![],
            Instant::now() - FRESHNESS_THRESHOLD - Duration::from_millis(50),
        );
        model.ingest(stale);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        let err = planner.next_step((6, 0), &model).unwrap_err();
        assert!(matches!(err, AutomationError::HazardDataStale(_)));
    }

    #[test]
    fn missing_snapshot_is_stale_too() {
        let model = HazardModel::new(
            Arc::new(OfflineEngine),
            RemoteObjectPath::new("/Script/Test.Default__GameMode"),
        );
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        assert!(matches!(
            planner.next_step((6, 0), &model).unwrap_err(),
            AutomationError::HazardDataStale(_)
        ));
    }

    #[test]
    fn hop_budget_exhaustion() {
        let model = model_with(vec![]);
        let mut planner = Planner::new(NavigationTarget::new(200, 6));
        for _ in 0..MAX_PLAN_HOPS {
            let step = planner.next_step((6, 0), &model).unwrap();
            assert!(matches!(step, PlanStep::Hop { .. }));
            planner.record_hop();
        }
        assert!(matches!(
            planner.next_step((6, 0), &model).unwrap_err(),
            AutomationError::PlanningExhausted(_)
        ));
    }

    #[test]
    fn discarded_plans_do_not_consume_the_budget() {
        // A step the caller drops (deadline already passed) is never
        // recorded, so re-planning the same marginal window over and over
        // cannot end in exhaustion without a single hop issued.
        let model = model_with(vec![]);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        for _ in 0..(MAX_PLAN_HOPS * 2) {
            let step = planner.next_step((6, 0), &model).unwrap();
            assert!(matches!(step, PlanStep::Hop { .. }));
        }
        assert_eq!(planner.hops_planned(), 0);
    }

    #[test]
    fn deadline_respects_freshness() {
        let model = model_with(vec![]);
        let mut planner = Planner::new(NavigationTarget::new(12, 6));
        let before = Instant::now();
        match planner.next_step((6, 0), &model).unwrap() {
            PlanStep::Hop { deadline, .. } => {
                assert!(deadline <= before + FRESHNESS_THRESHOLD + Duration::from_millis(50));
                assert!(deadline >= before);
            }
            other => panic!("expected hop, got {other:?}"),
        }
    }

    #[test]
    fn direction_parsing() {
        assert_eq!(HopDirection::parse("up").unwrap(), HopDirection::Up);
        assert_eq!(HopDirection::parse("right").unwrap(), HopDirection::Right);
        assert!(matches!(
            HopDirection::parse("diagonal").unwrap_err(),
            AutomationError::InvalidArgument(_)
        ));
    }

    #[test]
    fn target_tolerance() {
        let target = NavigationTarget::new(12, 6).with_tolerance(1);
        assert!(target.is_reached(6, 12));
        assert!(target.is_reached(7, 12));
        assert!(!target.is_reached(8, 12));
        assert!(!target.is_reached(6, 11));
    }
}
