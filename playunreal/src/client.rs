//! The high-level automation facade.
//!
//! One `PlayUnreal` value is one automation session: it owns its resolver
//! caches, diff tracker and planner state, and shares nothing with other
//! sessions except the remote game itself.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::errors::AutomationError;
use crate::hazards::{Hazard, HazardModel};
use crate::locator::{
    wait_for, CancellationToken, DriverSurface, PollOutcome, WaitOptions,
};
use crate::planner::{HopDirection, NavigationTarget, PlanStep, Planner};
use crate::probe::{DiagnosticProbe, DiagnosticReport};
use crate::resolver::{ObjectResolver, RemoteObjectPath, ResolvedObject};
use crate::state::{GameState, StateDiff, StateTracker};
use crate::transport::{routes_from_info, HttpRemoteEngine, RemoteEngine};

const RESET_ATTEMPTS: u32 = 10;
const RESET_TITLE_TIMEOUT: Duration = Duration::from_secs(4);
const RESET_PLAYING_TIMEOUT: Duration = Duration::from_secs(15);
const RESET_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Pause after issuing a hop before the next state read, so the hop has
/// landed and `frogPos` reflects it.
const HOP_SETTLE: Duration = Duration::from_millis(50);

/// Connection and naming configuration. Immutable once the client is
/// constructed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub map_name: String,
    pub module_name: String,
    pub game_mode_class: String,
    pub pawn_class: String,
    pub driver_class: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 30010,
            timeout: Duration::from_secs(5),
            map_name: "FroggerMain".to_string(),
            module_name: "UnrealFrog".to_string(),
            game_mode_class: "UnrealFrogGameMode".to_string(),
            pawn_class: "FrogCharacter".to_string(),
            driver_class: "PlayUnrealDriver".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            ..Self::default()
        }
    }

    pub fn with_map_name(mut self, map_name: &str) -> Self {
        self.map_name = map_name.to_string();
        self
    }

    pub fn with_module_name(mut self, module_name: &str) -> Self {
        self.module_name = module_name.to_string();
        self
    }

    pub fn with_game_mode_class(mut self, class: &str) -> Self {
        self.game_mode_class = class.to_string();
        self
    }

    pub fn with_pawn_class(mut self, class: &str) -> Self {
        self.pawn_class = class.to_string();
        self
    }
}

/// Game constants as reported by `GetGameConfigJSON`. Cached per session.
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub cell_size: f64,
    pub grid_cols: i32,
    pub grid_rows: i32,
    pub hop_duration: f64,
    raw: Value,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            cell_size: 100.0,
            grid_cols: 13,
            grid_rows: 13,
            hop_duration: crate::planner::DEFAULT_HOP_DURATION,
            raw: Value::Null,
        }
    }
}

impl GameConfig {
    pub fn from_value(value: Value) -> Self {
        let defaults = Self::default();
        Self {
            cell_size: value
                .get("cellSize")
                .and_then(Value::as_f64)
                .unwrap_or(defaults.cell_size),
            grid_cols: value
                .get("gridCols")
                .and_then(Value::as_i64)
                .map(|v| v as i32)
                .unwrap_or(defaults.grid_cols),
            grid_rows: value
                .get("gridRows")
                .and_then(Value::as_i64)
                .map(|v| v as i32)
                .unwrap_or(defaults.grid_rows),
            hop_duration: value
                .get("hopDuration")
                .and_then(Value::as_f64)
                .unwrap_or(defaults.hop_duration),
            raw: value,
        }
    }

    /// The untouched config payload, for fields the client does not model.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// Knobs for one navigation run.
#[derive(Debug, Clone)]
pub struct NavigateOptions {
    pub timeout: Duration,
    pub max_deaths: u32,
    pub cancel: Option<CancellationToken>,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(90),
            max_deaths: 8,
            cancel: None,
        }
    }
}

/// What a navigation run did.
#[derive(Debug, Clone)]
pub struct NavigationReport {
    pub hops: usize,
    pub holds: usize,
    pub deaths: u32,
    pub elapsed: Duration,
    pub final_state: GameState,
}

/// Client for driving a game over the Remote Control API.
pub struct PlayUnreal {
    engine: Arc<dyn RemoteEngine>,
    config: ClientConfig,
    game_mode: Option<ResolvedObject>,
    pawn: Option<ResolvedObject>,
    tracker: Option<StateTracker>,
    game_config: Option<GameConfig>,
}

impl PlayUnreal {
    /// Connect over HTTP with the given configuration.
    pub fn connect(config: ClientConfig) -> Result<Self, AutomationError> {
        let engine = HttpRemoteEngine::new(&config.host, config.port, config.timeout)?;
        Ok(Self::with_engine(Arc::new(engine), config))
    }

    /// Build a client over any engine implementation. This is how tests
    /// plug in fakes.
    pub fn with_engine(engine: Arc<dyn RemoteEngine>, config: ClientConfig) -> Self {
        Self {
            engine,
            config,
            game_mode: None,
            pawn: None,
            tracker: None,
            game_config: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn resolver(&self) -> ObjectResolver {
        ObjectResolver::new(
            self.engine.clone(),
            &self.config.map_name,
            &self.config.module_name,
        )
    }

    /// Drop every cached resolution, tracker baseline and config. Call
    /// after a map transition when object paths may have changed.
    pub fn invalidate_resolution(&mut self) {
        self.game_mode = None;
        self.pawn = None;
        self.tracker = None;
        self.game_config = None;
    }

    fn game_mode(&mut self) -> Result<ResolvedObject, AutomationError> {
        if self.game_mode.is_none() {
            let resolved = self.resolver().resolve(&self.config.game_mode_class)?;
            if resolved == ResolvedObject::NotFound {
                // Not cached: the actor may spawn between calls.
                return Ok(resolved);
            }
            self.game_mode = Some(resolved);
        }
        Ok(self.game_mode.clone().unwrap())
    }

    fn pawn(&mut self) -> Result<ResolvedObject, AutomationError> {
        if self.pawn.is_none() {
            let resolved = self.resolver().resolve(&self.config.pawn_class)?;
            if resolved == ResolvedObject::NotFound {
                return Ok(resolved);
            }
            self.pawn = Some(resolved);
        }
        Ok(self.pawn.clone().unwrap())
    }

    fn game_mode_read_path(&mut self) -> Result<RemoteObjectPath, AutomationError> {
        let class = self.config.game_mode_class.clone();
        Ok(self.game_mode()?.introspection_path(&class)?.clone())
    }

    fn game_mode_live_path(&mut self) -> Result<RemoteObjectPath, AutomationError> {
        let class = self.config.game_mode_class.clone();
        Ok(self.game_mode()?.live_path(&class)?.clone())
    }

    fn pawn_live_path(&mut self) -> Result<RemoteObjectPath, AutomationError> {
        let class = self.config.pawn_class.clone();
        Ok(self.pawn()?.live_path(&class)?.clone())
    }

    fn tracker(&mut self) -> Result<&mut StateTracker, AutomationError> {
        if self.tracker.is_none() {
            let gm = self.game_mode_read_path()?;
            let pawn = self.pawn()?.path().cloned();
            self.tracker = Some(StateTracker::new(self.engine.clone(), gm, pawn));
        }
        Ok(self.tracker.as_mut().unwrap())
    }

    // -- Health and low-level passthrough ---------------------------------

    /// Whether the Remote Control API responds at all.
    #[instrument(skip(self))]
    pub fn is_alive(&self) -> bool {
        self.engine.info().is_ok()
    }

    /// The routes the API advertises on `GET /remote/info`.
    pub fn routes(&self) -> Result<Vec<Value>, AutomationError> {
        Ok(routes_from_info(&self.engine.info()?))
    }

    /// Invoke a remote function on an arbitrary object.
    ///
    /// Refused for class-default paths even when the target function is
    /// read-only; the guard does not inspect function names. Reads against
    /// class defaults go through [`read_property`](Self::read_property) and
    /// [`describe_object`](Self::describe_object), which stay open.
    #[instrument(skip(self, parameters))]
    pub fn call_function(
        &self,
        path: &RemoteObjectPath,
        function_name: &str,
        parameters: Option<Value>,
    ) -> Result<Value, AutomationError> {
        if path.is_class_default() {
            return Err(AutomationError::StaleReference(format!(
                "refusing to call {function_name} on class default {path}"
            )));
        }
        self.engine
            .call_function(path.as_str(), function_name, parameters)
    }

    pub fn read_property(
        &self,
        path: &RemoteObjectPath,
        property_name: &str,
    ) -> Result<Value, AutomationError> {
        self.engine.read_property(path.as_str(), property_name)
    }

    /// Write a remote property. Refused for class-default paths.
    #[instrument(skip(self, value))]
    pub fn write_property(
        &self,
        path: &RemoteObjectPath,
        property_name: &str,
        value: Value,
    ) -> Result<(), AutomationError> {
        if path.is_class_default() {
            return Err(AutomationError::StaleReference(format!(
                "refusing to write {property_name} on class default {path}"
            )));
        }
        self.engine
            .write_property(path.as_str(), property_name, value)
    }

    pub fn describe_object(&self, path: &RemoteObjectPath) -> Result<Value, AutomationError> {
        self.engine.describe_object(path.as_str())
    }

    // -- Game control ------------------------------------------------------

    /// Send one hop command to the player pawn.
    #[instrument(skip(self))]
    pub fn hop(&mut self, direction: HopDirection) -> Result<(), AutomationError> {
        let pawn = self.pawn_live_path()?;
        self.engine.call_function(
            pawn.as_str(),
            "RequestHop",
            Some(json!({ "Direction": world_vector(direction) })),
        )?;
        Ok(())
    }

    /// Toggle pawn invincibility, for soak runs where deaths are noise.
    #[instrument(skip(self))]
    pub fn set_invincible(&mut self, enabled: bool) -> Result<(), AutomationError> {
        let pawn = self.pawn_live_path()?;
        self.engine.call_function(
            pawn.as_str(),
            "SetInvincible",
            Some(json!({ "bEnable": enabled })),
        )?;
        Ok(())
    }

    /// Reset to the title screen and start a fresh game, confirming each
    /// transition instead of sleeping blindly.
    ///
    /// From GameOver the `ReturnToTitle` command is ignored until the
    /// GameOver screen auto-dismisses, which can take several seconds, so
    /// the command is retried until Title is actually observed.
    #[instrument(skip(self))]
    pub fn reset_game(&mut self) -> Result<GameState, AutomationError> {
        let gm = self.game_mode_live_path()?;
        let mut confirmed = false;
        for attempt in 1..=RESET_ATTEMPTS {
            self.engine
                .call_function(gm.as_str(), "ReturnToTitle", None)?;
            match self.wait_for_game_state("Title", RESET_TITLE_TIMEOUT) {
                Ok(_) => {
                    confirmed = true;
                    break;
                }
                Err(AutomationError::Timeout { .. }) => {
                    debug!(attempt, "Title not confirmed, retrying ReturnToTitle");
                    std::thread::sleep(RESET_RETRY_PAUSE);
                }
                Err(e) => return Err(e),
            }
        }
        if !confirmed {
            warn!("Title never confirmed; starting anyway");
        }
        self.engine.call_function(gm.as_str(), "StartGame", None)?;
        let state = self.wait_for_game_state("Playing", RESET_PLAYING_TIMEOUT)?;
        info!("game reset into Playing");
        Ok(state)
    }

    // -- State queries -----------------------------------------------------

    /// Fetch a fresh immutable state snapshot.
    pub fn get_state(&mut self) -> Result<GameState, AutomationError> {
        self.tracker()?.fetch()
    }

    /// Fetch a snapshot plus the diff against the previous one.
    pub fn get_state_diff(&mut self) -> Result<(GameState, StateDiff), AutomationError> {
        self.tracker()?.fetch_with_diff()
    }

    /// Drop the local diff baseline without touching the remote game.
    pub fn clear_diff_baseline(&mut self) {
        if let Some(tracker) = &mut self.tracker {
            tracker.clear();
        }
    }

    /// Poll until `gameState` matches `target` (case-insensitive, ordinal
    /// aware), or the deadline passes.
    #[instrument(skip(self, timeout))]
    pub fn wait_for_game_state(
        &mut self,
        target: &str,
        timeout: Duration,
    ) -> Result<GameState, AutomationError> {
        let gm = self.game_mode_read_path()?;
        let pawn = self.pawn()?.path().cloned();
        let probe_tracker = StateTracker::new(self.engine.clone(), gm, pawn);
        let options = WaitOptions::default().with_timeout(timeout);
        wait_for(
            || {
                let state = probe_tracker.fetch()?;
                if state.matches_state(target) {
                    Ok(PollOutcome::Satisfied(state))
                } else {
                    let observed = state.get("gameState").cloned().unwrap_or(Value::Null);
                    Ok(PollOutcome::NotYet(observed))
                }
            },
            &options,
        )
    }

    // -- Hazards and config ------------------------------------------------

    /// Current hazard telemetry, optionally restricted to one lane.
    pub fn get_hazards(&mut self, lane: Option<i32>) -> Result<Vec<Hazard>, AutomationError> {
        let gm = self.game_mode_read_path()?;
        let mut model = HazardModel::new(self.engine.clone(), gm);
        let snapshot = model.poll()?;
        let hazards = match lane {
            Some(lane) => snapshot.lane(lane).cloned().collect(),
            None => snapshot.hazards().to_vec(),
        };
        Ok(hazards)
    }

    /// Game configuration constants, fetched once per session.
    pub fn get_config(&mut self) -> Result<GameConfig, AutomationError> {
        if let Some(config) = &self.game_config {
            return Ok(config.clone());
        }
        let gm = self.game_mode_read_path()?;
        let result = self
            .engine
            .call_function(gm.as_str(), "GetGameConfigJSON", None)?;
        let raw = result
            .get("ReturnValue")
            .and_then(Value::as_str)
            .unwrap_or("");
        let parsed: Value = serde_json::from_str(raw).map_err(|e| {
            AutomationError::Transport(format!("GetGameConfigJSON is not valid JSON: {e}"))
        })?;
        let config = GameConfig::from_value(parsed);
        self.game_config = Some(config.clone());
        Ok(config)
    }

    // -- Widgets -----------------------------------------------------------

    /// Capability surface for UMG widget interaction, backed by the driver
    /// actor in the level.
    pub fn widget_surface(&mut self) -> Result<DriverSurface, AutomationError> {
        let class = self.config.driver_class.clone();
        let driver = self.resolver().resolve(&class)?;
        let path = driver.live_path(&class)?.clone();
        Ok(DriverSurface::new(self.engine.clone(), path))
    }

    // -- Navigation --------------------------------------------------------

    /// Drive the pawn to `target` one planned hop at a time, re-polling
    /// hazards before every decision.
    #[instrument(skip(self, options))]
    pub fn navigate(
        &mut self,
        target: NavigationTarget,
        options: &NavigateOptions,
    ) -> Result<NavigationReport, AutomationError> {
        let game_config = self.get_config().unwrap_or_default();
        let gm = self.game_mode_read_path()?;
        let mut planner = Planner::new(target).with_hop_duration(game_config.hop_duration);
        let mut model = HazardModel::new(self.engine.clone(), gm);

        let started = Instant::now();
        let mut holds = 0usize;
        let mut deaths = 0u32;
        let mut lives_baseline: Option<i64> = None;

        loop {
            if let Some(token) = &options.cancel {
                if token.is_cancelled() {
                    return Err(AutomationError::Cancelled("navigation cancelled".into()));
                }
            }
            if started.elapsed() >= options.timeout {
                return Err(AutomationError::Timeout {
                    message: format!(
                        "target lane {}, column {} not reached within {:?}",
                        target.lane, target.column, options.timeout
                    ),
                    last_observed: None,
                });
            }

            let state = self.get_state()?;

            if let Some(lives) = state.get("lives").and_then(Value::as_i64) {
                if let Some(baseline) = lives_baseline {
                    if lives < baseline {
                        deaths += (baseline - lives) as u32;
                        warn!(deaths, "pawn died during navigation");
                        if deaths > options.max_deaths {
                            return Err(AutomationError::PlanningExhausted(format!(
                                "gave up after {deaths} deaths"
                            )));
                        }
                    }
                }
                lives_baseline = Some(lives);
            }

            if state.matches_state("GameOver") {
                return Err(AutomationError::PlanningExhausted(
                    "game over before reaching the target".into(),
                ));
            }
            if !state.matches_state("Playing") {
                // Dying/respawn transition; wait it out rather than hop blind.
                self.wait_for_game_state("Playing", RESET_PLAYING_TIMEOUT)?;
                continue;
            }

            let (column, lane) = state.player_position().ok_or_else(|| {
                AutomationError::Transport("state snapshot has no frogPos".into())
            })?;
            if target.is_reached(column, lane) {
                info!(hops = planner.hops_planned(), holds, deaths, "target reached");
                return Ok(NavigationReport {
                    hops: planner.hops_planned(),
                    holds,
                    deaths,
                    elapsed: started.elapsed(),
                    final_state: state,
                });
            }

            model.poll()?;
            match planner.next_step((column, lane), &model) {
                Ok(PlanStep::Hop {
                    direction,
                    deadline,
                    ..
                }) => {
                    if Instant::now() > deadline {
                        // Window closed while we were deciding; re-plan.
                        continue;
                    }
                    self.hop(direction)?;
                    planner.record_hop();
                    std::thread::sleep(
                        Duration::from_secs_f64(game_config.hop_duration) + HOP_SETTLE,
                    );
                }
                Ok(PlanStep::Hold { reassess_after }) => {
                    holds += 1;
                    std::thread::sleep(reassess_after);
                }
                Err(AutomationError::HazardDataStale(reason)) => {
                    debug!(reason, "stale telemetry, re-polling");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // -- Diagnostics -------------------------------------------------------

    /// Run the seven-phase diagnostic probe and return the finalized report.
    #[instrument(skip(self))]
    pub fn diagnose(&self) -> DiagnosticReport {
        DiagnosticProbe::new(
            self.engine.clone(),
            self.resolver(),
            &self.config.game_mode_class,
            &self.config.pawn_class,
        )
        .run()
    }
}

/// Hop direction as the engine-side world vector parameter.
fn world_vector(direction: HopDirection) -> Value {
    match direction {
        HopDirection::Up => json!({ "X": 0.0, "Y": 1.0, "Z": 0.0 }),
        HopDirection::Down => json!({ "X": 0.0, "Y": -1.0, "Z": 0.0 }),
        HopDirection::Left => json!({ "X": -1.0, "Y": 0.0, "Z": 0.0 }),
        HopDirection::Right => json!({ "X": 1.0, "Y": 0.0, "Z": 0.0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_vectors_are_unit_axes() {
        assert_eq!(world_vector(HopDirection::Up)["Y"], json!(1.0));
        assert_eq!(world_vector(HopDirection::Down)["Y"], json!(-1.0));
        assert_eq!(world_vector(HopDirection::Left)["X"], json!(-1.0));
        assert_eq!(world_vector(HopDirection::Right)["X"], json!(1.0));
    }

    #[test]
    fn config_parses_known_fields_and_keeps_raw() {
        let config = GameConfig::from_value(json!({
            "cellSize": 80.0, "gridCols": 11, "hopDuration": 0.2,
            "capsuleRadius": 30.0
        }));
        assert_eq!(config.cell_size, 80.0);
        assert_eq!(config.grid_cols, 11);
        assert_eq!(config.grid_rows, GameConfig::default().grid_rows);
        assert_eq!(config.hop_duration, 0.2);
        assert_eq!(config.raw()["capsuleRadius"], json!(30.0));
    }

    #[test]
    fn default_config_matches_engine_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 30010);
        assert_eq!(config.map_name, "FroggerMain");
        assert_eq!(config.game_mode_class, "UnrealFrogGameMode");
    }
}
