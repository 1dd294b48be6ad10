//! Game-state snapshots and field-level diffing.
//!
//! Every fetch yields a fresh immutable snapshot; the tracker keeps exactly
//! one previous snapshot to diff against. Resetting the tracker is a local
//! concern, independent of resetting the remote game.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::errors::AutomationError;
use crate::resolver::RemoteObjectPath;
use crate::transport::RemoteEngine;

/// Integer fallback for the `gameState` field when the engine reports the
/// raw enum ordinal instead of a name.
pub const STATE_ENUM_NAMES: [&str; 7] = [
    "Title",
    "Spawning",
    "Playing",
    "Paused",
    "Dying",
    "RoundComplete",
    "GameOver",
];

/// One immutable snapshot of named game fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameState {
    fields: BTreeMap<String, Value>,
}

impl GameState {
    pub fn from_value(value: Value) -> Result<Self, AutomationError> {
        match value {
            Value::Object(map) => Ok(Self {
                fields: map.into_iter().collect(),
            }),
            other => Err(AutomationError::Transport(format!(
                "game state is not a JSON object: {other}"
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `gameState` field normalized to a name, resolving integer
    /// ordinals through [`STATE_ENUM_NAMES`].
    pub fn game_state_name(&self) -> Option<String> {
        match self.get("gameState")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => {
                let ordinal = usize::try_from(n.as_i64()?).ok()?;
                STATE_ENUM_NAMES.get(ordinal).map(|s| s.to_string())
            }
            _ => None,
        }
    }

    /// Case-insensitive match of `gameState` against a target name.
    /// String states match on substring, the way a "Playing" target should
    /// accept "NowPlaying" variants; ordinals match exactly.
    pub fn matches_state(&self, target: &str) -> bool {
        match self.game_state_name() {
            Some(name) => name.to_lowercase().contains(&target.to_lowercase()),
            None => false,
        }
    }

    /// Player grid position from `frogPos` as (column, lane).
    pub fn player_position(&self) -> Option<(i32, i32)> {
        let pos = self.get("frogPos")?.as_array()?;
        let col = pos.first()?.as_f64()? as i32;
        let lane = pos.get(1)?.as_f64()? as i32;
        Some((col, lane))
    }
}

/// One changed field between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Field-level delta between two consecutive snapshots. Empty is a valid
/// result: nothing changed.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StateDiff {
    changes: Vec<FieldChange>,
}

impl StateDiff {
    /// The set-symmetric field difference: a field appears iff its value
    /// differs between the snapshots, including appearing or disappearing.
    pub fn between(old: &GameState, new: &GameState) -> Self {
        let keys: BTreeSet<&String> = old.fields.keys().chain(new.fields.keys()).collect();
        let changes = keys
            .into_iter()
            .filter_map(|key| {
                let old_val = old.fields.get(key);
                let new_val = new.fields.get(key);
                if old_val == new_val {
                    None
                } else {
                    Some(FieldChange {
                        field: key.clone(),
                        old: old_val.cloned(),
                        new: new_val.cloned(),
                    })
                }
            })
            .collect();
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    pub fn change_for(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }
}

/// Fetches snapshots and tracks the previous one for diffing.
pub struct StateTracker {
    engine: Arc<dyn RemoteEngine>,
    game_mode: RemoteObjectPath,
    pawn: Option<RemoteObjectPath>,
    previous: Option<GameState>,
}

impl StateTracker {
    pub fn new(
        engine: Arc<dyn RemoteEngine>,
        game_mode: RemoteObjectPath,
        pawn: Option<RemoteObjectPath>,
    ) -> Self {
        Self {
            engine,
            game_mode,
            pawn,
            previous: None,
        }
    }

    /// Fetch a fresh snapshot. Prefers the single-call `GetGameStateJSON`;
    /// falls back to reading individual properties when the function is
    /// missing on older driver builds.
    pub fn fetch(&self) -> Result<GameState, AutomationError> {
        match self.fetch_via_json() {
            Ok(state) => Ok(state),
            Err(e) if e.is_connectivity() => Err(e),
            Err(e) => {
                debug!(error = %e, "GetGameStateJSON unavailable, reading properties");
                self.fetch_via_properties()
            }
        }
    }

    fn fetch_via_json(&self) -> Result<GameState, AutomationError> {
        let result = self
            .engine
            .call_function(self.game_mode.as_str(), "GetGameStateJSON", None)?;
        let raw = result
            .get("ReturnValue")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AutomationError::Transport("GetGameStateJSON returned no value".into())
            })?;
        let parsed: Value = serde_json::from_str(raw).map_err(|e| {
            AutomationError::Transport(format!("GetGameStateJSON is not valid JSON: {e}"))
        })?;
        GameState::from_value(parsed)
    }

    fn fetch_via_properties(&self) -> Result<GameState, AutomationError> {
        let mut fields = serde_json::Map::new();
        let gm = self.game_mode.as_str();
        for (wire, field) in [
            ("CurrentState", "gameState"),
            ("CurrentWave", "wave"),
            ("HomeSlotsFilledCount", "homeSlotsFilledCount"),
            ("RemainingTime", "timeRemaining"),
        ] {
            match self.engine.read_property(gm, wire) {
                Ok(v) => {
                    fields.insert(field.to_string(), v);
                }
                Err(e) if e.is_connectivity() => return Err(e),
                Err(_) => {}
            }
        }
        if let Some(pawn) = &self.pawn {
            if let Ok(pos) = self.engine.read_property(pawn.as_str(), "GridPosition") {
                let col = pos.get("X").cloned().unwrap_or(Value::from(0));
                let lane = pos.get("Y").cloned().unwrap_or(Value::from(0));
                fields.insert("frogPos".to_string(), Value::Array(vec![col, lane]));
            }
        }
        GameState::from_value(Value::Object(fields))
    }

    /// Fetch a snapshot and diff it against the previously stored one, then
    /// advance the stored snapshot. The first call after construction or
    /// [`clear`](Self::clear) yields an empty diff (no baseline).
    pub fn fetch_with_diff(&mut self) -> Result<(GameState, StateDiff), AutomationError> {
        let current = self.fetch()?;
        let diff = match &self.previous {
            Some(prev) => StateDiff::between(prev, &current),
            None => StateDiff::default(),
        };
        self.previous = Some(current.clone());
        Ok((current, diff))
    }

    /// Drop the local baseline. Does not touch the remote game.
    pub fn clear(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> GameState {
        GameState::from_value(value).unwrap()
    }

    #[test]
    fn diff_is_symmetric_field_difference() {
        let old = state(json!({ "score": 0, "lives": 3, "wave": 1 }));
        let new = state(json!({ "score": 10, "lives": 3, "gameState": "Playing" }));
        let diff = StateDiff::between(&old, &new);

        let score = diff.change_for("score").unwrap();
        assert_eq!(score.old, Some(json!(0)));
        assert_eq!(score.new, Some(json!(10)));

        // Disappearing and appearing fields both count.
        assert_eq!(diff.change_for("wave").unwrap().new, None);
        assert_eq!(diff.change_for("gameState").unwrap().old, None);
        // Unchanged fields do not.
        assert!(diff.change_for("lives").is_none());
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let a = state(json!({ "score": 5, "frogPos": [6, 0] }));
        let diff = StateDiff::between(&a, &a.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn diff_does_not_mutate_inputs() {
        let old = state(json!({ "score": 0 }));
        let new = state(json!({ "score": 1 }));
        let old_copy = old.clone();
        let new_copy = new.clone();
        let _ = StateDiff::between(&old, &new);
        assert_eq!(old, old_copy);
        assert_eq!(new, new_copy);
    }

    #[test]
    fn game_state_name_resolves_ordinals() {
        assert_eq!(
            state(json!({ "gameState": 2 })).game_state_name().as_deref(),
            Some("Playing")
        );
        assert_eq!(
            state(json!({ "gameState": "GameOver" }))
                .game_state_name()
                .as_deref(),
            Some("GameOver")
        );
        assert_eq!(state(json!({ "gameState": 42 })).game_state_name(), None);
        assert_eq!(state(json!({})).game_state_name(), None);
    }

    #[test]
    fn matches_state_is_case_insensitive() {
        let s = state(json!({ "gameState": "Playing" }));
        assert!(s.matches_state("playing"));
        assert!(s.matches_state("Play"));
        assert!(!s.matches_state("Title"));
        assert!(state(json!({ "gameState": 0 })).matches_state("title"));
    }

    #[test]
    fn player_position_reads_frog_pos() {
        let s = state(json!({ "frogPos": [6, 3] }));
        assert_eq!(s.player_position(), Some((6, 3)));
        assert_eq!(state(json!({})).player_position(), None);
    }

    #[test]
    fn non_object_state_is_transport_error() {
        let err = GameState::from_value(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, AutomationError::Transport(_)));
    }
}
