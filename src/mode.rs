//! Operating mode and its persistence.
//!
//! Three modes cycle under the toggle: `Off -> Auto -> Continuous -> Off`
//! (continuous is skipped when disabled in the config). A pause reason
//! qualifies continuous mode:
//! - `Fast`: too many keep-alives were answered suspiciously fast; the
//!   keep-alive loop stops until the user resumes it
//! - `Limit`: entered automatically from auto mode while the usage-limit
//!   banner is shown; auto mode is restored when it disappears

use crate::config::Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Off,
    Auto,
    Continuous,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Off => "off",
            Mode::Auto => "auto",
            Mode::Continuous => "continuous",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Mode::Off),
            "auto" => Ok(Mode::Auto),
            "continuous" => Ok(Mode::Continuous),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    #[default]
    None,
    Fast,
    Limit,
}

/// What survives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedMode {
    pub mode: Mode,
    #[serde(default)]
    pub pause: PauseReason,
    /// Mode to restore when the usage limit clears
    #[serde(default)]
    pub mode_before_limit: Option<Mode>,
}

pub trait ModeStore {
    fn load(&self) -> Result<Option<PersistedMode>>;
    fn save(&self, state: &PersistedMode) -> Result<()>;
}

/// Mode persisted as a small JSON file.
#[derive(Debug, Clone)]
pub struct JsonModeStore {
    path: PathBuf,
}

impl JsonModeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ModeStore for JsonModeStore {
    fn load(&self) -> Result<Option<PersistedMode>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })?;
        let state = serde_json::from_str(&content)
            .map_err(|e| Error::Store(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(state))
    }

    fn save(&self, state: &PersistedMode) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Store(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        std::fs::write(&self.path, json).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory store. Clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct MemoryModeStore {
    state: Arc<Mutex<Option<PersistedMode>>>,
}

impl MemoryModeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<PersistedMode> {
        self.state.lock().ok().and_then(|s| *s)
    }
}

impl ModeStore for MemoryModeStore {
    fn load(&self) -> Result<Option<PersistedMode>> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::Store("mode store lock poisoned".to_string()))?;
        Ok(*state)
    }

    fn save(&self, state: &PersistedMode) -> Result<()> {
        let mut cell = self
            .state
            .lock()
            .map_err(|_| Error::Store("mode store lock poisoned".to_string()))?;
        *cell = Some(*state);
        Ok(())
    }
}

/// A mode change, for the session to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: Mode,
    pub to: Mode,
    pub pause_from: PauseReason,
    pub pause_to: PauseReason,
}

impl ModeTransition {
    pub fn activated(&self) -> bool {
        self.from == Mode::Off && self.to != Mode::Off
    }

    pub fn deactivated(&self) -> bool {
        self.from != Mode::Off && self.to == Mode::Off
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.pause_from == self.pause_to
    }
}

pub struct ModeController {
    state: PersistedMode,
    store: Box<dyn ModeStore>,
}

impl ModeController {
    /// Restore the last persisted mode. Store errors fall back to `Off`.
    pub fn new(store: Box<dyn ModeStore>) -> Self {
        let state = match store.load() {
            Ok(Some(state)) => {
                info!("Restored mode {} ({:?})", state.mode, state.pause);
                normalize(state)
            }
            Ok(None) => PersistedMode::default(),
            Err(e) => {
                warn!("Failed to load persisted mode: {}", e);
                PersistedMode::default()
            }
        };
        Self { state, store }
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn pause(&self) -> PauseReason {
        self.state.pause
    }

    pub fn is_active(&self) -> bool {
        self.state.mode != Mode::Off
    }

    /// Continuous mode whose keep-alive loop is allowed to run.
    pub fn is_driving(&self) -> bool {
        self.state.mode == Mode::Continuous && self.state.pause != PauseReason::Fast
    }

    pub fn is_limited(&self) -> bool {
        self.state.pause == PauseReason::Limit
    }

    /// Next mode in the cycle.
    pub fn toggle(&mut self, config: &Config) -> ModeTransition {
        let next = match self.state.mode {
            Mode::Off => Mode::Auto,
            Mode::Auto if config.enable_continuous_mode => Mode::Continuous,
            Mode::Auto => Mode::Off,
            Mode::Continuous => Mode::Off,
        };
        self.set_mode(next)
    }

    /// Explicit user choice. Clears any pause and forgets the pre-limit mode.
    pub fn set_mode(&mut self, mode: Mode) -> ModeTransition {
        self.apply(PersistedMode {
            mode,
            pause: PauseReason::None,
            mode_before_limit: None,
        })
    }

    /// Follow the usage-limit banner. Only auto mode is switched over, and
    /// only limit-held continuous mode is switched back.
    pub fn observe_usage_limit(&mut self, present: bool, enabled: bool) -> Option<ModeTransition> {
        let state = self.state;
        if present && enabled && state.mode == Mode::Auto {
            info!("Usage limit reached, switching to continuous mode");
            return Some(self.apply(PersistedMode {
                mode: Mode::Continuous,
                pause: PauseReason::Limit,
                mode_before_limit: Some(Mode::Auto),
            }));
        }
        if !present && state.pause == PauseReason::Limit {
            let restored = state.mode_before_limit.unwrap_or(Mode::Auto);
            info!("Usage limit cleared, restoring {} mode", restored);
            return Some(self.apply(PersistedMode {
                mode: restored,
                pause: PauseReason::None,
                mode_before_limit: None,
            }));
        }
        None
    }

    /// Stop the keep-alive loop after too many fast answers.
    pub fn pause_fast(&mut self) -> Option<ModeTransition> {
        if self.state.mode != Mode::Continuous || self.state.pause == PauseReason::Fast {
            return None;
        }
        Some(self.apply(PersistedMode {
            pause: PauseReason::Fast,
            ..self.state
        }))
    }

    /// Lift a fast-response pause. Returns `None` when not paused that way.
    pub fn resume(&mut self) -> Option<ModeTransition> {
        if self.state.pause != PauseReason::Fast {
            return None;
        }
        Some(self.apply(PersistedMode {
            pause: PauseReason::None,
            ..self.state
        }))
    }

    fn apply(&mut self, next: PersistedMode) -> ModeTransition {
        let next = normalize(next);
        let transition = ModeTransition {
            from: self.state.mode,
            to: next.mode,
            pause_from: self.state.pause,
            pause_to: next.pause,
        };
        self.state = next;
        if let Err(e) = self.store.save(&self.state) {
            warn!("Failed to persist mode: {}", e);
        }
        transition
    }
}

/// Pauses only qualify continuous mode.
fn normalize(mut state: PersistedMode) -> PersistedMode {
    if state.mode != Mode::Continuous {
        state.pause = PauseReason::None;
    }
    if state.pause != PauseReason::Limit {
        state.mode_before_limit = None;
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn controller() -> (ModeController, MemoryModeStore) {
        let store = MemoryModeStore::new();
        (ModeController::new(Box::new(store.clone())), store)
    }

    #[test]
    fn test_toggle_cycle() {
        let config = Config::default();
        let (mut modes, _) = controller();
        assert_eq!(modes.mode(), Mode::Off);
        assert_eq!(modes.toggle(&config).to, Mode::Auto);
        assert_eq!(modes.toggle(&config).to, Mode::Continuous);
        assert_eq!(modes.toggle(&config).to, Mode::Off);
    }

    #[test]
    fn test_toggle_skips_disabled_continuous() {
        let config = Config {
            enable_continuous_mode: false,
            ..Config::default()
        };
        let (mut modes, _) = controller();
        modes.toggle(&config);
        let t = modes.toggle(&config);
        assert_eq!((t.from, t.to), (Mode::Auto, Mode::Off));
        assert!(t.deactivated());
    }

    #[test]
    fn test_persists_every_change() {
        let config = Config::default();
        let (mut modes, store) = controller();
        modes.toggle(&config);
        assert_eq!(store.get().map(|s| s.mode), Some(Mode::Auto));

        let restored = ModeController::new(Box::new(store.clone()));
        assert_eq!(restored.mode(), Mode::Auto);
    }

    #[test]
    fn test_usage_limit_round_trip() {
        let (mut modes, _) = controller();
        modes.set_mode(Mode::Auto);

        let t = modes.observe_usage_limit(true, true).unwrap();
        assert_eq!((t.to, t.pause_to), (Mode::Continuous, PauseReason::Limit));
        assert!(modes.is_limited());
        assert!(modes.is_driving());
        // Still present: nothing changes
        assert_eq!(modes.observe_usage_limit(true, true), None);

        let t = modes.observe_usage_limit(false, true).unwrap();
        assert_eq!((t.to, t.pause_to), (Mode::Auto, PauseReason::None));
    }

    #[test]
    fn test_usage_limit_ignored_when_disabled_or_not_auto() {
        let (mut modes, _) = controller();
        modes.set_mode(Mode::Auto);
        assert_eq!(modes.observe_usage_limit(true, false), None);

        modes.set_mode(Mode::Continuous);
        assert_eq!(modes.observe_usage_limit(true, true), None);
        assert_eq!(modes.pause(), PauseReason::None);
        assert_eq!(modes.observe_usage_limit(false, true), None);
    }

    #[test]
    fn test_manual_choice_clears_limit() {
        let (mut modes, _) = controller();
        modes.set_mode(Mode::Auto);
        modes.observe_usage_limit(true, true);
        modes.set_mode(Mode::Continuous);
        assert_eq!(modes.pause(), PauseReason::None);
        assert_eq!(modes.observe_usage_limit(false, true), None);
        assert_eq!(modes.mode(), Mode::Continuous);
    }

    #[test]
    fn test_fast_pause_and_resume() {
        let (mut modes, _) = controller();
        assert_eq!(modes.pause_fast(), None);

        modes.set_mode(Mode::Continuous);
        let t = modes.pause_fast().unwrap();
        assert_eq!(t.pause_to, PauseReason::Fast);
        assert!(!modes.is_driving());
        assert!(modes.is_active());

        assert!(modes.resume().is_some());
        assert!(modes.is_driving());
        assert_eq!(modes.resume(), None);
    }

    #[test]
    fn test_json_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonModeStore::new(dir.path().join("state").join("mode.json"));
        assert_eq!(store.load().unwrap(), None);

        let state = PersistedMode {
            mode: Mode::Continuous,
            pause: PauseReason::Limit,
            mode_before_limit: Some(Mode::Auto),
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_json_store_corrupt_falls_back_to_off() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mode.json");
        std::fs::write(&path, "garbage").unwrap();
        let modes = ModeController::new(Box::new(JsonModeStore::new(&path)));
        assert_eq!(modes.mode(), Mode::Off);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Continuous".parse::<Mode>(), Ok(Mode::Continuous));
        assert!("sometimes".parse::<Mode>().is_err());
    }
}
