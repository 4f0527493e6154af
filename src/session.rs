//! The session: one owner for every piece of mutable state.
//!
//! The host feeds it three kinds of input: log-change notifications, a
//! periodic `tick`, and user commands. Each handler takes the current
//! `Instant`, runs to completion and never blocks, so the whole state machine
//! can be driven on a virtual clock.
//!
//! Periodic work inside `tick`:
//! - pending change notifications and the settle deadline (every tick)
//! - backup log poll, usage-limit check and idle scan (every 3 s)
//! - terminal liveness (every 10 s)
//! - sleep-prevention inactivity (every 60 s)

use crate::buffer::OutputBuffer;
use crate::config::Config;
use crate::driver::{ContinuousDriver, DriverEvent};
use crate::error::{Error, Result};
use crate::gate::{GateOutcome, GatePhase, ResponseGate};
use crate::guard::DestructiveGuard;
use crate::inhibit::{NoopInhibitor, SleepInhibitor};
use crate::mode::{Mode, ModeController, ModeTransition, PauseReason};
use crate::patterns::{self, IdleWindow, ResponseCode};
use crate::sanitize;
use crate::skiplog::{SkipLog, SkipReason};
use crate::tailer::{LogSource, LogTailer, TailEvent};
use crate::terminal::{send_keystrokes, Terminal};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Typed into an idle CLI to keep it working.
pub const KEEP_ALIVE_COMMAND: &str = "Continue.";

const UNIFIED_CHECK_INTERVAL: Duration = Duration::from_secs(3);
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const SLEEP_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Undrained notices kept; older ones are dropped first.
const MAX_NOTICES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// A message meant for the user rather than the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Point-in-time view of the session for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub pause: PauseReason,
    pub gate: GatePhase,
    /// Seconds until a seen dialog is answered
    pub response_countdown_secs: Option<u64>,
    /// Seconds until the next keep-alive
    pub keep_alive_countdown_secs: Option<u64>,
    pub consecutive_idle_failures: u32,
    pub fast_responses: u32,
    pub buffer_chars: usize,
    pub terminal_alive: bool,
    pub sleep_prevention: bool,
    pub secs_since_last_response: Option<u64>,
}

impl SessionSnapshot {
    /// One-line status, as a status bar would show it.
    pub fn label(&self) -> String {
        if let Some(secs) = self.response_countdown_secs {
            return format!("Wait to Proceed ({})", secs);
        }
        match (self.mode, self.pause) {
            (Mode::Off, _) => "Auto: OFF".to_string(),
            (Mode::Auto, _) => "Auto: ON".to_string(),
            (Mode::Continuous, PauseReason::Fast) => "Continuous: PAUSED (fast responses)".to_string(),
            (Mode::Continuous, PauseReason::Limit) => "Continuous: usage limit".to_string(),
            (Mode::Continuous, PauseReason::None) => match self.keep_alive_countdown_secs {
                Some(secs) => format!("Continuous: {}m {:02}s", secs / 60, secs % 60),
                None => "Continuous: ON".to_string(),
            },
        }
    }
}

pub struct SessionController<S: LogSource> {
    config: Config,
    guard: DestructiveGuard,
    tailer: LogTailer<S>,
    gate: ResponseGate,
    driver: ContinuousDriver,
    modes: ModeController,
    terminal: Option<Box<dyn Terminal>>,
    inhibitor: Box<dyn SleepInhibitor>,
    skip_log: Option<SkipLog>,
    /// Output accumulated since the last reset
    buffer: OutputBuffer,
    /// Output received after a destructive veto
    since_veto: OutputBuffer,
    notices: Vec<Notice>,
    last_unified_check: Option<Instant>,
    last_liveness_check: Option<Instant>,
    last_sleep_check: Option<Instant>,
    last_activity: Option<Instant>,
    last_response: Option<Instant>,
}

impl<S: LogSource> SessionController<S> {
    pub fn new(config: Config, source: S, modes: ModeController) -> Self {
        let mut tailer = LogTailer::new(source);
        tailer.set_verbose(config.debug_mode);
        Self {
            guard: DestructiveGuard::new(&config.custom_blacklist),
            config,
            tailer,
            gate: ResponseGate::new(),
            driver: ContinuousDriver::new(),
            modes,
            terminal: None,
            inhibitor: Box::new(NoopInhibitor::new()),
            skip_log: None,
            buffer: OutputBuffer::new(),
            since_veto: OutputBuffer::new(),
            notices: Vec::new(),
            last_unified_check: None,
            last_liveness_check: None,
            last_sleep_check: None,
            last_activity: None,
            last_response: None,
        }
    }

    pub fn with_terminal(mut self, terminal: Box<dyn Terminal>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    pub fn with_inhibitor(mut self, inhibitor: Box<dyn SleepInhibitor>) -> Self {
        self.inhibitor = inhibitor;
        self
    }

    pub fn with_skip_log(mut self, skip_log: SkipLog) -> Self {
        self.skip_log = Some(skip_log);
        self
    }

    /// Pick up the restored mode. Call once before the first event.
    pub fn start(&mut self, now: Instant) {
        self.config.warn_on_clamps();
        if self.modes.is_active() {
            info!("Starting in {} mode", self.modes.mode());
            self.activate(now);
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Swap in a re-read config. Timers already armed keep their deadlines.
    pub fn set_config(&mut self, config: Config) {
        self.guard.update(&config.custom_blacklist);
        self.tailer.set_verbose(config.debug_mode);
        config.warn_on_clamps();
        self.config = config;
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn pause(&self) -> PauseReason {
        self.modes.pause()
    }

    pub fn buffer(&self) -> &str {
        self.buffer.as_str()
    }

    pub fn gate_phase(&self) -> GatePhase {
        self.gate.phase()
    }

    pub fn keep_alive_deadline(&self) -> Option<Instant> {
        self.driver.window_end()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // --- Inputs ---------------------------------------------------------

    /// The watcher saw the log change.
    pub fn on_log_change(&mut self, now: Instant) {
        if !self.modes.is_active() {
            return;
        }
        if let Some(event) = self.tailer.notify(now) {
            self.ingest(event, now);
        }
    }

    /// Fire whatever is due.
    pub fn tick(&mut self, now: Instant) {
        if !self.modes.is_active() {
            return;
        }

        if let Some(event) = self.tailer.pump(now) {
            self.ingest(event, now);
        }

        self.poll_gate(now);

        if self.modes.is_driving() && self.driver.poll(now) == Some(DriverEvent::KeepAliveDue) {
            self.send_keep_alive(now);
        }

        if due(&mut self.last_unified_check, now, UNIFIED_CHECK_INTERVAL) {
            self.unified_check(now);
        }
        if due(&mut self.last_liveness_check, now, LIVENESS_CHECK_INTERVAL) {
            self.check_liveness();
        }
        if due(&mut self.last_sleep_check, now, SLEEP_CHECK_INTERVAL) {
            self.check_sleep(now);
        }
    }

    pub fn toggle(&mut self, now: Instant) -> ModeTransition {
        let transition = self.modes.toggle(&self.config);
        self.apply_transition(transition, now);
        self.push_notice(NoticeLevel::Info, format!("Mode: {}", transition.to));
        transition
    }

    pub fn set_mode(&mut self, mode: Mode, now: Instant) -> ModeTransition {
        let transition = self.modes.set_mode(mode);
        self.apply_transition(transition, now);
        if !transition.is_noop() {
            self.push_notice(NoticeLevel::Info, format!("Mode: {}", transition.to));
        }
        transition
    }

    /// Lift a fast-response pause. Returns `false` if nothing was paused.
    pub fn resume(&mut self, now: Instant) -> bool {
        match self.modes.resume() {
            Some(transition) => {
                self.apply_transition(transition, now);
                self.push_notice(NoticeLevel::Info, "Continuous mode resumed".to_string());
                true
            }
            None => false,
        }
    }

    /// Classify user-supplied dialog text and answer it.
    ///
    /// Unrecognized text is answered with "1". Returns the code sent.
    pub fn trigger_manual(&mut self, text: &str, now: Instant) -> Option<ResponseCode> {
        if !self.modes.is_active() || !self.terminal_alive() {
            self.push_notice(
                NoticeLevel::Warning,
                "Auto mode is disabled or no terminal found".to_string(),
            );
            return None;
        }

        let text = sanitize::clean(text);
        if !self.config.ignore_destructive_commands_detection {
            if let Some(rule) = self.guard.first_match(&text) {
                self.push_notice(
                    NoticeLevel::Warning,
                    format!("Destructive command detected ({})! Auto-response cancelled.", rule),
                );
                self.log_skip(SkipReason::DestructiveVeto, &text);
                return None;
            }
        }

        let code = patterns::detect_phrase(&text, self.config.enable_dont_ask_again)
            .unwrap_or_else(|| {
                debug!("No dialog pattern in manual text, defaulting to \"1\"");
                ResponseCode::Yes
            });
        match self.send_code(code, now) {
            Ok(()) => {
                self.log_skip(SkipReason::ManualResponse, &text);
                self.clear_state();
                Some(code)
            }
            Err(e) => {
                warn!("Failed to send manual response: {}", e);
                self.clear_state();
                None
            }
        }
    }

    /// Send a code the user picked, bypassing detection.
    pub fn send_response(&mut self, code: ResponseCode, now: Instant) -> Result<()> {
        let result = self.send_code(code, now);
        if result.is_ok() {
            let text = self.buffer.as_str().to_string();
            self.log_skip(SkipReason::ManualResponse, &text);
            self.push_notice(NoticeLevel::Info, format!("Response sent: {}", code.as_str()));
        }
        self.clear_state();
        result
    }

    pub fn replace_terminal(&mut self, terminal: Box<dyn Terminal>) {
        self.clear_state();
        self.terminal = Some(terminal);
    }

    pub fn terminal_closed(&mut self) {
        if self.terminal.take().is_some() {
            self.push_notice(NoticeLevel::Warning, "Terminal closed".to_string());
        }
        self.clear_state();
    }

    /// Drop the buffer and every pending timer.
    pub fn clear_state(&mut self) {
        self.buffer.clear();
        self.since_veto.clear();
        self.gate.cancel();
        self.driver.disarm();
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.modes.mode(),
            pause: self.modes.pause(),
            gate: self.gate.phase(),
            response_countdown_secs: self.gate.countdown(now),
            keep_alive_countdown_secs: self.driver.countdown(now),
            consecutive_idle_failures: self.driver.consecutive_idle_failures(),
            fast_responses: self.driver.fast_responses(),
            buffer_chars: self.buffer.char_len(),
            terminal_alive: self.terminal_alive(),
            sleep_prevention: self.inhibitor.is_active(),
            secs_since_last_response: self
                .last_response
                .map(|t| now.saturating_duration_since(t).as_secs()),
        }
    }

    // --- Internals ------------------------------------------------------

    fn ingest(&mut self, event: TailEvent, now: Instant) {
        self.mark_activity(now);

        if self.modes.is_driving() {
            if let Some(driver_event) = self.driver.on_log_change(now, &self.config) {
                self.handle_driver_event(driver_event, now);
            }
        }

        self.buffer.push(&event.delta);

        if self.gate.is_held() {
            self.since_veto.push(&event.delta);
            if !patterns::is_actionable_dialog(self.since_veto.as_str(), self.config.enable_dont_ask_again) {
                return;
            }
            info!("New dialog after a vetoed one, re-evaluating");
            let fresh = std::mem::take(&mut self.since_veto);
            self.buffer = fresh;
            self.gate.cancel();
        }

        self.gate.observe(self.buffer.as_str(), now, &self.config);
    }

    fn poll_gate(&mut self, now: Instant) {
        let outcome = self
            .gate
            .poll(now, self.buffer.as_str(), &self.config, &self.guard);
        match outcome {
            None => {}
            Some(GateOutcome::Cancelled) => self.clear_state(),
            Some(GateOutcome::Vetoed { code, rule }) => {
                self.push_notice(
                    NoticeLevel::Warning,
                    format!(
                        "Destructive command detected ({})! Auto-response \"{}\" cancelled. Please review the proposal manually.",
                        rule,
                        code.as_str()
                    ),
                );
                let text = self.buffer.as_str().to_string();
                self.log_skip(SkipReason::DestructiveVeto, &text);
                self.since_veto.clear();
            }
            Some(GateOutcome::Respond { code, overridden }) => {
                match self.send_code(code, now) {
                    Ok(()) => {
                        info!("Auto-responded with \"{}\"", code.as_str());
                        let reason = if overridden.is_some() {
                            SkipReason::DestructiveIgnored
                        } else {
                            SkipReason::AutoResponse
                        };
                        let text = self.buffer.as_str().to_string();
                        self.log_skip(reason, &text);
                    }
                    Err(e) => warn!("Failed to send auto-response: {}", e),
                }
                self.clear_state();
            }
        }
    }

    fn unified_check(&mut self, now: Instant) {
        if self.config.enable_terminal_buffer_refresh {
            if let Some(event) = self.tailer.poll(now) {
                debug!("Backup poll picked up a change");
                self.ingest(event, now);
            }
        }

        let limit_present = patterns::has_usage_limit_marker(self.tailer.window());
        if let Some(transition) = self
            .modes
            .observe_usage_limit(limit_present, self.config.enable_usage_limit_auto_switch)
        {
            self.apply_transition(transition, now);
            if transition.pause_to == PauseReason::Limit {
                self.push_notice(
                    NoticeLevel::Warning,
                    "Usage limit reached, switched to continuous mode".to_string(),
                );
            } else {
                self.push_notice(
                    NoticeLevel::Info,
                    format!("Usage limit cleared, back to {} mode", transition.to),
                );
            }
        }

        if !self.modes.is_driving() {
            return;
        }
        let Some(scan) = self.tailer.idle_scan(now) else {
            return;
        };
        if scan == IdleWindow::Busy {
            self.mark_activity(now);
        }
        let limited = self.modes.is_limited();
        if let Some(event) = self.driver.on_idle_window(scan, now, &self.config, limited) {
            self.handle_driver_event(event, now);
        }
    }

    fn handle_driver_event(&mut self, event: DriverEvent, now: Instant) {
        match event {
            DriverEvent::Armed { clamped: true, timeout, .. } => {
                self.push_notice(
                    NoticeLevel::Warning,
                    format!(
                        "Continuous timeout raised to {} minutes to stay above the response delay",
                        timeout.as_secs() / 60
                    ),
                );
            }
            DriverEvent::FastLimitReached { count } => {
                if let Some(transition) = self.modes.pause_fast() {
                    self.apply_transition(transition, now);
                    self.push_notice(
                        NoticeLevel::Warning,
                        format!(
                            "Continuous mode paused after {} fast responses in a row. Resume manually.",
                            count
                        ),
                    );
                }
            }
            DriverEvent::KeepAliveDue => self.send_keep_alive(now),
            DriverEvent::Armed { .. }
            | DriverEvent::TornDown
            | DriverEvent::FastResponse { .. }
            | DriverEvent::SlowResponse { .. } => {}
        }
    }

    fn apply_transition(&mut self, transition: ModeTransition, now: Instant) {
        if transition.is_noop() {
            return;
        }
        if transition.deactivated() {
            self.clear_state();
            self.driver.reset();
            self.tailer.reset();
            self.inhibitor.stop();
            return;
        }
        if transition.activated() {
            self.activate(now);
        }
        if transition.from != transition.to {
            self.driver.reset();
        }
        match (transition.pause_from, transition.pause_to) {
            (from, PauseReason::Fast) if from != PauseReason::Fast => {
                self.driver.disarm();
                self.inhibitor.stop();
            }
            (PauseReason::Fast, to) if to != PauseReason::Fast => {
                self.driver.resume();
                self.mark_activity(now);
            }
            _ => {}
        }
    }

    fn activate(&mut self, now: Instant) {
        self.clear_state();
        self.tailer.reset();
        // Baseline read: only output produced from here on is answered.
        let _ = self.tailer.poll(now);
        self.last_unified_check = Some(now);
        self.last_liveness_check = Some(now);
        self.last_sleep_check = Some(now);
        self.mark_activity(now);
    }

    fn mark_activity(&mut self, now: Instant) {
        self.last_activity = Some(now);
        if self.modes.is_active()
            && self.modes.pause() != PauseReason::Fast
            && !self.inhibitor.is_active()
        {
            self.inhibitor.start();
        }
    }

    fn check_liveness(&mut self) {
        let dead = matches!(&self.terminal, Some(terminal) if !terminal.is_alive());
        if dead {
            info!("Terminal is no longer alive");
            self.terminal_closed();
        }
    }

    fn check_sleep(&mut self, now: Instant) {
        if !self.inhibitor.is_active() {
            return;
        }
        let idle = self
            .last_activity
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        if idle >= self.config.sleep_prevention_idle() {
            info!(
                "No terminal activity for {} minutes, releasing sleep prevention",
                idle.as_secs() / 60
            );
            self.inhibitor.stop();
        }
    }

    fn send_code(&mut self, code: ResponseCode, now: Instant) -> Result<()> {
        let newline = self.config.append_newline_to_response;
        let terminal = self.live_terminal()?;
        send_keystrokes(terminal, code.as_str(), newline)?;
        self.last_response = Some(now);
        Ok(())
    }

    fn send_keep_alive(&mut self, now: Instant) {
        let result = self
            .live_terminal()
            .and_then(|terminal| send_keystrokes(terminal, KEEP_ALIVE_COMMAND, true));
        match result {
            Ok(()) => {
                info!("Sent keep-alive \"{}\"", KEEP_ALIVE_COMMAND);
                self.driver.record_keep_alive(now);
                self.last_response = Some(now);
            }
            Err(e) => {
                warn!("Failed to send keep-alive: {}", e);
                self.clear_state();
            }
        }
    }

    fn live_terminal(&mut self) -> Result<&mut dyn Terminal> {
        match self.terminal.as_deref_mut() {
            Some(terminal) if terminal.is_alive() => Ok(terminal),
            _ => Err(Error::TerminalClosed),
        }
    }

    fn terminal_alive(&self) -> bool {
        self.terminal.as_ref().is_some_and(|t| t.is_alive())
    }

    fn log_skip(&self, reason: SkipReason, text: &str) {
        if !self.config.log_skipped_questions {
            return;
        }
        if let Some(skip_log) = &self.skip_log {
            if let Err(e) = skip_log.append(reason, text) {
                debug!("Failed to write skip log: {}", e);
            }
        }
    }

    fn push_notice(&mut self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Info => info!("{}", message),
            NoticeLevel::Warning => warn!("{}", message),
        }
        if self.notices.len() >= MAX_NOTICES {
            self.notices.remove(0);
        }
        self.notices.push(Notice { level, message });
    }
}

/// True (and restarts the interval) when `interval` has passed since `last`.
fn due(last: &mut Option<Instant>, now: Instant, interval: Duration) -> bool {
    let ready = match *last {
        Some(at) => now.saturating_duration_since(at) >= interval,
        None => true,
    };
    if ready {
        *last = Some(now);
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::MemoryModeStore;
    use crate::tailer::FileLogSource;
    use crate::terminal::RecordingTerminal;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        log: PathBuf,
        session: SessionController<FileLogSource>,
        term: RecordingTerminal,
        t0: Instant,
    }

    impl Harness {
        fn new(config: Config) -> Self {
            let dir = TempDir::new().unwrap();
            let log = dir.path().join("out.log");
            let term = RecordingTerminal::new();
            let modes = ModeController::new(Box::new(MemoryModeStore::new()));
            let mut session = SessionController::new(config, FileLogSource::new(&log), modes)
                .with_terminal(Box::new(term.clone()));
            let t0 = Instant::now();
            session.start(t0);
            Self {
                _dir: dir,
                log,
                session,
                term,
                t0,
            }
        }

        fn at(&self, secs: u64) -> Instant {
            self.t0 + Duration::from_secs(secs)
        }

        fn append(&self, text: &str) {
            let mut content = std::fs::read_to_string(&self.log).unwrap_or_default();
            content.push_str(text);
            std::fs::write(&self.log, content).unwrap();
        }
    }

    const RISKY: &str = "╭──────╮\n│ Bash(rm -rf build) │\n│ Do you want to proceed? │\n╰──────╯\n";
    const SAFE: &str = "╭──────╮\n│ Do you want to create a.txt? │\n╰──────╯\n";

    #[test]
    fn test_off_mode_ignores_output() {
        let mut h = Harness::new(Config::default());
        h.append(SAFE);
        h.session.on_log_change(h.at(1));
        h.session.tick(h.at(10));
        assert!(h.term.sent().is_empty());
        assert!(h.session.buffer().is_empty());
    }

    #[test]
    fn test_output_before_activation_is_not_answered() {
        let mut h = Harness::new(Config::default());
        h.append(SAFE);
        h.session.set_mode(Mode::Auto, h.at(0));
        h.session.on_log_change(h.at(1));
        h.session.tick(h.at(10));
        assert!(h.term.sent().is_empty());
    }

    #[test]
    fn test_veto_holds_until_new_dialog() {
        let mut h = Harness::new(Config::default());
        h.session.set_mode(Mode::Auto, h.at(0));
        h.session.drain_notices();

        h.append(RISKY);
        h.session.on_log_change(h.at(1));
        h.session.tick(h.at(6));
        assert!(h.term.sent().is_empty());
        assert_eq!(h.session.gate_phase(), GatePhase::Held);
        assert!(h.session.buffer().contains("rm -rf"));
        let notices = h.session.drain_notices();
        assert!(notices
            .iter()
            .any(|n| n.level == NoticeLevel::Warning && n.message.contains("Destructive")));

        // Unrelated output keeps the hold
        h.append("thinking...\n");
        h.session.on_log_change(h.at(8));
        h.session.tick(h.at(20));
        assert!(h.term.sent().is_empty());

        h.append(SAFE);
        h.session.on_log_change(h.at(22));
        assert_eq!(h.session.gate_phase(), GatePhase::Waiting);
        assert!(!h.session.buffer().contains("rm -rf"));
        h.session.tick(h.at(27));
        assert_eq!(h.term.typed(), "1");
    }

    #[test]
    fn test_manual_trigger() {
        let mut h = Harness::new(Config::default());
        assert_eq!(h.session.trigger_manual("Do you want to?", h.at(0)), None);

        h.session.set_mode(Mode::Auto, h.at(0));
        assert_eq!(
            h.session.trigger_manual("random text", h.at(1)),
            Some(ResponseCode::Yes)
        );
        assert_eq!(
            h.session
                .trigger_manual("2. Yes, and don't ask again this session", h.at(2)),
            Some(ResponseCode::DontAskAgain)
        );
        assert_eq!(h.session.trigger_manual("DROP TABLE users;", h.at(3)), None);
        assert_eq!(h.term.typed(), "12");
    }

    #[test]
    fn test_response_newline_option() {
        let config = Config {
            append_newline_to_response: true,
            ..Config::default()
        };
        let mut h = Harness::new(config);
        h.session.set_mode(Mode::Auto, h.at(0));
        h.session.send_response(ResponseCode::DontAskAgain, h.at(1)).unwrap();
        assert_eq!(h.term.typed(), "2\n");
    }

    #[test]
    fn test_dead_terminal_detected_by_liveness_check() {
        let mut h = Harness::new(Config::default());
        h.session.set_mode(Mode::Auto, h.at(0));
        h.append(SAFE);
        h.session.on_log_change(h.at(1));
        assert_eq!(h.session.gate_phase(), GatePhase::Waiting);

        h.term.set_alive(false);
        h.session.tick(h.at(4));
        h.session.tick(h.at(10));
        let snapshot = h.session.snapshot(h.at(10));
        assert!(!snapshot.terminal_alive);
        assert_eq!(snapshot.gate, GatePhase::Idle);
        assert_eq!(snapshot.buffer_chars, 0);
    }

    #[test]
    fn test_sleep_prevention_follows_activity() {
        let config = Config {
            sleep_prevention_idle_minutes: 1,
            ..Config::default()
        };
        let mut h = Harness::new(config);
        h.session.set_mode(Mode::Auto, h.at(0));
        assert!(h.session.snapshot(h.at(0)).sleep_prevention);

        h.session.tick(h.at(60));
        assert!(!h.session.snapshot(h.at(60)).sleep_prevention);

        h.append("output\n");
        h.session.on_log_change(h.at(61));
        assert!(h.session.snapshot(h.at(61)).sleep_prevention);

        h.session.set_mode(Mode::Off, h.at(62));
        assert!(!h.session.snapshot(h.at(62)).sleep_prevention);
    }

    #[test]
    fn test_snapshot_label() {
        let mut h = Harness::new(Config::default());
        assert_eq!(h.session.snapshot(h.at(0)).label(), "Auto: OFF");
        h.session.set_mode(Mode::Auto, h.at(0));
        h.append(SAFE);
        h.session.on_log_change(h.at(1));
        assert_eq!(h.session.snapshot(h.at(2)).label(), "Wait to Proceed (4)");
    }
}
