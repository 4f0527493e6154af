//! Settle-delay state machine for dialog answers.
//!
//! ```text
//!   Idle ──actionable──▶ DialogSeen ──deadline──▶ Respond ──▶ Idle
//!                            │                 ├─▶ Cancelled ─▶ Idle
//!                            │                 └─▶ Vetoed ───▶ Held
//!                            └── further detections: no-op
//! ```
//!
//! The gate never looks at the buffer it saw at detection time; on deadline
//! it re-reads whatever the session has accumulated since.

use crate::config::Config;
use crate::guard::{DestructiveGuard, RuleMatch};
use crate::patterns::{self, ResponseCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    /// An actionable dialog was seen; answer at `deadline`.
    DialogSeen { seen_at: Instant, deadline: Instant },
    /// A destructive command vetoed the answer; waiting for the user.
    Held,
}

/// What to do when the settle delay expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Send the code. `overridden` is set when a destructive rule matched but
    /// detection is configured to be ignored.
    Respond {
        code: ResponseCode,
        overridden: Option<RuleMatch>,
    },
    /// Destructive command found; nothing is sent and the buffer is kept.
    Vetoed { code: ResponseCode, rule: RuleMatch },
    /// The dialog is gone from the buffer.
    Cancelled,
}

/// Status view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Idle,
    Waiting,
    Held,
}

#[derive(Debug)]
pub struct ResponseGate {
    state: GateState,
}

impl Default for ResponseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Idle,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn phase(&self) -> GatePhase {
        match self.state {
            GateState::Idle => GatePhase::Idle,
            GateState::DialogSeen { .. } => GatePhase::Waiting,
            GateState::Held => GatePhase::Held,
        }
    }

    pub fn is_held(&self) -> bool {
        self.state == GateState::Held
    }

    /// Look at the buffer after it changed. Returns `true` if this call armed
    /// the settle timer.
    pub fn observe(&mut self, buffer: &str, now: Instant, config: &Config) -> bool {
        if self.state != GateState::Idle {
            return false;
        }
        if !patterns::is_actionable_dialog(buffer, config.enable_dont_ask_again) {
            if patterns::has_dialog_box(buffer) {
                debug!("Box pattern found but no actionable dialog");
            }
            return false;
        }

        let delay = config.settle_delay();
        info!(
            "Actionable dialog detected, answering in {}s unless it changes",
            delay.as_secs()
        );
        self.state = GateState::DialogSeen {
            seen_at: now,
            deadline: now + delay,
        };
        true
    }

    /// Whole seconds left on the settle timer, rounded up.
    pub fn countdown(&self, now: Instant) -> Option<u64> {
        match self.state {
            GateState::DialogSeen { deadline, .. } => {
                let left = deadline.saturating_duration_since(now);
                Some(ceil_secs(left))
            }
            _ => None,
        }
    }

    /// Fire the settle timer if it is due.
    pub fn poll(
        &mut self,
        now: Instant,
        buffer: &str,
        config: &Config,
        guard: &DestructiveGuard,
    ) -> Option<GateOutcome> {
        let GateState::DialogSeen { seen_at, deadline } = self.state else {
            return None;
        };
        if now < deadline {
            return None;
        }
        debug!(
            "Settle delay elapsed after {}ms, re-checking buffer",
            now.saturating_duration_since(seen_at).as_millis()
        );

        let Some(code) = patterns::detect_dialog(buffer, config.enable_dont_ask_again) else {
            info!("Dialog no longer present, nothing to answer");
            self.state = GateState::Idle;
            return Some(GateOutcome::Cancelled);
        };

        match guard.first_match(buffer) {
            Some(rule) if config.ignore_destructive_commands_detection => {
                warn!(
                    "Destructive command ({}) detected, answering anyway (detection ignored)",
                    rule
                );
                self.state = GateState::Idle;
                Some(GateOutcome::Respond {
                    code,
                    overridden: Some(rule),
                })
            }
            Some(rule) => {
                warn!("Destructive command ({}) detected, auto-response cancelled", rule);
                self.state = GateState::Held;
                Some(GateOutcome::Vetoed { code, rule })
            }
            None => {
                self.state = GateState::Idle;
                Some(GateOutcome::Respond {
                    code,
                    overridden: None,
                })
            }
        }
    }

    /// Drop any pending timer or hold.
    pub fn cancel(&mut self) {
        self.state = GateState::Idle;
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
