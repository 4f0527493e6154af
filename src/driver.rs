//! Keep-alive loop for continuous mode.
//!
//! When the CLI sits on an empty input box, a countdown is armed; when it
//! expires, `Continue.` is typed. If the CLI keeps answering those
//! keep-alives implausibly fast, the loop pauses itself, since it is most
//! likely spinning on an error.

use crate::config::Config;
use crate::patterns::IdleWindow;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Complete non-idle windows in a row before an armed countdown is dropped.
pub const IDLE_FAILURE_THRESHOLD: u32 = 2;

/// Answers quicker than this are the command's own echo, not a response.
const ECHO_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Countdown armed after an idle prompt was confirmed.
    Armed {
        end_time: Instant,
        timeout: Duration,
        /// The configured interval was raised to the settle-delay floor
        clamped: bool,
    },
    /// The CLI moved off the idle prompt; the stale countdown was dropped.
    TornDown,
    /// The countdown expired; the keep-alive command should be sent now.
    KeepAliveDue,
    FastResponse { count: u32, limit: u32 },
    SlowResponse { elapsed: Duration },
    /// Too many fast answers in a row; continuous mode must pause.
    FastLimitReached { count: u32 },
}

#[derive(Debug, Default)]
pub struct ContinuousDriver {
    /// End of the armed keep-alive countdown
    window_end: Option<Instant>,
    consecutive_idle_failures: u32,
    fast_responses: u32,
    /// When the last keep-alive went out, until its answer is timed
    awaiting_since: Option<Instant>,
}

impl ContinuousDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_end(&self) -> Option<Instant> {
        self.window_end
    }

    pub fn consecutive_idle_failures(&self) -> u32 {
        self.consecutive_idle_failures
    }

    pub fn fast_responses(&self) -> u32 {
        self.fast_responses
    }

    pub fn countdown(&self, now: Instant) -> Option<u64> {
        self.window_end
            .map(|end| end.saturating_duration_since(now).as_secs())
    }

    /// Feed one idle-scan result.
    ///
    /// `limited` is set while the usage limit holds continuous mode; the
    /// failure count is still maintained but nothing is armed.
    pub fn on_idle_window(
        &mut self,
        scan: IdleWindow,
        now: Instant,
        config: &Config,
        limited: bool,
    ) -> Option<DriverEvent> {
        match scan {
            IdleWindow::Incomplete => None,
            IdleWindow::Idle => {
                self.consecutive_idle_failures = 0;
                if limited || self.window_end.is_some() {
                    return None;
                }
                let (timeout, clamped) = config.effective_continuous_timeout();
                if clamped {
                    warn!(
                        "Keep-alive interval raised to {} minutes to stay above the settle delay",
                        timeout.as_secs() / 60
                    );
                }
                let end_time = now + timeout;
                info!(
                    "Idle prompt confirmed, keep-alive in {} minutes",
                    timeout.as_secs() / 60
                );
                self.window_end = Some(end_time);
                Some(DriverEvent::Armed {
                    end_time,
                    timeout,
                    clamped,
                })
            }
            IdleWindow::Busy => {
                self.consecutive_idle_failures += 1;
                debug!(
                    "Non-idle window ({}/{})",
                    self.consecutive_idle_failures, IDLE_FAILURE_THRESHOLD
                );
                if self.consecutive_idle_failures < IDLE_FAILURE_THRESHOLD {
                    return None;
                }
                self.consecutive_idle_failures = 0;
                self.window_end.take().map(|_| {
                    info!("CLI left the idle prompt, keep-alive countdown dropped");
                    DriverEvent::TornDown
                })
            }
        }
    }

    /// Fire the countdown if due. The window is torn down either way; a new
    /// one is only armed by the next confirmed idle prompt.
    pub fn poll(&mut self, now: Instant) -> Option<DriverEvent> {
        match self.window_end {
            Some(end) if now >= end => {
                self.window_end = None;
                Some(DriverEvent::KeepAliveDue)
            }
            _ => None,
        }
    }

    /// The keep-alive command was written to the terminal.
    pub fn record_keep_alive(&mut self, now: Instant) {
        self.awaiting_since = Some(now);
    }

    /// Time the first log change after a keep-alive.
    pub fn on_log_change(&mut self, now: Instant, config: &Config) -> Option<DriverEvent> {
        let sent = self.awaiting_since?;
        let elapsed = now.saturating_duration_since(sent);
        if elapsed < ECHO_WINDOW {
            return None;
        }
        self.awaiting_since = None;

        if !config.enable_fast_response_pause {
            return None;
        }

        if elapsed < config.fast_response_timeout() {
            self.fast_responses += 1;
            let limit = config.fast_response_limit();
            info!(
                "Keep-alive answered in {}ms ({}/{} fast responses)",
                elapsed.as_millis(),
                self.fast_responses,
                limit
            );
            if self.fast_responses >= limit {
                return Some(DriverEvent::FastLimitReached {
                    count: self.fast_responses,
                });
            }
            Some(DriverEvent::FastResponse {
                count: self.fast_responses,
                limit,
            })
        } else {
            if self.fast_responses > 0 {
                debug!("Slow keep-alive response, fast counter reset");
            }
            self.fast_responses = 0;
            Some(DriverEvent::SlowResponse { elapsed })
        }
    }

    /// Drop the countdown without touching the latency bookkeeping.
    pub fn disarm(&mut self) {
        self.window_end = None;
        self.consecutive_idle_failures = 0;
    }

    /// Manual resume after a fast-response pause.
    pub fn resume(&mut self) {
        self.fast_responses = 0;
        self.awaiting_since = None;
    }

    /// Back to a fresh driver (mode change).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
