//! Where keystrokes go.

use crate::error::Result;
use std::sync::{Arc, Mutex};

/// A terminal running the monitored CLI.
pub trait Terminal {
    /// Write `text`; with `append_newline`, follow it with Enter.
    fn send_text(&mut self, text: &str, append_newline: bool) -> Result<()>;

    /// Whether the process behind the terminal is still running.
    fn is_alive(&self) -> bool;
}

/// Type `text` one character per write, as a user would, then optionally
/// press Enter as its own write.
///
/// The CLI's input widget treats a multi-character write as a paste, which
/// does not select a numbered option.
pub fn send_keystrokes(terminal: &mut dyn Terminal, text: &str, enter: bool) -> Result<()> {
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        terminal.send_text(ch.encode_utf8(&mut buf), false)?;
    }
    if enter {
        terminal.send_text("", true)?;
    }
    Ok(())
}

/// One write seen by a [`RecordingTerminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub text: String,
    pub newline: bool,
}

/// Terminal that only records writes. Clones share the record, so a test
/// can keep one handle while the session owns another.
#[derive(Debug, Clone)]
pub struct RecordingTerminal {
    sent: Arc<Mutex<Vec<Sent>>>,
    alive: Arc<Mutex<bool>>,
}

impl Default for RecordingTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTerminal {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            alive: Arc::new(Mutex::new(true)),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Everything typed so far, Enter rendered as `\n`.
    pub fn typed(&self) -> String {
        self.sent()
            .iter()
            .map(|s| {
                if s.newline {
                    format!("{}\n", s.text)
                } else {
                    s.text.clone()
                }
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }

    pub fn set_alive(&self, alive: bool) {
        if let Ok(mut flag) = self.alive.lock() {
            *flag = alive;
        }
    }
}

impl Terminal for RecordingTerminal {
    fn send_text(&mut self, text: &str, append_newline: bool) -> Result<()> {
        if !self.is_alive() {
            return Err(crate::error::Error::TerminalClosed);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(Sent {
                text: text.to_string(),
                newline: append_newline,
            });
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.lock().map(|a| *a).unwrap_or(false)
    }
}
