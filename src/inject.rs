//! Keystroke delivery into the PTY.
//!
//! The session writes synchronously through [`PtyTerminal`]; a
//! [`KeystrokePacer`] task forwards each write to the PTY with a short gap
//! so the CLI sees separate keypresses instead of a paste.

use crate::error::{Error, Result};
use crate::terminal::Terminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Gap between two forwarded writes.
pub const KEYSTROKE_INTERVAL: Duration = Duration::from_millis(50);

/// Enter as the PTY expects it (carriage return).
const ENTER: u8 = 0x0d;

/// Session-side handle that queues keystrokes for the pacer
pub struct PtyTerminal {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Shared with the PTY reader; cleared when the child exits
    running: Arc<AtomicBool>,
}

impl Terminal for PtyTerminal {
    fn send_text(&mut self, text: &str, append_newline: bool) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::TerminalClosed);
        }
        let mut bytes = encode_input(text);
        if append_newline {
            bytes.push(ENTER);
        }
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx
            .send(bytes)
            .map_err(|_| Error::Terminal("keystroke pacer stopped".to_string()))
    }

    fn is_alive(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

/// Forwards queued writes to the PTY, one every [`KEYSTROKE_INTERVAL`]
pub struct KeystrokePacer {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pty_tx: mpsc::Sender<Vec<u8>>,
    interval: Duration,
}

impl KeystrokePacer {
    pub async fn run(mut self) {
        while let Some(chunk) = self.rx.recv().await {
            debug!("Typing {} bytes", chunk.len());
            if self.pty_tx.send(chunk).await.is_err() {
                warn!("Failed to type into PTY: channel closed");
                break;
            }
            tokio::time::sleep(self.interval).await;
        }
        debug!("Keystroke pacer exiting");
    }
}

/// Connected terminal handle and pacer writing into `pty_tx`.
pub fn keystroke_channel(
    pty_tx: mpsc::Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
) -> (PtyTerminal, KeystrokePacer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PtyTerminal { tx, running },
        KeystrokePacer {
            rx,
            pty_tx,
            interval: KEYSTROKE_INTERVAL,
        },
    )
}

/// Bytes for `text` with every line break turned into Enter.
pub fn encode_input(text: &str) -> Vec<u8> {
    text.replace("\r\n", "\r").replace('\n', "\r").into_bytes()
}
