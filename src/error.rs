//! Error types for the session core.
//!
//! Almost nothing in the core is fatal: transient I/O is swallowed by the
//! tailer and bad user patterns are skipped. These variants cover the few
//! edges where a caller can react.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The terminal went away between detection and send.
    #[error("terminal is closed")]
    TerminalClosed,

    #[error("terminal write failed: {0}")]
    Terminal(String),

    #[error("mode store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;
