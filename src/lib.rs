//! dialog-pilot: answers an assistant CLI's confirmation dialogs.
//!
//! The CLI's output is teed into a log file. [`session::SessionController`]
//! tails that log, recognizes framed confirmation dialogs, and types the
//! answer back after a settle delay unless the dialog proposes a destructive
//! command. Continuous mode additionally keeps an idle CLI working by typing
//! a keep-alive.
//!
//! The core modules are synchronous and take the current `Instant` on every
//! call; [`pty`], [`inject`], [`socket`] and [`watcher`] are the tokio-side
//! plumbing used by the `dialog-pilot` binary.

pub mod buffer;
pub mod config;
pub mod control;
pub mod driver;
pub mod error;
pub mod gate;
pub mod guard;
pub mod inhibit;
pub mod inject;
pub mod mode;
pub mod patterns;
pub mod protocol;
pub mod pty;
pub mod sanitize;
pub mod session;
pub mod skiplog;
pub mod socket;
pub mod tailer;
pub mod terminal;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
pub use mode::Mode;
pub use session::SessionController;
