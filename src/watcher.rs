//! Change notifications for the output log.
//!
//! Watches the log's parent directory rather than the file itself so the
//! watch survives the file being created late, truncated or rewritten by
//! rotation. Bursts of events collapse into a single wake-up; the tailer
//! applies its own throttling on top.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct LogWatcher {
    rx: mpsc::UnboundedReceiver<()>,
    /// Kept alive to continue watching
    _watcher: RecommendedWatcher,
}

impl LogWatcher {
    pub fn start(path: &Path) -> Result<Self, notify::Error> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!("Failed to create log directory {:?}: {}", dir, e);
            }
        }

        let file_name = path.file_name().map(|n| n.to_os_string());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if touches_file(&event, file_name.as_ref()) {
                    let _ = tx.send(());
                }
            }
            Err(e) => debug!("File watcher error: {}", e),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!("Watching {:?} for output changes", path);
        Ok(Self {
            rx,
            _watcher: watcher,
        })
    }

    /// Wait for the next change. Returns `None` if the watcher died.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await?;
        while self.rx.try_recv().is_ok() {}
        Some(())
    }
}

fn touches_file(event: &Event, file_name: Option<&OsString>) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n.to_os_string()).as_ref() == file_name)
}
