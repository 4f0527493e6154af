//! Throttled tailing of the CLI's output log.
//!
//! The host tees everything the CLI prints into a file. This module turns
//! that ever-growing file into:
//! - a sanitized 100-line window, re-read at most every 500 ms
//! - the delta appended since the previous window
//! - a cheap idle-prompt scan over the last few KB
//!
//! The file is rotated in place whenever it grows past 100 lines. Missing
//! files and I/O errors are never surfaced; the next poll simply retries.

use crate::patterns::{self, IdleWindow};
use crate::sanitize;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lines kept in the window (and in the file after rotation).
pub const WINDOW_LINES: usize = 100;
/// Bytes read from the end of the log for idle scans.
pub const TAIL_SCAN_BYTES: usize = 5 * 1024;

const READ_THROTTLE: Duration = Duration::from_millis(500);
const NOTIFY_THROTTLE: Duration = Duration::from_millis(1000);
const SCAN_INTERVAL: Duration = Duration::from_secs(1);
const SCAN_CACHE_TTL: Duration = Duration::from_millis(500);

/// Where the CLI output lives.
pub trait LogSource {
    fn exists(&self) -> bool;

    fn read(&self) -> io::Result<String>;

    /// Replace the whole content (used for rotation).
    fn write(&self, content: &str) -> io::Result<()>;

    /// Last `max_bytes` of the content, starting at a char boundary.
    fn read_tail(&self, max_bytes: usize) -> io::Result<String> {
        let content = self.read()?;
        Ok(tail_str(&content, max_bytes).to_string())
    }
}

/// Log file on disk.
#[derive(Debug, Clone)]
pub struct FileLogSource {
    path: PathBuf,
}

impl FileLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LogSource for FileLogSource {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read(&self) -> io::Result<String> {
        let bytes = std::fs::read(&self.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn write(&self, content: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(content.as_bytes())
    }

    fn read_tail(&self, max_bytes: usize) -> io::Result<String> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        let start = len.saturating_sub(max_bytes as u64);
        file.seek(SeekFrom::Start(start))?;
        let mut bytes = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut bytes)?;
        // The seek may land inside a multi-byte char; lossy decoding turns
        // that into a replacement char at the very start, which is harmless.
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// A changed window and the text appended since the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailEvent {
    pub window: String,
    pub delta: String,
}

#[derive(Debug, Clone)]
struct ScanCache {
    /// Box lines the result was computed for
    key: String,
    result: IdleWindow,
    at: Instant,
}

/// Throttled reader over a [`LogSource`].
pub struct LogTailer<S: LogSource> {
    source: S,
    /// Last sanitized window
    window: String,
    last_read: Option<Instant>,
    last_delivered_notification: Option<Instant>,
    /// A change notification arrived and has not been served yet
    notification_pending: bool,
    last_scan: Option<Instant>,
    scan_cache: Option<ScanCache>,
    /// Per-read diagnostics at debug level
    verbose: bool,
}

impl<S: LogSource> LogTailer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            window: String::new(),
            last_read: None,
            last_delivered_notification: None,
            notification_pending: false,
            last_scan: None,
            scan_cache: None,
            verbose: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Current sanitized window.
    pub fn window(&self) -> &str {
        &self.window
    }

    /// Forget cached state so the next read is treated as fresh.
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_read = None;
        self.last_delivered_notification = None;
        self.notification_pending = false;
        self.last_scan = None;
        self.scan_cache = None;
    }

    /// Record a change notification from the watcher.
    pub fn notify(&mut self, now: Instant) -> Option<TailEvent> {
        self.notification_pending = true;
        self.pump(now)
    }

    /// Serve a pending notification once the notification throttle allows.
    pub fn pump(&mut self, now: Instant) -> Option<TailEvent> {
        if !self.notification_pending || !elapsed(self.last_delivered_notification, now, NOTIFY_THROTTLE)
        {
            return None;
        }
        if !elapsed(self.last_read, now, READ_THROTTLE) {
            return None;
        }
        self.notification_pending = false;
        self.last_delivered_notification = Some(now);
        self.read_window(now)
    }

    /// Backup poll, independent of notifications.
    pub fn poll(&mut self, now: Instant) -> Option<TailEvent> {
        if !elapsed(self.last_read, now, READ_THROTTLE) {
            return None;
        }
        self.read_window(now)
    }

    fn read_window(&mut self, now: Instant) -> Option<TailEvent> {
        self.last_read = Some(now);

        if !self.source.exists() {
            if self.verbose {
                debug!("Log file does not exist yet");
            }
            return None;
        }

        let content = match self.source.read() {
            Ok(content) => content,
            Err(e) => {
                debug!("Failed to read log: {}", e);
                return None;
            }
        };
        if content.is_empty() {
            return None;
        }

        let lines: Vec<&str> = content.split('\n').collect();
        let rotated = lines.len() > WINDOW_LINES;
        let raw_window = if rotated {
            lines[lines.len() - WINDOW_LINES..].join("\n")
        } else {
            content.clone()
        };

        if rotated {
            match self.source.write(&raw_window) {
                Ok(()) => {
                    if self.verbose {
                        debug!("Rotated log to the last {} lines", WINDOW_LINES);
                    }
                }
                Err(e) => debug!("Failed to rotate log: {}", e),
            }
        }

        let window = sanitize::clean(&raw_window);
        if window == self.window {
            return None;
        }

        let delta = appended_since(&self.window, &window);
        if self.verbose {
            debug!(
                "Log window changed: {} chars, delta {} chars",
                window.len(),
                delta.len()
            );
        }
        self.window = window.clone();
        Some(TailEvent { window, delta })
    }

    /// Classify the newest box at the end of the log.
    ///
    /// Returns `None` when called again within a second of the last scan.
    pub fn idle_scan(&mut self, now: Instant) -> Option<IdleWindow> {
        if !elapsed(self.last_scan, now, SCAN_INTERVAL) {
            return None;
        }
        self.last_scan = Some(now);

        let tail = match self.source.read_tail(TAIL_SCAN_BYTES) {
            Ok(tail) => sanitize::clean(&tail),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Failed to read log tail: {}", e);
                }
                return Some(IdleWindow::Incomplete);
            }
        };

        let lines = patterns::idle_window(&tail);
        let key = lines.join("\n");
        if let Some(cache) = &self.scan_cache {
            if cache.key == key && now.saturating_duration_since(cache.at) < SCAN_CACHE_TTL {
                return Some(cache.result);
            }
        }

        let result = patterns::classify_idle_window(&lines);
        self.scan_cache = Some(ScanCache {
            key,
            result,
            at: now,
        });
        Some(result)
    }
}

fn elapsed(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= interval,
        None => true,
    }
}

/// Last `max_bytes` of `text`, moved forward to a char boundary.
fn tail_str(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Text in `next` that follows the overlap with `prev`.
///
/// The overlap is the longest suffix of `prev`, starting at a line
/// boundary, that `next` starts with. This covers both a growing last line
/// and a window that slid forward after rotation.
pub fn appended_since(prev: &str, next: &str) -> String {
    if prev.is_empty() {
        return next.to_string();
    }
    let starts = std::iter::once(0).chain(prev.match_indices('\n').map(|(i, _)| i + 1));
    for start in starts {
        let suffix = &prev[start..];
        if suffix.is_empty() {
            continue;
        }
        if let Some(rest) = next.strip_prefix(suffix) {
            return rest.to_string();
        }
    }
    next.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// In-memory source for throttle tests.
    #[derive(Default)]
    struct MemorySource {
        content: RefCell<Option<String>>,
        reads: RefCell<usize>,
    }

    impl MemorySource {
        fn set(&self, content: &str) {
            *self.content.borrow_mut() = Some(content.to_string());
        }
    }

    impl LogSource for &MemorySource {
        fn exists(&self) -> bool {
            self.content.borrow().is_some()
        }

        fn read(&self) -> io::Result<String> {
            *self.reads.borrow_mut() += 1;
            self.content
                .borrow()
                .clone()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn write(&self, content: &str) -> io::Result<()> {
            self.set(content);
            Ok(())
        }
    }

    #[test]
    fn test_missing_source_is_no_content() {
        let source = MemorySource::default();
        let mut tailer = LogTailer::new(&source);
        assert_eq!(tailer.poll(Instant::now()), None);
        assert_eq!(tailer.window(), "");
    }

    #[test]
    fn test_change_emits_sanitized_window_and_delta() {
        let source = MemorySource::default();
        let mut tailer = LogTailer::new(&source);
        let t0 = Instant::now();

        source.set("\x1B[1mhello\x1B[0m\r\n");
        let event = tailer.poll(t0).unwrap();
        assert_eq!(event.window, "hello\n");
        assert_eq!(event.delta, "hello\n");

        source.set("\x1B[1mhello\x1B[0m\r\nworld");
        let event = tailer.poll(t0 + Duration::from_millis(600)).unwrap();
        assert_eq!(event.window, "hello\nworld");
        assert_eq!(event.delta, "world");
    }

    #[test]
    fn test_unchanged_window_emits_nothing() {
        let source = MemorySource::default();
        let mut tailer = LogTailer::new(&source);
        let t0 = Instant::now();
        source.set("same");
        assert!(tailer.poll(t0).is_some());
        assert!(tailer.poll(t0 + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_read_throttle() {
        let source = MemorySource::default();
        let mut tailer = LogTailer::new(&source);
        let t0 = Instant::now();
        source.set("a");
        tailer.poll(t0);
        source.set("ab");
        assert!(tailer.poll(t0 + Duration::from_millis(100)).is_none());
        assert_eq!(*source.reads.borrow(), 1);
        assert!(tailer.poll(t0 + Duration::from_millis(500)).is_some());
    }

    #[test]
    fn test_notification_throttle_is_trailing() {
        let source = MemorySource::default();
        let mut tailer = LogTailer::new(&source);
        let t0 = Instant::now();

        source.set("one");
        assert!(tailer.notify(t0).is_some());

        source.set("one two");
        assert!(tailer.notify(t0 + Duration::from_millis(300)).is_none());
        // Held until the throttle window passes, then served by pump
        assert!(tailer.pump(t0 + Duration::from_millis(700)).is_none());
        let event = tailer.pump(t0 + Duration::from_millis(1000)).unwrap();
        assert_eq!(event.delta, " two");
        assert!(tailer.pump(t0 + Duration::from_millis(2500)).is_none());
    }

    #[test]
    fn test_rotation_keeps_last_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".claude-output.log");
        let content: Vec<String> = (0..150).map(|i| format!("line {}", i)).collect();
        std::fs::write(&path, content.join("\n")).unwrap();

        let mut tailer = LogTailer::new(FileLogSource::new(&path));
        let event = tailer.poll(Instant::now()).unwrap();

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk.split('\n').count(), WINDOW_LINES);
        assert!(on_disk.starts_with("line 50\n"));
        assert!(on_disk.ends_with("line 149"));
        assert_eq!(event.window, on_disk);
    }

    #[test]
    fn test_short_file_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "\x1B[31mred\x1B[0m\n").unwrap();

        let mut tailer = LogTailer::new(FileLogSource::new(&path));
        tailer.poll(Instant::now()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "\x1B[31mred\x1B[0m\n");
    }

    #[test]
    fn test_idle_scan_rate_limited_and_classifies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "output\n╭────╮\n│ >  │\n╰────╯\n").unwrap();

        let mut tailer = LogTailer::new(FileLogSource::new(&path));
        let t0 = Instant::now();
        assert_eq!(tailer.idle_scan(t0), Some(IdleWindow::Idle));
        assert_eq!(tailer.idle_scan(t0 + Duration::from_millis(400)), None);

        std::fs::write(&path, "output\n╭────╮\n│ hi │\n╰────╯\n").unwrap();
        assert_eq!(
            tailer.idle_scan(t0 + Duration::from_secs(1)),
            Some(IdleWindow::Busy)
        );
    }

    #[test]
    fn test_idle_scan_missing_file_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let mut tailer = LogTailer::new(FileLogSource::new(dir.path().join("missing.log")));
        assert_eq!(tailer.idle_scan(Instant::now()), Some(IdleWindow::Incomplete));
    }

    #[test]
    fn test_file_read_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "0123456789").unwrap();
        let source = FileLogSource::new(&path);
        assert_eq!(source.read_tail(4).unwrap(), "6789");
        assert_eq!(source.read_tail(100).unwrap(), "0123456789");
    }

    #[test]
    fn test_appended_since() {
        assert_eq!(appended_since("", "abc"), "abc");
        assert_eq!(appended_since("a\nb", "a\nb\nc"), "\nc");
        assert_eq!(appended_since("a\nDo you", "a\nDo you want"), " want");
        // Window slid forward by one line
        assert_eq!(appended_since("l1\nl2\nl3\n", "l2\nl3\nl4\n"), "l4\n");
        // No overlap at all
        assert_eq!(appended_since("old", "new"), "new");
    }

    #[test]
    fn test_tail_str_char_boundary() {
        assert_eq!(tail_str("╭──╮", 4), "╮");
        assert_eq!(tail_str("abc", 10), "abc");
    }
}
