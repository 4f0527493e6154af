//! Side log of every dialog that was answered or refused.
//!
//! One JSON object per line, append-only:
//! `{"timestamp": 1718000000000, "reason": "destructive_veto", "text": "..."}`

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Most characters of dialog text kept per entry.
const MAX_TEXT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AutoResponse,
    ManualResponse,
    DestructiveVeto,
    /// Answered although a destructive rule matched
    DestructiveIgnored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEntry {
    /// Unix milliseconds
    pub timestamp: u64,
    pub reason: SkipReason,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct SkipLog {
    path: PathBuf,
}

impl SkipLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, reason: SkipReason, text: &str) -> Result<()> {
        let entry = SkipEntry {
            timestamp: current_timestamp_ms(),
            reason,
            text: dialog_excerpt(text),
        };
        let mut line = serde_json::to_string(&entry).map_err(|e| Error::Io {
            path: self.path.clone(),
            source: e.into(),
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| Error::Io {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes()).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// All entries; malformed lines are skipped.
    pub fn entries(&self) -> Result<Vec<SkipEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

/// The newest dialog box in `text`, or its tail when there is no box.
pub fn dialog_excerpt(text: &str) -> String {
    let from_box = match text.rfind(crate::patterns::BOX_MARKER) {
        Some(i) => &text[i..],
        None => text,
    };
    let chars = from_box.chars().count();
    if chars <= MAX_TEXT_CHARS {
        return from_box.trim().to_string();
    }
    from_box
        .chars()
        .skip(chars - MAX_TEXT_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_ndjson() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skipped.ndjson");
        let log = SkipLog::new(&path);
        log.append(SkipReason::DestructiveVeto, "output\n╭──╮\n│ rm -rf / │\n╰──╯")
            .unwrap();
        log.append(SkipReason::AutoResponse, "plain").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains(r#""reason":"destructive_veto""#));

        let entries = log.entries().unwrap();
        assert_eq!(entries[0].text, "╭──╮\n│ rm -rf / │\n╰──╯");
        assert_eq!(entries[1].reason, SkipReason::AutoResponse);
        assert!(entries[1].timestamp > 0);
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let long = "x".repeat(MAX_TEXT_CHARS * 2);
        assert_eq!(dialog_excerpt(&long).len(), MAX_TEXT_CHARS);
    }
}
