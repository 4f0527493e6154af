//! Dialog classification over sanitized text.
//!
//! Everything here is pure. The monitored CLI frames its dialogs with
//! rounded box-drawing corners; a window without `╭─` is plain output and no
//! further classification happens.
//!
//! ```text
//! ╭──────────────────────────────╮      ╭──────────╮
//! │ Do you want to make this     │      │ >        │   <- idle prompt
//! │ edit to foo.txt?             │      ╰──────────╯
//! │ ❯ 1. Yes                     │
//! │   2. Yes, and don't ask again│
//! │      this session            │
//! │   3. No                      │
//! ╰──────────────────────────────╯
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Top-left corner of a dialog frame.
pub const BOX_MARKER: &str = "╭─";

/// Printed by the CLI when the account hits its usage cap.
pub const USAGE_LIMIT_MARKER: &str = "Claude usage limit reached";

static EMPTY_PROMPT_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Keystroke answer for a recognized dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    /// "1": affirmative.
    Yes,
    /// "2": affirmative and suppress further prompts this session.
    DontAskAgain,
}

impl ResponseCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseCode::Yes => "1",
            ResponseCode::DontAskAgain => "2",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(ResponseCode::Yes),
            "2" => Some(ResponseCode::DontAskAgain),
            _ => None,
        }
    }
}

/// A recognized dialog phrase and the answer it maps to.
#[derive(Debug, Clone, Copy)]
pub struct DialogPhrase {
    /// Lower-case literal looked up in the lower-cased window
    pub phrase: &'static str,
    pub response: ResponseCode,
    /// Only active when "don't ask again" answers are enabled
    pub needs_dont_ask_again: bool,
}

/// Phrase table, most specific first. Lookup stops at the first hit.
pub const DIALOG_PHRASES: &[DialogPhrase] = &[
    DialogPhrase {
        phrase: "yes, and don't ask again this session",
        response: ResponseCode::DontAskAgain,
        needs_dont_ask_again: true,
    },
    DialogPhrase {
        phrase: "do you want to",
        response: ResponseCode::Yes,
        needs_dont_ask_again: false,
    },
];

/// Outcome of classifying a 3-line idle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleWindow {
    /// Empty input box: the CLI waits for free-form input.
    Idle,
    /// A complete window showing something else.
    Busy,
    /// Not exactly three lines; says nothing about the CLI state.
    Incomplete,
}

pub fn has_dialog_box(text: &str) -> bool {
    text.contains(BOX_MARKER)
}

/// Response the window asks for, if it is an actionable dialog.
pub fn detect_dialog(text: &str, enable_dont_ask_again: bool) -> Option<ResponseCode> {
    if !has_dialog_box(text) {
        return None;
    }
    detect_phrase(text, enable_dont_ask_again)
}

/// Phrase lookup alone, for text that may have lost its frame (a pasted
/// selection).
pub fn detect_phrase(text: &str, enable_dont_ask_again: bool) -> Option<ResponseCode> {
    let lower = text.to_lowercase();
    DIALOG_PHRASES
        .iter()
        .filter(|p| enable_dont_ask_again || !p.needs_dont_ask_again)
        .find(|p| lower.contains(p.phrase))
        .map(|p| p.response)
}

pub fn is_actionable_dialog(text: &str, enable_dont_ask_again: bool) -> bool {
    detect_dialog(text, enable_dont_ask_again).is_some()
}

fn empty_prompt_pattern() -> &'static Regex {
    EMPTY_PROMPT_PATTERN
        .get_or_init(|| Regex::new(r"^│\s*>\s*│$").expect("prompt pattern is valid"))
}

pub fn classify_idle_window<S: AsRef<str>>(lines: &[S]) -> IdleWindow {
    let [top, middle, bottom] = lines else {
        return IdleWindow::Incomplete;
    };
    let top = top.as_ref().trim();
    let middle = middle.as_ref().trim();
    let bottom = bottom.as_ref().trim();

    let is_top = top.starts_with('╭') && top.contains('─');
    let is_bottom = bottom.starts_with('╰') && bottom.contains('─');
    if is_top && is_bottom && empty_prompt_pattern().is_match(middle) {
        IdleWindow::Idle
    } else {
        IdleWindow::Busy
    }
}

pub fn is_idle_prompt_pattern<S: AsRef<str>>(lines: &[S]) -> bool {
    classify_idle_window(lines) == IdleWindow::Idle
}

/// Lines to feed [`classify_idle_window`]: the last three non-blank lines
/// ending at the newest box bottom.
///
/// Returns no lines when nothing has closed yet, or when a newer box top
/// follows the last bottom (that box is still being drawn).
pub fn idle_window(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();

    let last_bottom = lines.iter().rposition(|l| l.trim_start().starts_with('╰'));
    let last_top = lines.iter().rposition(|l| l.trim_start().starts_with('╭'));

    let Some(bottom) = last_bottom else {
        return Vec::new();
    };
    if matches!(last_top, Some(top) if top > bottom) {
        return Vec::new();
    }

    let start = bottom.saturating_sub(2);
    lines[start..=bottom].iter().map(|l| l.to_string()).collect()
}

pub fn has_usage_limit_marker(text: &str) -> bool {
    text.contains(USAGE_LIMIT_MARKER)
}
