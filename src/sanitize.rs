//! Control-sequence stripping for raw terminal log text.
//!
//! The log is whatever the PTY produced, so it carries SGR colors, cursor
//! movement, OSC titles and stray carriage returns. Everything downstream
//! matches literal phrases, so it only ever sees the output of [`clean`].

use regex::Regex;
use std::sync::OnceLock;

static ESCAPE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// CSI (`ESC [ params final`), OSC (`ESC ] ... BEL|ST`) and two-byte
/// `ESC x` sequences.
fn escape_pattern() -> &'static Regex {
    ESCAPE_PATTERN.get_or_init(|| {
        Regex::new(
            r"\x1B\[[0-9;?<=>!]*[ -/]*[@-~]|\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)|\x1B[()][0-9A-Za-z]|\x1B[@-Z\\-_=>78]",
        )
        .expect("escape pattern is valid")
    })
}

/// Strip escape sequences and C0 controls (except `\n` and `\t`).
///
/// A lone ESC whose sequence never completes is dropped on its own and the
/// remaining characters stay as literal text, which keeps the function
/// idempotent.
pub fn clean(raw: &str) -> String {
    let stripped = escape_pattern().replace_all(raw, "");
    stripped
        .chars()
        .filter(|c| !is_stripped_control(*c))
        .collect()
}

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1F}') && c != '\n' && c != '\t'
}
