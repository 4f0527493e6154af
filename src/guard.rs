//! Destructive-command veto for auto-responses.
//!
//! A dialog is only answered automatically when nothing in the buffer looks
//! like it could wipe a disk, a table, or a database. The built-in rules are
//! fixed; users can add their own regexes through `customBlacklist`.

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;
use tracing::debug;

static BUILTIN_RULES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

/// Built-in rules as (name, pattern). Compiled case-insensitively.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    // Filesystem
    ("rm -rf", r"rm\s+-(?:[a-z]*r[a-z]*f|[a-z]*f[a-z]*r)[a-z]*\b"),
    ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;?\s*:"),
    ("dd to disk", r"dd\s+if=\S+\s+of=/dev/(?:sd|nvme|hd|disk)"),
    ("mv /", r"mv\s+/\s"),
    ("overwrite /etc/passwd", r">\s*/etc/passwd"),
    ("overwrite /etc/shadow", r">\s*/etc/shadow"),
    ("overwrite /etc/hosts", r">\s*/etc/hosts"),
    ("mkfs", r"mkfs\."),
    ("format c:", r"format\s+c:"),
    // SQL
    ("drop database", r"drop\s+database\s+"),
    ("drop table", r"drop\s+table\s+"),
    ("drop schema", r"drop\s+schema\s+"),
    ("truncate table", r"truncate\s+table\s+"),
    ("delete without where", r"(?m)delete\s+from\s+\w+\s*;?\s*$"),
    ("update without where", r"(?m)update\s+\w+\s+set\s+[^\n]*?;?\s*$"),
    ("alter table drop", r"alter\s+table\s+\w+\s+drop\s+"),
    ("create or replace", r"create\s+or\s+replace\s+"),
    // Database admin
    ("mysql drop", r#"mysql\s+.*-e\s+["']drop"#),
    ("psql drop", r#"psql\s+.*-c\s+["']drop"#),
    ("pg_dump --clean", r"pg_dump\s+.*--clean"),
    ("dropdb", r"dropdb\s+"),
    ("createdb from template0", r"createdb\s+.*--template.*template0"),
    (
        "mysqldump with routines and triggers",
        r"mysqldump\s+.*--single-transaction.*--routines.*--triggers",
    ),
];

fn builtin_rules() -> &'static [(&'static str, Regex)] {
    BUILTIN_RULES.get_or_init(|| {
        BUILTIN_PATTERNS
            .iter()
            .filter_map(|(name, pattern)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()
                    .map(|re| (*name, re))
            })
            .collect()
    })
}

/// Compile a user pattern, or `None` if it is malformed.
fn compile_custom(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("Skipping invalid custom blacklist pattern {:?}: {}", pattern, e);
            None
        }
    }
}

/// Which rule vetoed a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch {
    Builtin(&'static str),
    Custom(String),
}

impl std::fmt::Display for RuleMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleMatch::Builtin(name) => write!(f, "{}", name),
            RuleMatch::Custom(pattern) => write!(f, "custom pattern /{}/", pattern),
        }
    }
}

/// Guard with the user's patterns compiled once per pattern list.
#[derive(Debug, Default)]
pub struct DestructiveGuard {
    /// Source strings the cache was built from
    source: Vec<String>,
    /// Compiled (pattern, regex); malformed entries are absent
    compiled: Vec<(String, Regex)>,
}

impl DestructiveGuard {
    pub fn new(custom_patterns: &[String]) -> Self {
        let mut guard = Self::default();
        guard.update(custom_patterns);
        guard
    }

    /// Recompile only if the pattern list changed.
    pub fn update(&mut self, custom_patterns: &[String]) {
        if self.source == custom_patterns {
            return;
        }
        self.source = custom_patterns.to_vec();
        self.compiled = custom_patterns
            .iter()
            .filter_map(|p| compile_custom(p).map(|re| (p.clone(), re)))
            .collect();
    }

    pub fn first_match(&self, text: &str) -> Option<RuleMatch> {
        if let Some((name, _)) = builtin_rules().iter().find(|(_, re)| re.is_match(text)) {
            return Some(RuleMatch::Builtin(name));
        }
        self.compiled
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(pattern, _)| RuleMatch::Custom(pattern.clone()))
    }

    pub fn is_destructive(&self, text: &str) -> bool {
        self.first_match(text).is_some()
    }
}

/// One-shot check without a cached guard.
pub fn is_destructive(text: &str, custom_patterns: &[String]) -> bool {
    if builtin_rules().iter().any(|(_, re)| re.is_match(text)) {
        return true;
    }
    custom_patterns
        .iter()
        .filter_map(|p| compile_custom(p))
        .any(|re| re.is_match(text))
}
