//! Whitespace canonicalization for text produced by the format decoders.

use once_cell::sync::Lazy;
use regex::Regex;

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid pattern"));
static TAB_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t+").expect("valid pattern"));
static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("valid pattern"));

/// Cleans decoded document text.
///
/// Line endings become `\n`, three or more consecutive newlines collapse to two,
/// runs of tabs collapse to one tab, runs of spaces collapse to one space, and the
/// result is trimmed. Never fails; empty input yields an empty string.
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let text = BLANK_RUNS.replace_all(&unified, "\n\n");
    let text = TAB_RUNS.replace_all(&text, "\t");
    let text = SPACE_RUNS.replace_all(&text, " ");
    text.trim().to_string()
}
