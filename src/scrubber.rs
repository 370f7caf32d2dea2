//! Redaction of Wi-Fi credentials from device payloads.
//!
//! The Wibeee exposes its network settings through the same values API as
//! its measurements, so decoded payloads and raw response bodies both have
//! to be scrubbed before they reach sinks or debug logs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::decoder::Snapshot;

/// Keys whose values are secrets and must never be logged or exposed.
pub const SCRUB_KEYS: &[&str] = &["ssid", "securKey"];

/// Replacement token for scrubbed values.
pub const REDACTED: &str = "**REDACTED**";

/// Replaces the value of every scrub-listed key in a decoded payload.
pub fn scrub_map(fields: &mut Snapshot) {
    for key in SCRUB_KEYS {
        if let Some(value) = fields.get_mut(*key) {
            *value = REDACTED.to_string();
        }
    }
}

// One pattern per scrub key and payload shape: flat XML element, XML
// variable list, JSON field. Built once; `None` if any pattern fails.
static SCRUB_PATTERNS: Lazy<Option<Vec<(Regex, String)>>> = Lazy::new(|| {
    let mut patterns = Vec::new();
    for key in SCRUB_KEYS {
        let key = regex::escape(key);
        let shapes = [
            format!("(<{key}>)[^<]*(</{key}>)"),
            format!(r"(<id>\s*{key}\s*</id>\s*<value>)[^<]*(</value>)"),
            format!(r#"("{key}"\s*:\s*")[^"]*(")"#),
        ];
        for pattern in shapes {
            let re = Regex::new(&pattern).ok()?;
            patterns.push((re, format!("${{1}}{REDACTED}${{2}}")));
        }
    }
    Some(patterns)
});

/// Redacts secrets from raw payload text, for debug logging only.
///
/// Fails safe: if the redaction patterns are unavailable the whole text is
/// withheld rather than logged unredacted.
pub fn scrub_text(text: &str) -> String {
    match SCRUB_PATTERNS.as_ref() {
        Some(patterns) => {
            let mut out = text.to_string();
            for (re, replacement) in patterns {
                out = re.replace_all(&out, replacement.as_str()).into_owned();
            }
            out
        }
        None => REDACTED.to_string(),
    }
}
