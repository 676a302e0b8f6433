//! Codecs for the plain-text system files under `/etc`.
//!
//! `/etc/passwd` and `/etc/shadow` belong to the user database; the cron
//! table belongs to the scheduler. What lives here is the one format the
//! filesystem layer itself hands to every consumer: `KEY=VALUE` environment
//! files.

/// Parses `/etc/env`-style content: one `KEY=VALUE` per line, `#` comments
/// and blank lines ignored, values taken verbatim after the first `=`.
/// Later assignments win. Order of first appearance is preserved.
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.to_string();
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
    }
    entries
}

/// Renders entries back into `KEY=VALUE` lines with a trailing newline.
pub fn serialize_env_file(entries: &[(String, String)]) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}
