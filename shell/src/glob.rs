//! Shell pattern matching (`*`, `?`, `[…]`) against the VFS.

use coral_vfs::FsView;
use coral_vfs::path;
use regex_lite::Regex;

/// True when `pattern` contains an unescaped glob metacharacter.
pub fn has_glob_meta(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Strips glob escapes, yielding the literal text a non-matching pattern
/// falls back to.
pub fn unescape(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Escapes `text` so it only matches itself when embedded in a pattern.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Compiles one pattern component to an anchored regex. `None` when the
/// pattern is malformed (an unclosed class is treated literally upstream).
fn component_regex(component: &str) -> Option<Regex> {
    let mut regex = String::from("^");
    let chars: Vec<char> = component.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' => {
                i += 1;
                if i < chars.len() {
                    push_literal(&mut regex, chars[i]);
                }
            }
            '[' => {
                // Find the closing bracket; `]` first in the class is
                // literal, as is traditional.
                let start = i + 1;
                let negated = matches!(chars.get(start), Some('!') | Some('^'));
                let body_start = if negated { start + 1 } else { start };
                let mut end = body_start;
                let mut found = None;
                while end < chars.len() {
                    if chars[end] == ']' && end > body_start {
                        found = Some(end);
                        break;
                    }
                    end += 1;
                }
                match found {
                    Some(close) => {
                        regex.push('[');
                        if negated {
                            regex.push('^');
                        }
                        for &c in &chars[body_start..close] {
                            if matches!(c, '\\' | '^' | ']') {
                                regex.push('\\');
                            }
                            regex.push(c);
                        }
                        regex.push(']');
                        i = close;
                    }
                    None => push_literal(&mut regex, '['),
                }
            }
            c => push_literal(&mut regex, c),
        }
        i += 1;
    }
    regex.push('$');
    Regex::new(&regex).ok()
}

fn push_literal(regex: &mut String, c: char) {
    if c.is_ascii_alphanumeric() {
        regex.push(c);
    } else {
        regex.push('\\');
        regex.push(c);
    }
}

/// Expands `pattern` against the filesystem. Returns matches sorted
/// lexically, in the same absolute/relative form as the pattern; empty when
/// nothing matches (the caller preserves the literal).
pub async fn expand(fs: &FsView, cwd: &str, pattern: &str) -> Vec<String> {
    let absolute = pattern.starts_with('/');
    let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Vec::new();
    }

    // Each state is the path-so-far, relative to the pattern's base.
    let mut states: Vec<String> = vec![String::new()];
    for component in components {
        let mut next_states = Vec::new();
        if !has_glob_meta(component) {
            let literal = unescape(component);
            for state in &states {
                next_states.push(join_rel(state, &literal));
            }
        } else {
            let Some(regex) = component_regex(component) else {
                for state in &states {
                    next_states.push(join_rel(state, component));
                }
                states = next_states;
                continue;
            };
            let show_hidden = component.starts_with('.');
            for state in &states {
                let dir = resolve_dir(cwd, absolute, state);
                let Ok(names) = fs.readdir(&dir).await else {
                    continue;
                };
                for name in names {
                    if !show_hidden && name.starts_with('.') {
                        continue;
                    }
                    if regex.is_match(&name) {
                        next_states.push(join_rel(state, &name));
                    }
                }
            }
        }
        states = next_states;
        if states.is_empty() {
            return Vec::new();
        }
    }

    // Literal components were never checked against the filesystem; a
    // surviving candidate must actually exist.
    let mut matches = Vec::new();
    for state in states {
        let full = resolve_dir(cwd, absolute, &state);
        if fs.exists(&full).await {
            matches.push(if absolute { full } else { state });
        }
    }
    matches.sort();
    matches.dedup();
    matches
}

fn join_rel(state: &str, name: &str) -> String {
    if state.is_empty() {
        name.to_string()
    } else {
        format!("{state}/{name}")
    }
}

fn resolve_dir(cwd: &str, absolute: bool, state: &str) -> String {
    if absolute {
        if state.is_empty() {
            "/".to_string()
        } else {
            format!("/{state}")
        }
    } else {
        path::absolutize(cwd, state)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use coral_vfs::Credentials;
    use coral_vfs::MemFs;
    use coral_vfs::Vfs;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn fixture() -> FsView {
        let vfs = Vfs::new();
        vfs.mount("/", Arc::new(MemFs::new())).await.expect("mount");
        let root = Credentials::root();
        vfs.mkdir("/work/sub", true, &root).await.expect("mkdir");
        for f in ["a.txt", "b.txt", "c.md", ".hidden"] {
            vfs.write_file(&format!("/work/{f}"), b"", &root)
                .await
                .expect("write");
        }
        vfs.write_file("/work/sub/d.txt", b"", &root)
            .await
            .expect("write");
        vfs.with_credentials(root)
    }

    #[tokio::test]
    async fn star_matches_sorted_and_skips_dotfiles() {
        let fs = fixture().await;
        assert_eq!(
            expand(&fs, "/work", "*.txt").await,
            vec!["a.txt", "b.txt"]
        );
        assert_eq!(
            expand(&fs, "/work", "*").await,
            vec!["a.txt", "b.txt", "c.md", "sub"]
        );
    }

    #[tokio::test]
    async fn question_mark_and_classes() {
        let fs = fixture().await;
        assert_eq!(expand(&fs, "/work", "?.txt").await, vec!["a.txt", "b.txt"]);
        assert_eq!(expand(&fs, "/work", "[ac].*").await, vec!["a.txt", "c.md"]);
        assert_eq!(expand(&fs, "/work", "[!a].txt").await, vec!["b.txt"]);
    }

    #[tokio::test]
    async fn dotfiles_need_an_explicit_dot() {
        let fs = fixture().await;
        assert_eq!(expand(&fs, "/work", ".h*").await, vec![".hidden"]);
    }

    #[tokio::test]
    async fn multi_component_patterns() {
        let fs = fixture().await;
        assert_eq!(expand(&fs, "/", "/work/*/*.txt").await, vec!["/work/sub/d.txt"]);
        assert_eq!(expand(&fs, "/work", "sub/*.txt").await, vec!["sub/d.txt"]);
    }

    #[tokio::test]
    async fn no_match_is_empty() {
        let fs = fixture().await;
        assert_eq!(expand(&fs, "/work", "*.rs").await, Vec::<String>::new());
    }

    #[test]
    fn meta_detection_honors_escapes() {
        assert!(has_glob_meta("*.txt"));
        assert!(!has_glob_meta(r"\*.txt"));
        assert_eq!(unescape(r"\*.txt"), "*.txt");
        assert_eq!(escape("a*b"), r"a\*b");
    }
}
