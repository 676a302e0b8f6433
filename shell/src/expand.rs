//! Word expansion: tilde, parameters, command substitution, globbing and
//! field splitting, in that order, with quoting rules per segment.

use crate::Result;
use crate::Shell;
use crate::ShellError;
use crate::glob;
use crate::lexer::Quote;
use crate::lexer::Word;
use crate::parser::is_identifier;

/// An intermediate expansion unit. `text` is what the argument will say;
/// `pattern` is the same content with quoted characters glob-escaped, so a
/// quoted `*` never matches while an expanded one does.
#[derive(Debug, Clone)]
struct Piece {
    text: String,
    pattern: String,
    /// Unquoted expansion results split on whitespace; quoted ones do not.
    splittable: bool,
}

impl Piece {
    fn quoted(text: String) -> Self {
        Self {
            pattern: glob::escape(&text),
            text,
            splittable: false,
        }
    }

    fn raw(text: String) -> Self {
        Self {
            pattern: text.clone(),
            text,
            splittable: true,
        }
    }
}

impl Shell {
    /// Full expansion of one word into argv fields.
    pub(crate) async fn expand_word_fields(&self, word: &Word) -> Result<Vec<String>> {
        let pieces = self.expand_segments(word).await?;
        let fields = split_fields(&pieces);

        let cwd = self.cwd().await;
        let mut argv = Vec::new();
        for (text, pattern) in fields {
            if glob::has_glob_meta(&pattern) {
                let matches = glob::expand(self.fs(), &cwd, &pattern).await;
                if matches.is_empty() {
                    // No match: the literal is preserved.
                    argv.push(text);
                } else {
                    argv.extend(matches);
                }
            } else {
                argv.push(text);
            }
        }
        Ok(argv)
    }

    /// Expansion without splitting or globbing, for redirect targets and
    /// assignment values.
    pub(crate) async fn expand_word_single(&self, word: &Word) -> Result<String> {
        let pieces = self.expand_segments(word).await?;
        Ok(pieces.into_iter().map(|p| p.text).collect())
    }

    async fn expand_segments(&self, word: &Word) -> Result<Vec<Piece>> {
        let mut pieces = Vec::new();
        for (idx, segment) in word.segments.iter().enumerate() {
            match segment.quote {
                Quote::Single => pieces.push(Piece::quoted(segment.text.clone())),
                Quote::Double => {
                    let expanded = self.expand_double(&segment.text).await?;
                    pieces.push(Piece::quoted(expanded));
                }
                Quote::None => {
                    let text = if idx == 0 {
                        self.tilde_prefix(&segment.text).await
                    } else {
                        segment.text.clone()
                    };
                    self.expand_unquoted(&text, &mut pieces).await?;
                }
            }
        }
        Ok(pieces)
    }

    /// A leading unquoted `~` (alone or before `/`) becomes `$HOME`.
    async fn tilde_prefix(&self, text: &str) -> String {
        if text == "~" || text.starts_with("~/") {
            self.expand_tilde(text).await
        } else {
            text.to_string()
        }
    }

    /// Double-quote rules: `$` and backticks expand, backslash escapes the
    /// specials, everything else is verbatim. Returns a single string.
    async fn expand_double(&self, text: &str) -> Result<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '\\' if i + 1 < chars.len() => {
                    let next = chars[i + 1];
                    if matches!(next, '$' | '`' | '"' | '\\') {
                        out.push(next);
                    } else {
                        out.push('\\');
                        out.push(next);
                    }
                    i += 2;
                }
                '$' => {
                    let (value, used) = self.dollar(&chars, i).await?;
                    out.push_str(&value);
                    i += used;
                }
                '`' => {
                    let (value, used) = self.backticks(&chars, i).await?;
                    out.push_str(&value);
                    i += used;
                }
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        Ok(out)
    }

    /// Bare-word rules: backslash makes the next char literal (and
    /// glob-inert), expansions are splittable and glob-live.
    async fn expand_unquoted(&self, text: &str, pieces: &mut Vec<Piece>) -> Result<()> {
        let chars: Vec<char> = text.chars().collect();
        let mut run = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '\\' if i + 1 < chars.len() => {
                    flush_run(&mut run, pieces);
                    pieces.push(Piece::quoted(chars[i + 1].to_string()));
                    i += 2;
                }
                '$' => {
                    flush_run(&mut run, pieces);
                    let (value, used) = self.dollar(&chars, i).await?;
                    pieces.push(Piece::raw(value));
                    i += used;
                }
                '`' => {
                    flush_run(&mut run, pieces);
                    let (value, used) = self.backticks(&chars, i).await?;
                    pieces.push(Piece::raw(value));
                    i += used;
                }
                c => {
                    run.push(c);
                    i += 1;
                }
            }
        }
        flush_run(&mut run, pieces);
        Ok(())
    }

    /// Expands the `$` form starting at `chars[start]`; returns the
    /// replacement and how many chars were consumed.
    async fn dollar(&self, chars: &[char], start: usize) -> Result<(String, usize)> {
        debug_assert_eq!(chars[start], '$');
        match chars.get(start + 1) {
            Some('(') => {
                let mut depth = 0usize;
                let mut end = None;
                for (offset, &c) in chars[start + 1..].iter().enumerate() {
                    match c {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(start + 1 + offset);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let Some(end) = end else {
                    return Err(ShellError::UnterminatedSubstitution);
                };
                let inner: String = chars[start + 2..end].iter().collect();
                let output = self.run_capture(&inner).await?;
                Ok((output, end - start + 1))
            }
            Some('{') => {
                let Some(offset) = chars[start + 2..].iter().position(|&c| c == '}') else {
                    return Err(ShellError::Syntax("unterminated ${".to_string()));
                };
                let name: String = chars[start + 2..start + 2 + offset].iter().collect();
                let value = self.parameter(&name).await;
                Ok((value, offset + 3))
            }
            Some('$') => Ok((self.pid().to_string(), 2)),
            Some('?') => Ok((self.last_status().to_string(), 2)),
            Some('#') => Ok((self.positional_count().await.to_string(), 2)),
            Some(d) if d.is_ascii_digit() => {
                let index = *d as usize - '0' as usize;
                let value = self.positional(index).await.unwrap_or_default();
                Ok((value, 2))
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut len = 1;
                while let Some(c) = chars.get(start + 1 + len) {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        len += 1;
                    } else {
                        break;
                    }
                }
                let name: String = chars[start + 1..start + 1 + len].iter().collect();
                Ok((self.parameter(&name).await, len + 1))
            }
            _ => Ok(("$".to_string(), 1)),
        }
    }

    async fn backticks(&self, chars: &[char], start: usize) -> Result<(String, usize)> {
        debug_assert_eq!(chars[start], '`');
        let Some(offset) = chars[start + 1..].iter().position(|&c| c == '`') else {
            return Err(ShellError::UnterminatedSubstitution);
        };
        let inner: String = chars[start + 1..start + 1 + offset].iter().collect();
        let output = self.run_capture(&inner).await?;
        Ok((output, offset + 2))
    }

    async fn parameter(&self, name: &str) -> String {
        if !is_identifier(name) {
            return String::new();
        }
        self.env_get(name).await.unwrap_or_default()
    }
}

fn flush_run(run: &mut String, pieces: &mut Vec<Piece>) {
    if !run.is_empty() {
        pieces.push(Piece::raw(std::mem::take(run)));
    }
}

/// IFS-style field splitting: splittable pieces break on whitespace, quoted
/// pieces glue. Returns `(text, pattern)` per field.
fn split_fields(pieces: &[Piece]) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut current: Option<(String, String)> = None;

    for piece in pieces {
        if !piece.splittable {
            let entry = current.get_or_insert_with(Default::default);
            entry.0.push_str(&piece.text);
            entry.1.push_str(&piece.pattern);
            continue;
        }
        for c in piece.text.chars() {
            if c.is_whitespace() {
                if let Some(done) = current.take() {
                    fields.push(done);
                }
            } else {
                let entry = current.get_or_insert_with(Default::default);
                entry.0.push(c);
                entry.1.push(c);
            }
        }
    }
    if let Some(done) = current.take() {
        fields.push(done);
    }
    fields
}
