//! The in-terminal line editor behind [`Terminal::read_line`].

use tokio::sync::broadcast::error::RecvError;

use crate::KeyCode;
use crate::Result;
use crate::TermError;
use crate::TermEvent;
use crate::Terminal;
use crate::ansi;

pub(crate) struct LineEditor<'t> {
    term: &'t Terminal,
    prompt: String,
    echo: bool,
    allow_empty: bool,
    buf: Vec<char>,
    cursor: usize,
    history: Vec<String>,
    /// One past the last history entry = editing a fresh line.
    history_index: usize,
    /// The fresh line stashed while browsing history.
    stash: Vec<char>,
}

impl<'t> LineEditor<'t> {
    pub(crate) fn new(term: &'t Terminal, prompt: &str, echo: bool, allow_empty: bool) -> Self {
        Self {
            term,
            prompt: prompt.to_string(),
            echo,
            allow_empty,
            buf: Vec::new(),
            cursor: 0,
            history: Vec::new(),
            history_index: 0,
            stash: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) -> Result<String> {
        let mut keys = self.term.on_key();
        let mut events = self.term.subscribe_events();
        self.history = self.term.history().await;
        self.history_index = self.history.len();
        self.term.write_str(&self.prompt).await?;

        loop {
            let key = tokio::select! {
                event = events.recv() => {
                    if let Ok(TermEvent::Interrupt) = event {
                        self.term.write_str("^C\n").await?;
                        return Err(TermError::Interrupted);
                    }
                    continue;
                }
                key = keys.recv() => match key {
                    Ok(key) => key,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(TermError::Eof),
                },
            };

            // While a full-screen UI owns the keyboard, the editor idles.
            if !self.term.is_listening() {
                continue;
            }

            if key.is_interrupt() {
                self.term.write_str("^C\n").await?;
                return Err(TermError::Interrupted);
            }
            if key.is_eof() && self.buf.is_empty() {
                return Err(TermError::Eof);
            }
            if key.ctrl || key.alt {
                continue;
            }

            match key.code {
                KeyCode::Enter => {
                    if self.buf.is_empty() && !self.allow_empty {
                        continue;
                    }
                    self.term.write_str("\n").await?;
                    return Ok(self.buf.iter().collect());
                }
                KeyCode::Char(c) => {
                    self.buf.insert(self.cursor, c);
                    self.cursor += 1;
                }
                KeyCode::Backspace => {
                    if self.cursor > 0 {
                        self.cursor -= 1;
                        self.buf.remove(self.cursor);
                    }
                }
                KeyCode::Delete => {
                    if self.cursor < self.buf.len() {
                        self.buf.remove(self.cursor);
                    }
                }
                KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
                KeyCode::Right => self.cursor = (self.cursor + 1).min(self.buf.len()),
                KeyCode::Home => self.cursor = 0,
                KeyCode::End => self.cursor = self.buf.len(),
                KeyCode::Up => self.history_previous(),
                KeyCode::Down => self.history_next(),
                KeyCode::Tab => self.complete().await,
                KeyCode::Esc => {}
            }

            if self.echo {
                self.redraw().await?;
            }
        }
    }

    fn history_previous(&mut self) {
        if self.history_index == 0 {
            return;
        }
        if self.history_index == self.history.len() {
            self.stash = std::mem::take(&mut self.buf);
        }
        self.history_index -= 1;
        self.buf = self.history[self.history_index].chars().collect();
        self.cursor = self.buf.len();
    }

    fn history_next(&mut self) {
        if self.history_index >= self.history.len() {
            return;
        }
        self.history_index += 1;
        self.buf = if self.history_index == self.history.len() {
            std::mem::take(&mut self.stash)
        } else {
            self.history[self.history_index].chars().collect()
        };
        self.cursor = self.buf.len();
    }

    async fn complete(&mut self) {
        let Some(completer) = self.term.completer().await else {
            return;
        };
        let line: String = self.buf.iter().collect();
        // The completer works in byte offsets; the editor in chars.
        let byte_cursor = line
            .char_indices()
            .nth(self.cursor)
            .map(|(idx, _)| idx)
            .unwrap_or(line.len());
        let candidates = completer.complete(&line, byte_cursor).await;
        match candidates.as_slice() {
            [only] => {
                // Replace the word under the cursor with the candidate.
                let prefix: String = self.buf[..self.cursor].iter().collect();
                let word_start = prefix
                    .rfind(char::is_whitespace)
                    .map_or(0, |idx| idx + prefix[idx..].chars().next().map_or(1, char::len_utf8));
                let head: Vec<char> = line[..word_start].chars().collect();
                let tail: Vec<char> = self.buf[self.cursor..].to_vec();
                self.buf = head;
                self.buf.extend(only.chars());
                self.cursor = self.buf.len();
                self.buf.extend(tail);
            }
            _ => {
                let _ = self.term.bell().await;
            }
        }
    }

    async fn redraw(&self) -> Result<()> {
        let line: String = self.buf.iter().collect();
        let back = self.buf.len() - self.cursor;
        let frame = format!(
            "\r{}{}{}{}",
            ansi::clear_line_right(),
            self.prompt,
            line,
            ansi::cursor_left(back)
        );
        self.term.write_str(&frame).await
    }
}
