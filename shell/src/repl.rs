//! The interactive read-eval loop and tab completion.

use std::sync::Arc;

use async_trait::async_trait;
use coral_term::Completer;
use coral_term::TermError;
use coral_vfs::path;

use crate::Shell;
use crate::builtins;

impl Shell {
    /// Runs the interactive loop until `exit` or end-of-input. Returns the
    /// session's final status.
    pub async fn repl(&self) -> i32 {
        self.load_history().await;
        self.terminal()
            .set_completer(Arc::new(ShellCompleter {
                shell: self.clone(),
            }))
            .await;

        loop {
            if let Some(code) = self.exit_code().await {
                return code;
            }
            let prompt = self.prompt().await;
            match self.terminal().read_line(&prompt, true, true).await {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    self.append_history(&line).await;
                    self.execute_line(&line).await;
                }
                // ^C abandons the line; the loop re-prompts.
                Err(TermError::Interrupted) => continue,
                Err(TermError::Eof) => return self.last_status(),
                Err(TermError::Stream(_)) => return self.last_status(),
            }
        }
    }
}

/// First word completes against builtins, registered commands and aliases;
/// later words complete as paths on the VFS.
struct ShellCompleter {
    shell: Shell,
}

#[async_trait]
impl Completer for ShellCompleter {
    async fn complete(&self, line: &str, cursor: usize) -> Vec<String> {
        let cursor = cursor.min(line.len());
        let before = &line[..cursor];
        let word_start = before.rfind(char::is_whitespace).map_or(0, |i| i + 1);
        let prefix = &before[word_start..];

        if word_start == 0 {
            self.complete_command(prefix).await
        } else {
            self.complete_path(prefix).await
        }
    }
}

impl ShellCompleter {
    async fn complete_command(&self, prefix: &str) -> Vec<String> {
        let mut names = builtins::builtin_names();
        if let Some(resolver) = self.shell.resolver().await {
            names.extend(resolver.names());
        }
        names.extend(self.shell.aliases().await.keys().cloned());
        names.sort();
        names.dedup();
        names.retain(|name| name.starts_with(prefix) && name != prefix);
        names
    }

    async fn complete_path(&self, prefix: &str) -> Vec<String> {
        let cwd = self.shell.cwd().await;
        let expanded = self.shell.expand_tilde(prefix).await;
        let (dir_part, name_part) = match expanded.rfind('/') {
            Some(idx) => (&expanded[..=idx], &expanded[idx + 1..]),
            None => ("", expanded.as_str()),
        };
        let dir = if dir_part.is_empty() {
            cwd.clone()
        } else {
            path::absolutize(&cwd, dir_part)
        };

        let Ok(names) = self.shell.fs().readdir(&dir).await else {
            return Vec::new();
        };
        let mut candidates = Vec::new();
        for name in names {
            if !name.starts_with(name_part) || name == name_part {
                continue;
            }
            let full = format!("{dir_part}{name}");
            let is_dir = self
                .shell
                .fs()
                .stat(&path::absolutize(&cwd, &full))
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            candidates.push(if is_dir { format!("{full}/") } else { full });
        }
        candidates.sort();
        candidates
    }
}
