use serde::Deserialize;

/// `$HOME/.config/shell.toml`. Every field has a default so a missing or
/// partial file is fine.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Prompt template; `PS1` in the environment wins over this.
    pub prompt: String,
    /// Ring the bell on completion ambiguity and editing errors.
    pub bell: bool,
    /// Lines of history kept in memory and persisted.
    pub history_size: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: r"\u@\h:\w\$ ".to_string(),
            bell: true,
            history_size: 500,
        }
    }
}

impl ShellConfig {
    pub fn parse(content: &str) -> Self {
        match toml::from_str(content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("shell.toml unreadable, using defaults: {err}");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_file_fills_defaults() {
        let config = ShellConfig::parse("history_size = 42\n");
        assert_eq!(config.history_size, 42);
        assert!(config.bell);
        assert_eq!(config.prompt, r"\u@\h:\w\$ ");
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        assert_eq!(ShellConfig::parse("not toml ["), ShellConfig::default());
    }
}
