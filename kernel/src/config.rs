use serde::Deserialize;

/// Boot configuration. Usually parsed from a TOML file; every field is
/// defaulted so an empty config boots a usable system.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelOptions {
    pub hostname: String,
    /// Account the login shell authenticates as.
    pub boot_user: String,
    /// Password for the boot account; also used when the account has to be
    /// created on first boot.
    pub boot_password: String,
    pub terminal_cols: u16,
    pub terminal_rows: u16,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            hostname: "coral".to_string(),
            boot_user: "root".to_string(),
            boot_password: "root".to_string(),
            terminal_cols: coral_term::DEFAULT_COLS,
            terminal_rows: coral_term::DEFAULT_ROWS,
        }
    }
}

impl KernelOptions {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_config_is_the_default() {
        assert_eq!(
            KernelOptions::from_toml("").expect("parse"),
            KernelOptions::default()
        );
    }

    #[test]
    fn partial_config_overrides_selected_fields() {
        let options =
            KernelOptions::from_toml("hostname = \"reef\"\nboot_user = \"alice\"\n")
                .expect("parse");
        assert_eq!(options.hostname, "reef");
        assert_eq!(options.boot_user, "alice");
        assert_eq!(options.boot_password, "root");
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(KernelOptions::from_toml("hostname = [").is_err());
    }
}
