use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A stored WebAuthn credential. The host runs the actual
/// challenge/response ceremony; the database stores public keys and matches
/// credential ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passkey {
    pub id: String,
    pub credential_id: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Passkey {
    pub fn new(credential_id: &[u8], public_key: &[u8], name: Option<String>) -> Self {
        let credential_id = URL_SAFE_NO_PAD.encode(credential_id);
        Self {
            id: format!("pk-{credential_id}"),
            credential_id,
            public_key: URL_SAFE_NO_PAD.encode(public_key),
            created_at: Utc::now(),
            last_used: None,
            name,
        }
    }

    pub fn matches(&self, credential_id: &[u8]) -> bool {
        URL_SAFE_NO_PAD
            .decode(&self.credential_id)
            .map(|stored| stored == credential_id)
            .unwrap_or(false)
    }
}

/// Decodes a `$HOME/.passkeys` JSON array; an absent or empty file is an
/// empty set.
pub fn parse_passkeys(content: &str) -> serde_json::Result<Vec<Passkey>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(content)
}

pub fn serialize_passkeys(passkeys: &[Passkey]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(passkeys)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_roundtrip() {
        let keys = vec![Passkey::new(b"cred-1", b"pubkey-bytes", Some("laptop".into()))];
        let json = serialize_passkeys(&keys).expect("serialize");
        let parsed = parse_passkeys(&json).expect("parse");
        assert_eq!(parsed, keys);
    }

    #[test]
    fn matches_compares_decoded_credential_ids() {
        let key = Passkey::new(b"cred-1", b"pk", None);
        assert!(key.matches(b"cred-1"));
        assert!(!key.matches(b"cred-2"));
    }

    #[test]
    fn empty_file_is_an_empty_set() {
        assert_eq!(parse_passkeys("").expect("parse"), Vec::new());
        assert_eq!(parse_passkeys("  \n").expect("parse"), Vec::new());
    }
}
