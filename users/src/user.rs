use sha2::Digest;
use sha2::Sha256;
use tracing::warn;

/// One account. The password hash lives in `/etc/shadow`; everything else
/// round-trips through `/etc/passwd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub home: String,
    pub shell: String,
    pub password_hash: Option<String>,
}

impl User {
    pub fn new(username: &str, uid: u32, gid: u32) -> Self {
        Self {
            username: username.to_string(),
            uid,
            gid,
            groups: Vec::new(),
            home: if uid == 0 {
                "/root".to_string()
            } else {
                format!("/home/{username}")
            },
            shell: "/bin/sh".to_string(),
            password_hash: None,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password_hash = Some(hash_password(password));
        self
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    pub fn verify_password(&self, password: &str) -> bool {
        match &self.password_hash {
            Some(hash) => hash == &hash_password(password),
            None => false,
        }
    }

    /// `username:x:uid:gid:groups,…:home:shell`
    pub fn to_passwd_line(&self) -> String {
        let groups = self
            .groups
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}:x:{}:{}:{}:{}:{}",
            self.username, self.uid, self.gid, groups, self.home, self.shell
        )
    }

    pub fn from_passwd_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 7 {
            return None;
        }
        let uid = fields[2].parse().ok()?;
        let gid = fields[3].parse().ok()?;
        let groups = fields[4]
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        Some(Self {
            username: fields[0].to_string(),
            uid,
            gid,
            groups,
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
            password_hash: None,
        })
    }
}

/// Hex SHA-256 of the UTF-8 password bytes, unsalted. Kept byte-compatible
/// with existing `/etc/shadow` images; a salted KDF would be the right
/// upgrade and would invalidate stored hashes.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parses `/etc/passwd` content; malformed lines are logged and skipped.
pub fn parse_passwd(content: &str) -> Vec<User> {
    let mut users = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match User::from_passwd_line(line) {
            Some(user) => users.push(user),
            None => warn!("skipping malformed passwd line: {line}"),
        }
    }
    users
}

pub fn serialize_passwd(users: &[User]) -> String {
    let mut out = String::new();
    for user in users {
        out.push_str(&user.to_passwd_line());
        out.push('\n');
    }
    out
}

/// Parses `/etc/shadow` into `(username, hash)` pairs.
pub fn parse_shadow(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(':');
        let (Some(username), Some(hash)) = (fields.next(), fields.next()) else {
            continue;
        };
        if !hash.is_empty() {
            entries.push((username.to_string(), hash.to_string()));
        }
    }
    entries
}

pub fn serialize_shadow(users: &[User]) -> String {
    let mut out = String::new();
    for user in users {
        let hash = user.password_hash.as_deref().unwrap_or("!");
        out.push_str(&format!("{}:{}:::::::\n", user.username, hash));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn passwd_line_roundtrip() {
        let mut user = User::new("alice", 1000, 1000);
        user.groups = vec![4, 27];
        let line = user.to_passwd_line();
        assert_eq!(line, "alice:x:1000:1000:4,27:/home/alice:/bin/sh");
        assert_eq!(User::from_passwd_line(&line), Some(user));
    }

    #[test]
    fn known_sha256_vector() {
        // sha256("password"), pinning the on-disk shadow format.
        assert_eq!(
            hash_password("password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn verify_rejects_wrong_and_missing_passwords() {
        let user = User::new("u", 1000, 1000).with_password("p");
        assert!(user.verify_password("p"));
        assert!(!user.verify_password("wrong"));
        assert!(!User::new("v", 1001, 1001).verify_password("anything"));
    }

    #[test]
    fn malformed_passwd_lines_are_skipped() {
        let users = parse_passwd("root:x:0:0::/root:/bin/sh\ngarbage\n# comment\n");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "root");
        assert_eq!(users[0].groups, Vec::<u32>::new());
    }

    #[test]
    fn shadow_roundtrip_ignores_locked_entries() {
        let users = vec![
            User::new("root", 0, 0).with_password("toor"),
            User::new("nopw", 1000, 1000),
        ];
        let content = serialize_shadow(&users);
        let parsed = parse_shadow(&content);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "root");
        assert_eq!(parsed[1].1, "!");
    }
}
