use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use coral_vfs::Credentials;
use coral_vfs::Vfs;
use coral_vfs::VfsError;
use tokio::sync::RwLock;
use tracing::debug;

use crate::Passkey;
use crate::Result;
use crate::User;
use crate::UserError;
use crate::passkey;
use crate::user;

const PASSWD_PATH: &str = "/etc/passwd";
const SHADOW_PATH: &str = "/etc/shadow";

/// A successful login: the account plus the credentials processes spawned
/// for it will carry.
#[derive(Debug, Clone)]
pub struct Login {
    pub user: User,
    pub credentials: Credentials,
}

struct DbInner {
    vfs: Vfs,
    users: RwLock<HashMap<String, User>>,
}

/// The account database, backed by `/etc/passwd` and `/etc/shadow`.
/// Mutations are written back immediately.
#[derive(Clone)]
pub struct UserDb {
    inner: Arc<DbInner>,
}

impl UserDb {
    /// Loads accounts from disk. Missing files mean an empty user set.
    pub async fn load(vfs: Vfs) -> Result<Self> {
        let root = Credentials::root();
        let mut users: HashMap<String, User> = HashMap::new();

        match vfs.read_to_string(PASSWD_PATH, &root).await {
            Ok(content) => {
                for parsed in user::parse_passwd(&content) {
                    users.insert(parsed.username.clone(), parsed);
                }
            }
            Err(VfsError::NotFound) => debug!("{PASSWD_PATH} absent, starting empty"),
            Err(err) => return Err(err.into()),
        }

        match vfs.read_to_string(SHADOW_PATH, &root).await {
            Ok(content) => {
                for (username, hash) in user::parse_shadow(&content) {
                    if let Some(entry) = users.get_mut(&username) {
                        entry.password_hash = if hash == "!" { None } else { Some(hash) };
                    }
                }
            }
            Err(VfsError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        Ok(Self {
            inner: Arc::new(DbInner {
                vfs,
                users: RwLock::new(users),
            }),
        })
    }

    /// Serializes the account set back to `/etc/passwd` + `/etc/shadow`.
    pub async fn save(&self) -> Result<()> {
        let root = Credentials::root();
        let users = self.list().await;
        self.inner
            .vfs
            .write_file(PASSWD_PATH, user::serialize_passwd(&users).as_bytes(), &root)
            .await?;
        self.inner
            .vfs
            .write_file(SHADOW_PATH, user::serialize_shadow(&users).as_bytes(), &root)
            .await?;
        self.inner.vfs.chmod(SHADOW_PATH, 0o600, &root).await?;
        Ok(())
    }

    pub async fn get(&self, username: &str) -> Option<User> {
        self.inner.users.read().await.get(username).cloned()
    }

    pub async fn get_by_uid(&self, uid: u32) -> Option<User> {
        self.inner
            .users
            .read()
            .await
            .values()
            .find(|u| u.uid == uid)
            .cloned()
    }

    /// All accounts, ordered by uid.
    pub async fn list(&self) -> Vec<User> {
        let users = self.inner.users.read().await;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by_key(|u| u.uid);
        all
    }

    /// The next free uid at or above 1000.
    pub async fn next_uid(&self) -> u32 {
        let users = self.inner.users.read().await;
        let mut uid = 1000;
        while users.values().any(|u| u.uid == uid) {
            uid += 1;
        }
        uid
    }

    pub async fn add(&self, user: User) -> Result<()> {
        {
            let mut users = self.inner.users.write().await;
            if users.contains_key(&user.username) {
                return Err(UserError::UserExists(user.username));
            }
            users.insert(user.username.clone(), user);
        }
        self.save().await
    }

    pub async fn update(&self, user: User) -> Result<()> {
        {
            let mut users = self.inner.users.write().await;
            if !users.contains_key(&user.username) {
                return Err(UserError::UnknownUser(user.username));
            }
            users.insert(user.username.clone(), user);
        }
        self.save().await
    }

    pub async fn remove(&self, username: &str) -> Result<User> {
        let removed = {
            let mut users = self.inner.users.write().await;
            users
                .remove(username)
                .ok_or_else(|| UserError::UnknownUser(username.to_string()))?
        };
        self.save().await?;
        Ok(removed)
    }

    /// Password authentication. Unknown users and wrong passwords fail the
    /// same way so probing reveals nothing.
    pub async fn login(&self, username: &str, password: &str) -> Result<Login> {
        let user = self.get(username).await.ok_or(UserError::AuthFailed)?;
        if !user.verify_password(password) {
            return Err(UserError::AuthFailed);
        }
        Ok(Self::login_for(user))
    }

    /// Passkey authentication: the host has already run the WebAuthn
    /// ceremony; the database matches the credential id and stamps its use.
    pub async fn login_with_passkey(&self, username: &str, credential_id: &[u8]) -> Result<Login> {
        let user = self.get(username).await.ok_or(UserError::AuthFailed)?;
        let mut passkeys = self.load_passkeys(&user).await?;
        let Some(entry) = passkeys.iter_mut().find(|k| k.matches(credential_id)) else {
            return Err(UserError::AuthFailed);
        };
        entry.last_used = Some(Utc::now());
        self.save_passkeys(&user, &passkeys).await?;
        Ok(Self::login_for(user))
    }

    fn login_for(user: User) -> Login {
        let credentials = Credentials {
            uid: user.uid,
            gid: user.gid,
            groups: user.groups.clone(),
        };
        Login { user, credentials }
    }

    fn passkey_path(user: &User) -> String {
        format!("{}/.passkeys", user.home)
    }

    pub async fn load_passkeys(&self, user: &User) -> Result<Vec<Passkey>> {
        let root = Credentials::root();
        match self
            .inner
            .vfs
            .read_to_string(&Self::passkey_path(user), &root)
            .await
        {
            Ok(content) => Ok(passkey::parse_passkeys(&content)?),
            Err(VfsError::NotFound) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_passkeys(&self, user: &User, passkeys: &[Passkey]) -> Result<()> {
        let root = Credentials::root();
        let path = Self::passkey_path(user);
        let json = passkey::serialize_passkeys(passkeys)?;
        self.inner.vfs.write_file(&path, json.as_bytes(), &root).await?;
        self.inner.vfs.chmod(&path, 0o600, &root).await?;
        Ok(())
    }

    pub async fn register_passkey(&self, username: &str, key: Passkey) -> Result<()> {
        let user = self
            .get(username)
            .await
            .ok_or_else(|| UserError::UnknownUser(username.to_string()))?;
        let mut passkeys = self.load_passkeys(&user).await?;
        passkeys.push(key);
        self.save_passkeys(&user, &passkeys).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use coral_vfs::MemFs;
    use pretty_assertions::assert_eq;

    async fn scratch_vfs() -> Vfs {
        let vfs = Vfs::new();
        vfs.mount("/", Arc::new(MemFs::new())).await.expect("mount");
        let root = Credentials::root();
        vfs.mkdir("/etc", false, &root).await.expect("mkdir /etc");
        vfs.mkdir("/home/carol", true, &root).await.expect("mkdir home");
        vfs
    }

    #[tokio::test]
    async fn missing_passwd_means_empty_set() {
        let db = UserDb::load(scratch_vfs().await).await.expect("load");
        assert_eq!(db.list().await, Vec::new());
    }

    #[tokio::test]
    async fn password_roundtrip() {
        let vfs = scratch_vfs().await;
        let db = UserDb::load(vfs.clone()).await.expect("load");
        db.add(User::new("carol", 1000, 1000).with_password("s3cret"))
            .await
            .expect("add");

        let login = db.login("carol", "s3cret").await.expect("login");
        assert_eq!(login.credentials.uid, 1000);
        assert!(matches!(
            db.login("carol", "wrong").await,
            Err(UserError::AuthFailed)
        ));
        assert!(matches!(
            db.login("nobody", "s3cret").await,
            Err(UserError::AuthFailed)
        ));

        // A reloaded database sees the same hash via /etc/shadow.
        let reloaded = UserDb::load(vfs).await.expect("reload");
        reloaded.login("carol", "s3cret").await.expect("login again");
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let db = UserDb::load(scratch_vfs().await).await.expect("load");
        db.add(User::new("carol", 1000, 1000)).await.expect("add");
        assert!(matches!(
            db.add(User::new("carol", 1001, 1001)).await,
            Err(UserError::UserExists(_))
        ));
    }

    #[tokio::test]
    async fn shadow_file_is_owner_only() {
        let vfs = scratch_vfs().await;
        let db = UserDb::load(vfs.clone()).await.expect("load");
        db.add(User::new("carol", 1000, 1000).with_password("x"))
            .await
            .expect("add");
        let meta = vfs
            .stat("/etc/shadow", &Credentials::root())
            .await
            .expect("stat");
        assert_eq!(meta.mode, 0o600);
    }

    #[tokio::test]
    async fn passkey_login_stamps_last_used() {
        let vfs = scratch_vfs().await;
        let db = UserDb::load(vfs).await.expect("load");
        db.add(User::new("carol", 1000, 1000)).await.expect("add");
        db.register_passkey("carol", Passkey::new(b"cred", b"pk", None))
            .await
            .expect("register");

        assert!(matches!(
            db.login_with_passkey("carol", b"other").await,
            Err(UserError::AuthFailed)
        ));
        let login = db
            .login_with_passkey("carol", b"cred")
            .await
            .expect("login");
        assert_eq!(login.user.username, "carol");

        let keys = db.load_passkeys(&login.user).await.expect("load keys");
        assert!(keys[0].last_used.is_some());
    }

    #[tokio::test]
    async fn next_uid_skips_taken_ids() {
        let db = UserDb::load(scratch_vfs().await).await.expect("load");
        db.add(User::new("a", 1000, 1000)).await.expect("add");
        db.add(User::new("b", 1001, 1001)).await.expect("add");
        assert_eq!(db.next_uid().await, 1002);
    }
}
