//! The user database: accounts, credentials and passkeys, serialized to
//! `/etc/passwd`, `/etc/shadow` and `$HOME/.passkeys`.

#![deny(clippy::print_stdout, clippy::print_stderr)]

mod db;
mod error;
mod passkey;
mod user;

pub use db::Login;
pub use db::UserDb;
pub use error::Result;
pub use error::UserError;
pub use passkey::Passkey;
pub use passkey::parse_passkeys;
pub use passkey::serialize_passkeys;
pub use user::User;
pub use user::hash_password;
pub use user::parse_passwd;
pub use user::parse_shadow;
pub use user::serialize_passwd;
pub use user::serialize_shadow;
