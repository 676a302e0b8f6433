use async_trait::async_trait;
use bytes::Bytes;

use crate::Metadata;
use crate::Result;

/// One mounted filesystem. Paths handed to a backend are canonical and
/// relative to the mount root (they still begin with `/`), and never
/// traverse a symlink: the composite VFS resolves links component by
/// component before delegating, so a backend only ever sees a symlink as a
/// final component.
///
/// Backends are byte stores; open-handle positions and permission checks
/// live a level up.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Metadata without following a final symlink.
    async fn lstat(&self, path: &str) -> Result<Metadata>;

    /// Target of a symlink; `NotASymlink` for anything else.
    async fn readlink(&self, path: &str) -> Result<String>;

    async fn read_at(&self, path: &str, pos: u64, len: usize) -> Result<Bytes>;

    /// Returns the number of bytes written. With `append`, `pos` is ignored
    /// and the write lands at the current end of file.
    async fn write_at(&self, path: &str, pos: u64, data: &[u8], append: bool) -> Result<usize>;

    async fn truncate(&self, path: &str, len: u64) -> Result<()>;

    async fn create_file(&self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()>;

    async fn mkdir(&self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<()>;

    /// Fails on non-empty directories.
    async fn rmdir(&self, path: &str) -> Result<()>;

    async fn unlink(&self, path: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Child names, sorted lexically.
    async fn readdir(&self, path: &str) -> Result<Vec<String>>;

    async fn symlink(&self, target: &str, path: &str, uid: u32, gid: u32) -> Result<()>;

    async fn chmod(&self, path: &str, mode: u32) -> Result<()>;

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()>;
}
