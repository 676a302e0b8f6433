use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use tokio::sync::RwLock;

use crate::Access;
use crate::Credentials;
use crate::FileHandle;
use crate::FileSystem;
use crate::Metadata;
use crate::OpenFlags;
use crate::Result;
use crate::VfsError;
use crate::path;

/// Symlink chains longer than this are treated as loops.
const MAX_SYMLINK_DEPTH: u32 = 40;

/// Reads per chunk when slurping a whole file.
const READ_FILE_CHUNK: usize = 64 * 1024;

/// Mode for files created implicitly by `open` with the create flag.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Mode for directories created by `mkdir`.
const DEFAULT_DIR_MODE: u32 = 0o755;

struct MountEntry {
    prefix: String,
    fs: Arc<dyn FileSystem>,
}

struct Inner {
    /// Sorted by prefix length, longest first, so resolution walks the
    /// deepest matching mount.
    mounts: RwLock<Vec<MountEntry>>,
    next_fd: AtomicU32,
}

/// The composite filesystem: a mount table plus path resolution, symlink
/// following, permission checks and open-handle bookkeeping. Backends see
/// none of that; they store bytes.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<Inner>,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                mounts: RwLock::new(Vec::new()),
                // 0-2 belong to the standard streams.
                next_fd: AtomicU32::new(3),
            }),
        }
    }

    /// Binds this VFS to an identity; all operations on the returned view
    /// run as `creds`.
    pub fn with_credentials(&self, creds: Credentials) -> FsView {
        FsView {
            vfs: self.clone(),
            creds,
        }
    }

    pub async fn mount(&self, prefix: &str, fs: Arc<dyn FileSystem>) -> Result<()> {
        let prefix = path::canonicalize(prefix)?;
        let mut mounts = self.inner.mounts.write().await;
        if mounts.iter().any(|m| m.prefix == prefix) {
            return Err(VfsError::AlreadyExists);
        }
        mounts.push(MountEntry { prefix, fs });
        mounts.sort_by_key(|m| std::cmp::Reverse(m.prefix.len()));
        Ok(())
    }

    pub async fn umount(&self, prefix: &str) -> Result<()> {
        let prefix = path::canonicalize(prefix)?;
        if prefix == "/" {
            return Err(VfsError::InvalidPath("cannot unmount the root".into()));
        }
        let mut mounts = self.inner.mounts.write().await;
        let before = mounts.len();
        mounts.retain(|m| m.prefix != prefix);
        if mounts.len() == before {
            return Err(VfsError::NotMounted(prefix));
        }
        Ok(())
    }

    pub async fn mount_points(&self) -> Vec<String> {
        let mounts = self.inner.mounts.read().await;
        let mut prefixes: Vec<String> = mounts.iter().map(|m| m.prefix.clone()).collect();
        prefixes.sort();
        prefixes
    }

    /// Longest-prefix mount lookup; returns the backend and the
    /// mount-relative path.
    async fn mount_for(&self, p: &str) -> Result<(Arc<dyn FileSystem>, String)> {
        let mounts = self.inner.mounts.read().await;
        for m in mounts.iter() {
            if m.prefix == "/" {
                return Ok((Arc::clone(&m.fs), p.to_string()));
            }
            if p == m.prefix || p.starts_with(&format!("{}/", m.prefix)) {
                let local = &p[m.prefix.len()..];
                let local = if local.is_empty() { "/" } else { local };
                return Ok((Arc::clone(&m.fs), local.to_string()));
            }
        }
        Err(VfsError::NotMounted(p.to_string()))
    }

    async fn lstat_mounted(&self, p: &str) -> Result<Metadata> {
        let (fs, local) = self.mount_for(p).await?;
        fs.lstat(&local).await
    }

    async fn readlink_mounted(&self, p: &str) -> Result<String> {
        let (fs, local) = self.mount_for(p).await?;
        fs.readlink(&local).await
    }

    /// Resolves `input` to a canonical path, following symlinks component by
    /// component (the final one only when `follow_last`), checking traverse
    /// permission on every directory along the way.
    ///
    /// A missing *final* component resolves to its would-be path so that
    /// creating opens can proceed; any other missing component is an error.
    async fn resolve(&self, input: &str, creds: &Credentials, follow_last: bool) -> Result<String> {
        let canonical = path::canonicalize(input)?;
        let mut parts: VecDeque<String> = path::components(&canonical).map(String::from).collect();
        let mut cur = "/".to_string();
        let mut depth = 0u32;

        while let Some(part) = parts.pop_front() {
            let dir_meta = self.lstat_mounted(&cur).await?;
            if !dir_meta.is_dir() {
                return Err(VfsError::NotADirectory);
            }
            creds.check(&dir_meta, Access::Execute)?;

            let next = path::join(&cur, &part);
            let meta = match self.lstat_mounted(&next).await {
                Ok(meta) => meta,
                Err(VfsError::NotFound) if parts.is_empty() => return Ok(next),
                Err(err) => return Err(err),
            };

            if meta.is_symlink() && (follow_last || !parts.is_empty()) {
                depth += 1;
                if depth > MAX_SYMLINK_DEPTH {
                    return Err(VfsError::SymlinkLoop);
                }
                let target = self.readlink_mounted(&next).await?;
                let spliced = path::absolutize(&cur, &target);
                let mut replacement: VecDeque<String> =
                    path::components(&spliced).map(String::from).collect();
                replacement.extend(parts.drain(..));
                parts = replacement;
                cur = "/".to_string();
            } else {
                cur = next;
            }
        }
        Ok(cur)
    }

    /// Resolves the parent of `p` and checks write+traverse permission on
    /// it, the precondition for creating or removing entries.
    async fn writable_parent(&self, p: &str, creds: &Credentials) -> Result<String> {
        let parent = path::parent(p).to_string();
        let meta = self.lstat_mounted(&parent).await?;
        if !meta.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        creds.check(&meta, Access::Execute)?;
        creds.check(&meta, Access::Write)?;
        Ok(parent)
    }

    pub async fn stat(&self, p: &str, creds: &Credentials) -> Result<Metadata> {
        let resolved = self.resolve(p, creds, true).await?;
        self.lstat_mounted(&resolved).await
    }

    pub async fn lstat(&self, p: &str, creds: &Credentials) -> Result<Metadata> {
        let resolved = self.resolve(p, creds, false).await?;
        self.lstat_mounted(&resolved).await
    }

    /// Target of a symlink. Callers should `lstat` first; a non-symlink is
    /// an explicit error, never a silent pass-through.
    pub async fn readlink(&self, p: &str, creds: &Credentials) -> Result<String> {
        let resolved = self.resolve(p, creds, false).await?;
        self.readlink_mounted(&resolved).await
    }

    pub async fn exists(&self, p: &str, creds: &Credentials) -> bool {
        self.stat(p, creds).await.is_ok()
    }

    pub async fn open(
        &self,
        p: &str,
        flags: OpenFlags,
        creds: &Credentials,
    ) -> Result<Arc<FileHandle>> {
        let resolved = self.resolve(p, creds, true).await?;
        match self.lstat_mounted(&resolved).await {
            Ok(meta) => {
                if meta.is_dir() {
                    return Err(VfsError::IsADirectory);
                }
                if flags.read {
                    creds.check(&meta, Access::Read)?;
                }
                if flags.write {
                    creds.check(&meta, Access::Write)?;
                }
                if flags.truncate && meta.is_file() {
                    let (fs, local) = self.mount_for(&resolved).await?;
                    fs.truncate(&local, 0).await?;
                }
            }
            Err(VfsError::NotFound) if flags.create => {
                self.writable_parent(&resolved, creds).await?;
                let (fs, local) = self.mount_for(&resolved).await?;
                fs.create_file(&local, DEFAULT_FILE_MODE, creds.uid, creds.gid)
                    .await?;
            }
            Err(err) => return Err(err),
        }

        let (fs, local) = self.mount_for(&resolved).await?;
        let fd = self.inner.next_fd.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(FileHandle::new(
            fd, resolved, local, fs, flags, 0,
        )))
    }

    pub async fn read_file(&self, p: &str, creds: &Credentials) -> Result<Vec<u8>> {
        let handle = self.open(p, OpenFlags::read_only(), creds).await?;
        let mut buf = Vec::new();
        loop {
            let chunk = handle.read(READ_FILE_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        let _ = handle.close();
        Ok(buf)
    }

    pub async fn read_to_string(&self, p: &str, creds: &Credentials) -> Result<String> {
        let bytes = self.read_file(p, creds).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn write_file(&self, p: &str, data: &[u8], creds: &Credentials) -> Result<()> {
        let handle = self.open(p, OpenFlags::write_only(), creds).await?;
        handle.write(data).await?;
        let _ = handle.close();
        Ok(())
    }

    pub async fn append_file(&self, p: &str, data: &[u8], creds: &Credentials) -> Result<()> {
        let handle = self.open(p, OpenFlags::append_only(), creds).await?;
        handle.write(data).await?;
        let _ = handle.close();
        Ok(())
    }

    pub async fn mkdir(&self, p: &str, recursive: bool, creds: &Credentials) -> Result<()> {
        if recursive {
            let canonical = path::canonicalize(p)?;
            let mut cur = "/".to_string();
            for part in path::components(&canonical) {
                let next = path::join(&cur, part);
                match self.lstat_mounted(&next).await {
                    Ok(meta) if meta.is_dir() => {}
                    Ok(_) => return Err(VfsError::NotADirectory),
                    Err(VfsError::NotFound) => {
                        self.writable_parent(&next, creds).await?;
                        let (fs, local) = self.mount_for(&next).await?;
                        fs.mkdir(&local, DEFAULT_DIR_MODE, creds.uid, creds.gid)
                            .await?;
                    }
                    Err(err) => return Err(err),
                }
                cur = next;
            }
            return Ok(());
        }

        let resolved = self.resolve(p, creds, true).await?;
        self.writable_parent(&resolved, creds).await?;
        let (fs, local) = self.mount_for(&resolved).await?;
        fs.mkdir(&local, DEFAULT_DIR_MODE, creds.uid, creds.gid).await
    }

    pub async fn rmdir(&self, p: &str, creds: &Credentials) -> Result<()> {
        let resolved = self.resolve(p, creds, false).await?;
        self.writable_parent(&resolved, creds).await?;
        let (fs, local) = self.mount_for(&resolved).await?;
        fs.rmdir(&local).await
    }

    pub async fn unlink(&self, p: &str, creds: &Credentials) -> Result<()> {
        let resolved = self.resolve(p, creds, false).await?;
        self.writable_parent(&resolved, creds).await?;
        let (fs, local) = self.mount_for(&resolved).await?;
        fs.unlink(&local).await
    }

    pub async fn rename(&self, from: &str, to: &str, creds: &Credentials) -> Result<()> {
        let from = self.resolve(from, creds, false).await?;
        let to = self.resolve(to, creds, true).await?;
        self.writable_parent(&from, creds).await?;
        self.writable_parent(&to, creds).await?;
        let (from_fs, from_local) = self.mount_for(&from).await?;
        let (to_fs, to_local) = self.mount_for(&to).await?;
        if !Arc::ptr_eq(&from_fs, &to_fs) {
            return Err(VfsError::CrossDevice);
        }
        from_fs.rename(&from_local, &to_local).await
    }

    pub async fn readdir(&self, p: &str, creds: &Credentials) -> Result<Vec<String>> {
        let resolved = self.resolve(p, creds, true).await?;
        let meta = self.lstat_mounted(&resolved).await?;
        if !meta.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        creds.check(&meta, Access::Read)?;
        let (fs, local) = self.mount_for(&resolved).await?;
        fs.readdir(&local).await
    }

    pub async fn symlink(&self, target: &str, linkpath: &str, creds: &Credentials) -> Result<()> {
        let resolved = self.resolve(linkpath, creds, false).await?;
        self.writable_parent(&resolved, creds).await?;
        let (fs, local) = self.mount_for(&resolved).await?;
        fs.symlink(target, &local, creds.uid, creds.gid).await
    }

    pub async fn chmod(&self, p: &str, mode: u32, creds: &Credentials) -> Result<()> {
        let resolved = self.resolve(p, creds, true).await?;
        let meta = self.lstat_mounted(&resolved).await?;
        if !creds.is_root() && creds.uid != meta.uid {
            return Err(VfsError::PermissionDenied);
        }
        let (fs, local) = self.mount_for(&resolved).await?;
        fs.chmod(&local, mode).await
    }

    pub async fn chown(&self, p: &str, uid: u32, gid: u32, creds: &Credentials) -> Result<()> {
        if !creds.is_root() {
            return Err(VfsError::PermissionDenied);
        }
        let resolved = self.resolve(p, creds, true).await?;
        let (fs, local) = self.mount_for(&resolved).await?;
        fs.chown(&local, uid, gid).await
    }

    pub async fn truncate(&self, p: &str, len: u64, creds: &Credentials) -> Result<()> {
        let resolved = self.resolve(p, creds, true).await?;
        let meta = self.lstat_mounted(&resolved).await?;
        creds.check(&meta, Access::Write)?;
        let (fs, local) = self.mount_for(&resolved).await?;
        fs.truncate(&local, len).await
    }
}

/// A VFS bound to one identity. This is what a shell session and every
/// process sees as "the filesystem".
#[derive(Clone)]
pub struct FsView {
    vfs: Vfs,
    creds: Credentials,
}

impl FsView {
    pub fn credentials(&self) -> &Credentials {
        &self.creds
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub async fn stat(&self, p: &str) -> Result<Metadata> {
        self.vfs.stat(p, &self.creds).await
    }

    pub async fn lstat(&self, p: &str) -> Result<Metadata> {
        self.vfs.lstat(p, &self.creds).await
    }

    pub async fn readlink(&self, p: &str) -> Result<String> {
        self.vfs.readlink(p, &self.creds).await
    }

    pub async fn exists(&self, p: &str) -> bool {
        self.vfs.exists(p, &self.creds).await
    }

    pub async fn open(&self, p: &str, flags: OpenFlags) -> Result<Arc<FileHandle>> {
        self.vfs.open(p, flags, &self.creds).await
    }

    pub async fn read_file(&self, p: &str) -> Result<Vec<u8>> {
        self.vfs.read_file(p, &self.creds).await
    }

    pub async fn read_to_string(&self, p: &str) -> Result<String> {
        self.vfs.read_to_string(p, &self.creds).await
    }

    pub async fn write_file(&self, p: &str, data: &[u8]) -> Result<()> {
        self.vfs.write_file(p, data, &self.creds).await
    }

    pub async fn append_file(&self, p: &str, data: &[u8]) -> Result<()> {
        self.vfs.append_file(p, data, &self.creds).await
    }

    pub async fn mkdir(&self, p: &str, recursive: bool) -> Result<()> {
        self.vfs.mkdir(p, recursive, &self.creds).await
    }

    pub async fn rmdir(&self, p: &str) -> Result<()> {
        self.vfs.rmdir(p, &self.creds).await
    }

    pub async fn unlink(&self, p: &str) -> Result<()> {
        self.vfs.unlink(p, &self.creds).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.vfs.rename(from, to, &self.creds).await
    }

    pub async fn readdir(&self, p: &str) -> Result<Vec<String>> {
        self.vfs.readdir(p, &self.creds).await
    }

    pub async fn symlink(&self, target: &str, linkpath: &str) -> Result<()> {
        self.vfs.symlink(target, linkpath, &self.creds).await
    }

    pub async fn chmod(&self, p: &str, mode: u32) -> Result<()> {
        self.vfs.chmod(p, mode, &self.creds).await
    }

    pub async fn chown(&self, p: &str, uid: u32, gid: u32) -> Result<()> {
        self.vfs.chown(p, uid, gid, &self.creds).await
    }

    pub async fn truncate(&self, p: &str, len: u64) -> Result<()> {
        self.vfs.truncate(p, len, &self.creds).await
    }
}
