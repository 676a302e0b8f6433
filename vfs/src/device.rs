//! Device files and the `/dev` filesystem.
//!
//! A device driver is a byte source/sink registered under a name; the
//! [`DevFs`] backend exposes the registry as character-device nodes, so
//! `cat /dev/zero` and `> /dev/null` go through the ordinary open/read/write
//! path with no special cases above the mount.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;
use tokio::sync::RwLock;

use crate::FileSystem;
use crate::FileType;
use crate::Metadata;
use crate::Result;
use crate::VfsError;
use crate::path;

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Produces up to `len` bytes. An empty chunk means end-of-stream.
    async fn read(&self, len: usize) -> Result<Bytes>;

    /// Consumes `data`, returning the number of bytes accepted.
    async fn write(&self, data: &[u8]) -> Result<usize>;
}

/// `/dev/null`: reads are instant EOF, writes vanish.
pub struct NullDevice;

#[async_trait]
impl DeviceDriver for NullDevice {
    async fn read(&self, _len: usize) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        Ok(data.len())
    }
}

/// `/dev/zero`: an endless run of zero bytes.
pub struct ZeroDevice;

#[async_trait]
impl DeviceDriver for ZeroDevice {
    async fn read(&self, len: usize) -> Result<Bytes> {
        Ok(Bytes::from(vec![0u8; len.min(64 * 1024)]))
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        Ok(data.len())
    }
}

/// `/dev/full`: reads like zero, writes always fail with `NoSpace`.
pub struct FullDevice;

#[async_trait]
impl DeviceDriver for FullDevice {
    async fn read(&self, len: usize) -> Result<Bytes> {
        Ok(Bytes::from(vec![0u8; len.min(64 * 1024)]))
    }

    async fn write(&self, _data: &[u8]) -> Result<usize> {
        Err(VfsError::NoSpace)
    }
}

/// `/dev/random` and `/dev/urandom` (no entropy accounting here, so the two
/// behave identically).
pub struct RandomDevice;

#[async_trait]
impl DeviceDriver for RandomDevice {
    async fn read(&self, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len.min(64 * 1024)];
        rand::rng().fill_bytes(&mut buf);
        Ok(Bytes::from(buf))
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        Ok(data.len())
    }
}

/// The `/dev` mount: a flat directory of character devices backed by the
/// driver registry.
#[derive(Default)]
pub struct DevFs {
    drivers: RwLock<BTreeMap<String, Arc<dyn DeviceDriver>>>,
}

impl DevFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the standard device set.
    pub async fn with_standard_devices() -> Self {
        let devfs = Self::new();
        devfs.register("null", Arc::new(NullDevice)).await;
        devfs.register("zero", Arc::new(ZeroDevice)).await;
        devfs.register("full", Arc::new(FullDevice)).await;
        devfs.register("random", Arc::new(RandomDevice)).await;
        devfs.register("urandom", Arc::new(RandomDevice)).await;
        devfs
    }

    pub async fn register(&self, name: &str, driver: Arc<dyn DeviceDriver>) {
        self.drivers.write().await.insert(name.to_string(), driver);
    }

    pub async fn unregister(&self, name: &str) {
        self.drivers.write().await.remove(name);
    }

    async fn driver(&self, p: &str) -> Result<Arc<dyn DeviceDriver>> {
        let name = path::file_name(p);
        self.drivers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or(VfsError::NotFound)
    }

    fn device_metadata() -> Metadata {
        Metadata {
            file_type: FileType::CharDevice,
            mode: 0o666,
            uid: 0,
            gid: 0,
            size: 0,
            mtime: SystemTime::UNIX_EPOCH,
            nlink: 1,
        }
    }
}

#[async_trait]
impl FileSystem for DevFs {
    async fn lstat(&self, p: &str) -> Result<Metadata> {
        if p == "/" {
            return Ok(Metadata {
                file_type: FileType::Directory,
                mode: 0o755,
                uid: 0,
                gid: 0,
                size: 0,
                mtime: SystemTime::UNIX_EPOCH,
                nlink: 2,
            });
        }
        self.driver(p).await?;
        Ok(Self::device_metadata())
    }

    async fn readlink(&self, p: &str) -> Result<String> {
        self.driver(p).await?;
        Err(VfsError::NotASymlink)
    }

    async fn read_at(&self, p: &str, _pos: u64, len: usize) -> Result<Bytes> {
        self.driver(p).await?.read(len).await
    }

    async fn write_at(&self, p: &str, _pos: u64, data: &[u8], _append: bool) -> Result<usize> {
        self.driver(p).await?.write(data).await
    }

    async fn truncate(&self, p: &str, _len: u64) -> Result<()> {
        self.driver(p).await?;
        Ok(())
    }

    async fn create_file(&self, _p: &str, _mode: u32, _uid: u32, _gid: u32) -> Result<()> {
        Err(VfsError::PermissionDenied)
    }

    async fn mkdir(&self, _p: &str, _mode: u32, _uid: u32, _gid: u32) -> Result<()> {
        Err(VfsError::PermissionDenied)
    }

    async fn rmdir(&self, _p: &str) -> Result<()> {
        Err(VfsError::PermissionDenied)
    }

    async fn unlink(&self, _p: &str) -> Result<()> {
        Err(VfsError::PermissionDenied)
    }

    async fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        Err(VfsError::PermissionDenied)
    }

    async fn readdir(&self, p: &str) -> Result<Vec<String>> {
        if p != "/" {
            return Err(VfsError::NotADirectory);
        }
        Ok(self.drivers.read().await.keys().cloned().collect())
    }

    async fn symlink(&self, _target: &str, _p: &str, _uid: u32, _gid: u32) -> Result<()> {
        Err(VfsError::PermissionDenied)
    }

    async fn chmod(&self, _p: &str, _mode: u32) -> Result<()> {
        Ok(())
    }

    async fn chown(&self, _p: &str, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn null_is_instant_eof() {
        let devfs = DevFs::with_standard_devices().await;
        let bytes = devfs.read_at("/null", 0, 4096).await.expect("read");
        assert!(bytes.is_empty());
        assert_eq!(devfs.write_at("/null", 0, b"gone", false).await, Ok(4));
    }

    #[tokio::test]
    async fn zero_yields_zeroes_and_full_rejects_writes() {
        let devfs = DevFs::with_standard_devices().await;
        let bytes = devfs.read_at("/zero", 0, 8).await.expect("read");
        assert_eq!(&bytes[..], &[0u8; 8]);
        assert_eq!(
            devfs.write_at("/full", 0, b"x", false).await,
            Err(VfsError::NoSpace)
        );
    }

    #[tokio::test]
    async fn registry_drives_readdir() {
        let devfs = DevFs::with_standard_devices().await;
        let names = devfs.readdir("/").await.expect("readdir");
        assert_eq!(names, vec!["full", "null", "random", "urandom", "zero"]);
        assert_eq!(
            devfs.read_at("/missing", 0, 1).await,
            Err(VfsError::NotFound)
        );
    }
}
