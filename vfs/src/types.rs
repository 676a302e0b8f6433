use std::time::SystemTime;

use crate::Result;
use crate::VfsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    /// The `ls -l` type column character.
    pub fn as_char(&self) -> char {
        match self {
            FileType::File => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::BlockDevice => 'b',
            FileType::CharDevice => 'c',
            FileType::Fifo => 'p',
            FileType::Socket => 's',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_type: FileType,
    /// Permission bits, `0o777` space.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: SystemTime,
    pub nlink: u32,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    pub fn is_device(&self) -> bool {
        matches!(
            self.file_type,
            FileType::BlockDevice | FileType::CharDevice
        )
    }

    /// `rwxr-xr-x`-style permission string.
    pub fn mode_string(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(self.file_type.as_char());
        for shift in [6u32, 3, 0] {
            let triad = (self.mode >> shift) & 0o7;
            out.push(if triad & 0o4 != 0 { 'r' } else { '-' });
            out.push(if triad & 0o2 != 0 { 'w' } else { '-' });
            out.push(if triad & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }
}

/// What an operation wants to do with a node; checked against mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    fn bit(self) -> u32 {
        match self {
            Access::Read => 0o4,
            Access::Write => 0o2,
            Access::Execute => 0o1,
        }
    }
}

/// The identity an operation runs as. uid 0 bypasses permission checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
}

impl Credentials {
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            groups: Vec::new(),
        }
    }

    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            groups: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }

    /// Checks `access` against `meta`'s mode bits for this identity.
    pub fn check(&self, meta: &Metadata, access: Access) -> Result<()> {
        if self.is_root() {
            return Ok(());
        }
        let shift = if self.uid == meta.uid {
            6
        } else if self.in_group(meta.gid) {
            3
        } else {
            0
        };
        if (meta.mode >> shift) & access.bit() != 0 {
            Ok(())
        } else {
            Err(VfsError::PermissionDenied)
        }
    }
}

/// Open disposition, modeled on the `fs.promises` flag strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            truncate: true,
            create: true,
            ..Self::default()
        }
    }

    pub fn append_only() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Self::default()
        }
    }

    /// Parses `r`, `r+`, `w`, `w+`, `a`, `a+`.
    pub fn parse(flags: &str) -> Result<Self> {
        match flags {
            "r" => Ok(Self::read_only()),
            "r+" => Ok(Self {
                read: true,
                write: true,
                ..Self::default()
            }),
            "w" => Ok(Self::write_only()),
            "w+" => Ok(Self {
                read: true,
                ..Self::write_only()
            }),
            "a" => Ok(Self::append_only()),
            "a+" => Ok(Self {
                read: true,
                ..Self::append_only()
            }),
            other => Err(VfsError::InvalidPath(format!("bad open flags: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn meta(mode: u32, uid: u32, gid: u32) -> Metadata {
        Metadata {
            file_type: FileType::File,
            mode,
            uid,
            gid,
            size: 0,
            mtime: SystemTime::UNIX_EPOCH,
            nlink: 1,
        }
    }

    #[test]
    fn permission_triads() {
        let owner = Credentials::new(1000, 1000);
        let group = Credentials::new(1001, 1000);
        let other = Credentials::new(1002, 1002);
        let m = meta(0o640, 1000, 1000);

        assert!(owner.check(&m, Access::Write).is_ok());
        assert!(group.check(&m, Access::Read).is_ok());
        assert_eq!(
            group.check(&m, Access::Write),
            Err(VfsError::PermissionDenied)
        );
        assert_eq!(
            other.check(&m, Access::Read),
            Err(VfsError::PermissionDenied)
        );
    }

    #[test]
    fn root_bypasses_mode_bits() {
        let m = meta(0o000, 1000, 1000);
        assert!(Credentials::root().check(&m, Access::Write).is_ok());
    }

    #[test]
    fn mode_string_rendering() {
        assert_eq!(meta(0o755, 0, 0).mode_string(), "-rwxr-xr-x");
        assert_eq!(meta(0o640, 0, 0).mode_string(), "-rw-r-----");
    }

    #[test]
    fn flag_strings() {
        assert_eq!(OpenFlags::parse("r").expect("r"), OpenFlags::read_only());
        let a_plus = OpenFlags::parse("a+").expect("a+");
        assert!(a_plus.read && a_plus.write && a_plus.append && a_plus.create);
        assert!(OpenFlags::parse("x").is_err());
    }
}
