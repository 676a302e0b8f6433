//! The virtual filesystem: a mount table of [`FileSystem`] backends under a
//! unified path namespace, with POSIX-shaped async operations, permission
//! checks, symlink resolution, device files and open-handle bookkeeping.

#![deny(clippy::print_stdout, clippy::print_stderr)]

mod backend;
mod device;
mod error;
mod handle;
mod memfs;
pub mod path;
pub mod sysfiles;
mod types;
mod vfs;

pub use backend::FileSystem;
pub use device::DevFs;
pub use device::DeviceDriver;
pub use device::FullDevice;
pub use device::NullDevice;
pub use device::RandomDevice;
pub use device::ZeroDevice;
pub use error::Result;
pub use error::VfsError;
pub use handle::FileHandle;
pub use memfs::MemFs;
pub use types::Access;
pub use types::Credentials;
pub use types::FileType;
pub use types::Metadata;
pub use types::OpenFlags;
pub use vfs::FsView;
pub use vfs::Vfs;
