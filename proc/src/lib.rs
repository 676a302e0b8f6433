//! Process model: FD tables, process lifecycle and the process manager.

#![deny(clippy::print_stdout, clippy::print_stderr)]

mod cancel;
mod error;
mod fd_table;
mod manager;
mod process;

pub use cancel::CancelToken;
pub use error::ProcError;
pub use error::Result;
pub use fd_table::FdTable;
pub use manager::ProcessManager;
pub use manager::ProcessOptions;
pub use process::INTERRUPT_EXIT_CODE;
pub use process::Pid;
pub use process::Process;
pub use process::ProcessEntry;
pub use process::ProcessEntryParams;
pub use process::ProcessEvent;
pub use process::ProcessStatus;
