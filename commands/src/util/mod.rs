//! The core utility set registered at boot.

mod fsops;
mod net;
mod sys;
mod text;

use std::sync::Arc;

use coral_streams::LineReader;
use coral_vfs::FileHandle;
use coral_vfs::OpenFlags;

use crate::Command;
use crate::Invocation;

/// Everything `CommandRegistry::standard` registers.
pub fn standard_commands() -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(text::Cat),
        Arc::new(text::Diff),
        Arc::new(text::Echo),
        Arc::new(text::Grep),
        Arc::new(text::Head),
        Arc::new(text::Tail),
        Arc::new(text::Wc),
        Arc::new(fsops::Cp),
        Arc::new(fsops::Ls),
        Arc::new(fsops::Mkdir),
        Arc::new(fsops::Mv),
        Arc::new(fsops::Rm),
        Arc::new(fsops::Rmdir),
        Arc::new(fsops::Touch),
        Arc::new(net::Nc),
        Arc::new(sys::Clear),
        Arc::new(sys::EnvCmd),
        Arc::new(sys::False),
        Arc::new(sys::Kill),
        Arc::new(sys::Ps),
        Arc::new(sys::Sleep),
        Arc::new(sys::True),
        Arc::new(sys::UserCommand),
        Arc::new(sys::Which),
    ]
}

/// Locks stdin into a line reader; `None` when the command has no stdin or
/// it is already locked.
pub(crate) fn stdin_lines(inv: &Invocation) -> Option<LineReader> {
    let stream = inv.stdin.as_ref()?;
    let reader = stream.lock().ok()?;
    Some(LineReader::new(reader))
}

/// Opens a file operand for line-wise reading through the process (so the
/// handle is tracked and cleaned up with it).
pub(crate) async fn file_lines(
    inv: &Invocation,
    operand: &str,
) -> coral_proc::Result<(Arc<FileHandle>, LineReader)> {
    let handle = inv
        .process
        .open(&inv.resolve(operand), OpenFlags::read_only())
        .await?;
    let stream = handle.reader_stream();
    let reader = stream
        .lock()
        .map_err(|_| coral_proc::ProcError::Vfs(coral_vfs::VfsError::BadFileDescriptor))?;
    Ok((handle, LineReader::new(reader)))
}
