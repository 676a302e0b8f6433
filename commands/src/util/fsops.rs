//! Filesystem manipulation commands.

use async_trait::async_trait;
use coral_vfs::Metadata;
use coral_vfs::VfsError;

use crate::Command;
use crate::Invocation;
use crate::args::OptSpec;

pub struct Ls;

#[async_trait]
impl Command for Ls {
    fn name(&self) -> &'static str {
        "ls"
    }

    fn description(&self) -> &'static str {
        "List directory contents"
    }

    fn usage_line(&self) -> &'static str {
        "[-la] [PATH]..."
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[
            OptSpec::flag("long", 'l', "long listing"),
            OptSpec::flag("all", 'a', "include entries starting with ."),
        ];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let mut operands = inv.args.positionals().to_vec();
        if operands.is_empty() {
            operands.push(".".to_string());
        }
        let show_headers = operands.len() > 1;
        let mut status = 0;

        for (idx, operand) in operands.iter().enumerate() {
            let full = inv.resolve(operand);
            let meta = match inv.fs().stat(&full).await {
                Ok(meta) => meta,
                Err(err) => {
                    inv.writeln_stderr(&format!("ls: {operand}: {err}")).await;
                    status = 1;
                    continue;
                }
            };

            if show_headers {
                if idx > 0 {
                    inv.writeln_stdout("").await;
                }
                inv.writeln_stdout(&format!("{operand}:")).await;
            }

            if !meta.is_dir() {
                self.emit(inv, operand, &meta).await;
                continue;
            }

            let names = match inv.fs().readdir(&full).await {
                Ok(names) => names,
                Err(err) => {
                    inv.writeln_stderr(&format!("ls: {operand}: {err}")).await;
                    status = 1;
                    continue;
                }
            };
            for name in names {
                if !inv.args.has("all") && name.starts_with('.') {
                    continue;
                }
                if inv.args.has("long") {
                    let child = format!("{full}/{name}");
                    match inv.fs().lstat(&child).await {
                        Ok(meta) => self.emit(inv, &name, &meta).await,
                        Err(_) => inv.writeln_stdout(&name).await,
                    }
                } else {
                    inv.writeln_stdout(&name).await;
                }
            }
        }
        Ok(status)
    }
}

impl Ls {
    async fn emit(&self, inv: &Invocation, name: &str, meta: &Metadata) {
        if !inv.args.has("long") {
            inv.writeln_stdout(name).await;
            return;
        }
        let owner = match inv.services.users.get_by_uid(meta.uid).await {
            Some(user) => user.username,
            None => meta.uid.to_string(),
        };
        inv.writeln_stdout(&format!(
            "{} {:>2} {:<8} {:>8} {}",
            meta.mode_string(),
            meta.nlink,
            owner,
            meta.size,
            name
        ))
        .await;
    }
}

pub struct Mkdir;

#[async_trait]
impl Command for Mkdir {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    fn description(&self) -> &'static str {
        "Create directories"
    }

    fn usage_line(&self) -> &'static str {
        "[-p] DIRECTORY..."
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[OptSpec::flag("parents", 'p', "create missing parents, tolerate existing")];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        if operands.is_empty() {
            inv.writeln_stderr("mkdir: missing operand").await;
            return Ok(2);
        }
        let recursive = inv.args.has("parents");
        let mut status = 0;
        for operand in &operands {
            match inv.fs().mkdir(&inv.resolve(operand), recursive).await {
                Ok(()) => {}
                Err(VfsError::AlreadyExists) if recursive => {}
                Err(err) => {
                    inv.writeln_stderr(&format!("mkdir: {operand}: {err}")).await;
                    status = 1;
                }
            }
        }
        Ok(status)
    }
}

pub struct Rmdir;

#[async_trait]
impl Command for Rmdir {
    fn name(&self) -> &'static str {
        "rmdir"
    }

    fn description(&self) -> &'static str {
        "Remove empty directories"
    }

    fn usage_line(&self) -> &'static str {
        "DIRECTORY..."
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        if operands.is_empty() {
            inv.writeln_stderr("rmdir: missing operand").await;
            return Ok(2);
        }
        let mut status = 0;
        for operand in &operands {
            if let Err(err) = inv.fs().rmdir(&inv.resolve(operand)).await {
                inv.writeln_stderr(&format!("rmdir: {operand}: {err}")).await;
                status = 1;
            }
        }
        Ok(status)
    }
}

pub struct Rm;

#[async_trait]
impl Command for Rm {
    fn name(&self) -> &'static str {
        "rm"
    }

    fn description(&self) -> &'static str {
        "Remove files and directories"
    }

    fn usage_line(&self) -> &'static str {
        "[-rf] PATH..."
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[
            OptSpec::flag("recursive", 'r', "remove directories and their contents"),
            OptSpec::flag("force", 'f', "ignore missing operands"),
        ];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        if operands.is_empty() {
            inv.writeln_stderr("rm: missing operand").await;
            return Ok(2);
        }
        let recursive = inv.args.has("recursive");
        let force = inv.args.has("force");
        let mut status = 0;
        for operand in &operands {
            match remove(inv, &inv.resolve(operand), recursive).await {
                Ok(()) => {}
                Err(VfsError::NotFound) if force => {}
                Err(err) => {
                    inv.writeln_stderr(&format!("rm: {operand}: {err}")).await;
                    status = 1;
                }
            }
        }
        Ok(status)
    }
}

/// Depth-first removal; plain files unlink, directories need `recursive`.
async fn remove(
    inv: &Invocation,
    path: &str,
    recursive: bool,
) -> std::result::Result<(), VfsError> {
    let meta = inv.fs().lstat(path).await?;
    if !meta.is_dir() {
        return inv.fs().unlink(path).await;
    }
    if !recursive {
        return Err(VfsError::IsADirectory);
    }
    let mut stack = vec![path.to_string()];
    let mut dirs = Vec::new();
    while let Some(dir) = stack.pop() {
        for name in inv.fs().readdir(&dir).await? {
            let child = format!("{dir}/{name}");
            let child_meta = inv.fs().lstat(&child).await?;
            if child_meta.is_dir() {
                stack.push(child);
            } else {
                inv.fs().unlink(&child).await?;
            }
        }
        dirs.push(dir);
    }
    // Children first.
    for dir in dirs.into_iter().rev() {
        inv.fs().rmdir(&dir).await?;
    }
    Ok(())
}

pub struct Touch;

#[async_trait]
impl Command for Touch {
    fn name(&self) -> &'static str {
        "touch"
    }

    fn description(&self) -> &'static str {
        "Create files or update their timestamps"
    }

    fn usage_line(&self) -> &'static str {
        "FILE..."
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        if operands.is_empty() {
            inv.writeln_stderr("touch: missing operand").await;
            return Ok(2);
        }
        let mut status = 0;
        for operand in &operands {
            // Appending nothing creates the file or bumps its mtime.
            if let Err(err) = inv.fs().append_file(&inv.resolve(operand), b"").await {
                inv.writeln_stderr(&format!("touch: {operand}: {err}")).await;
                status = 1;
            }
        }
        Ok(status)
    }
}

pub struct Cp;

#[async_trait]
impl Command for Cp {
    fn name(&self) -> &'static str {
        "cp"
    }

    fn description(&self) -> &'static str {
        "Copy files and directories"
    }

    fn usage_line(&self) -> &'static str {
        "[-r] SOURCE DEST"
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[OptSpec::flag("recursive", 'r', "copy directories recursively")];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let positionals = inv.args.positionals().to_vec();
        let [source, dest] = positionals.as_slice() else {
            inv.writeln_stderr("cp: expected SOURCE and DEST").await;
            return Ok(2);
        };
        let from = inv.resolve(source);
        let to = resolve_dest(inv, &from, dest).await;
        match copy_tree(inv, &from, &to, inv.args.has("recursive")).await {
            Ok(()) => Ok(0),
            Err(err) => {
                inv.writeln_stderr(&format!("cp: {source}: {err}")).await;
                Ok(1)
            }
        }
    }
}

/// `cp x dir` targets `dir/x`.
async fn resolve_dest(inv: &Invocation, from: &str, dest: &str) -> String {
    let to = inv.resolve(dest);
    match inv.fs().stat(&to).await {
        Ok(meta) if meta.is_dir() => {
            format!("{to}/{}", coral_vfs::path::file_name(from))
        }
        _ => to,
    }
}

async fn copy_tree(
    inv: &Invocation,
    from: &str,
    to: &str,
    recursive: bool,
) -> std::result::Result<(), VfsError> {
    let meta = inv.fs().stat(from).await?;
    if meta.is_dir() {
        if !recursive {
            return Err(VfsError::IsADirectory);
        }
        match inv.fs().mkdir(to, false).await {
            Ok(()) | Err(VfsError::AlreadyExists) => {}
            Err(err) => return Err(err),
        }
        for name in inv.fs().readdir(from).await? {
            Box::pin(copy_tree(
                inv,
                &format!("{from}/{name}"),
                &format!("{to}/{name}"),
                true,
            ))
            .await?;
        }
        return Ok(());
    }
    let bytes = inv.fs().read_file(from).await?;
    inv.fs().write_file(to, &bytes).await
}

pub struct Mv;

#[async_trait]
impl Command for Mv {
    fn name(&self) -> &'static str {
        "mv"
    }

    fn description(&self) -> &'static str {
        "Move (rename) files and directories"
    }

    fn usage_line(&self) -> &'static str {
        "SOURCE DEST"
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let positionals = inv.args.positionals().to_vec();
        let [source, dest] = positionals.as_slice() else {
            inv.writeln_stderr("mv: expected SOURCE and DEST").await;
            return Ok(2);
        };
        let from = inv.resolve(source);
        let to = resolve_dest(inv, &from, dest).await;
        match inv.fs().rename(&from, &to).await {
            Ok(()) => Ok(0),
            // Across mounts: fall back to copy + remove.
            Err(VfsError::CrossDevice) => {
                match copy_tree(inv, &from, &to, true).await {
                    Ok(()) => match remove(inv, &from, true).await {
                        Ok(()) => Ok(0),
                        Err(err) => {
                            inv.writeln_stderr(&format!("mv: {source}: {err}")).await;
                            Ok(1)
                        }
                    },
                    Err(err) => {
                        inv.writeln_stderr(&format!("mv: {source}: {err}")).await;
                        Ok(1)
                    }
                }
            }
            Err(err) => {
                inv.writeln_stderr(&format!("mv: {source}: {err}")).await;
                Ok(1)
            }
        }
    }
}
