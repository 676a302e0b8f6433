//! Text and stream filters.

use async_trait::async_trait;
use coral_proc::INTERRUPT_EXIT_CODE;
use coral_vfs::OpenFlags;
use regex_lite::Regex;

use crate::Command;
use crate::Invocation;
use crate::args::OptSpec;
use crate::util::file_lines;
use crate::util::stdin_lines;

pub struct Echo;

#[async_trait]
impl Command for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn description(&self) -> &'static str {
        "Write arguments to standard output"
    }

    fn usage_line(&self) -> &'static str {
        "[-n] [STRING]..."
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[OptSpec::flag("no-newline", 'n', "do not emit a trailing newline")];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let joined = inv.args.positionals().join(" ");
        let text = unescape(&joined);
        if inv.args.has("no-newline") {
            inv.write_stdout(&text).await;
        } else {
            inv.write_stdout(&format!("{text}\n")).await;
        }
        Ok(0)
    }
}

/// `\n`, `\t` and `\\` in echo arguments become the real characters.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

pub struct Cat;

#[async_trait]
impl Command for Cat {
    fn name(&self) -> &'static str {
        "cat"
    }

    fn description(&self) -> &'static str {
        "Concatenate files (or standard input) to standard output"
    }

    fn usage_line(&self) -> &'static str {
        "[FILE]..."
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        let Some(mut writer) = inv.stdout_writer() else {
            return Ok(0);
        };

        if operands.is_empty() {
            let Some(stdin) = &inv.stdin else {
                return Ok(0);
            };
            let mut reader = match stdin.lock() {
                Ok(reader) => reader,
                Err(_) => return Ok(0),
            };
            while let Some(chunk) = reader.read().await {
                if inv.cancel.is_cancelled() {
                    return Ok(INTERRUPT_EXIT_CODE);
                }
                if writer.write(chunk).await.is_err() {
                    // Downstream hung up; that is how pipelines end us.
                    return Ok(0);
                }
            }
            return Ok(0);
        }

        for operand in &operands {
            let handle = match inv
                .process
                .open(&inv.resolve(operand), OpenFlags::read_only())
                .await
            {
                Ok(handle) => handle,
                Err(err) => {
                    drop(writer);
                    inv.writeln_stderr(&format!("cat: {operand}: {err}")).await;
                    return Ok(1);
                }
            };
            loop {
                if inv.cancel.is_cancelled() {
                    let _ = inv.process.close(&handle).await;
                    return Ok(INTERRUPT_EXIT_CODE);
                }
                let chunk = match handle.read(16 * 1024).await {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        drop(writer);
                        let _ = inv.process.close(&handle).await;
                        inv.writeln_stderr(&format!("cat: {operand}: {err}")).await;
                        return Ok(1);
                    }
                };
                if chunk.is_empty() {
                    break;
                }
                if writer.write(chunk).await.is_err() {
                    let _ = inv.process.close(&handle).await;
                    return Ok(0);
                }
            }
            let _ = inv.process.close(&handle).await;
        }
        Ok(0)
    }
}

pub struct Head;

#[async_trait]
impl Command for Head {
    fn name(&self) -> &'static str {
        "head"
    }

    fn description(&self) -> &'static str {
        "Output the first lines (or bytes) of input"
    }

    fn usage_line(&self) -> &'static str {
        "[-n LINES | -c BYTES] [FILE]..."
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[
            OptSpec::value("lines", 'n', "number of lines to print (default 10)"),
            OptSpec::value("bytes", 'c', "number of bytes to print (accepts K/M/G suffixes)"),
        ];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        if let Some(spec) = inv.args.value("bytes") {
            let Some(limit) = parse_size(spec) else {
                inv.writeln_stderr(&format!("head: invalid byte count: {spec}")).await;
                return Ok(1);
            };
            return self.head_bytes(inv, limit).await;
        }

        let count: usize = match inv.args.value("lines") {
            Some(spec) => match spec.parse() {
                Ok(count) => count,
                Err(_) => {
                    inv.writeln_stderr(&format!("head: invalid line count: {spec}")).await;
                    return Ok(1);
                }
            },
            None => 10,
        };

        let operands = inv.args.positionals().to_vec();
        if operands.is_empty() {
            let Some(mut lines) = stdin_lines(inv) else {
                return Ok(0);
            };
            let mut taken = 0;
            while taken < count {
                if inv.cancel.is_cancelled() {
                    return Ok(INTERRUPT_EXIT_CODE);
                }
                match lines.next_line().await {
                    Some(line) => {
                        inv.writeln_stdout(&line).await;
                        taken += 1;
                    }
                    None => break,
                }
            }
            return Ok(0);
        }

        for operand in &operands {
            let (handle, mut lines) = match file_lines(inv, operand).await {
                Ok(opened) => opened,
                Err(err) => {
                    inv.writeln_stderr(&format!("head: {operand}: {err}")).await;
                    return Ok(1);
                }
            };
            let mut taken = 0;
            while taken < count {
                match lines.next_line().await {
                    Some(line) => {
                        inv.writeln_stdout(&line).await;
                        taken += 1;
                    }
                    None => break,
                }
            }
            let _ = inv.process.close(&handle).await;
        }
        Ok(0)
    }
}

impl Head {
    async fn head_bytes(&self, inv: &mut Invocation, limit: u64) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        if let Some(operand) = operands.first() {
            let handle = match inv
                .process
                .open(&inv.resolve(operand), OpenFlags::read_only())
                .await
            {
                Ok(handle) => handle,
                Err(err) => {
                    inv.writeln_stderr(&format!("head: {operand}: {err}")).await;
                    return Ok(1);
                }
            };
            let Some(mut writer) = inv.stdout_writer() else {
                return Ok(0);
            };
            let mut remaining = limit;
            while remaining > 0 {
                if inv.cancel.is_cancelled() {
                    let _ = inv.process.close(&handle).await;
                    return Ok(INTERRUPT_EXIT_CODE);
                }
                let want = remaining.min(16 * 1024) as usize;
                let chunk = match handle.read(want).await {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                };
                if chunk.is_empty() {
                    break;
                }
                remaining -= chunk.len() as u64;
                if writer.write(chunk).await.is_err() {
                    break;
                }
            }
            let _ = inv.process.close(&handle).await;
            return Ok(0);
        }

        let Some(mut writer) = inv.stdout_writer() else {
            return Ok(0);
        };
        let Some(stdin) = &inv.stdin else {
            return Ok(0);
        };
        let mut reader = match stdin.lock() {
            Ok(reader) => reader,
            Err(_) => return Ok(0),
        };
        let mut remaining = limit;
        while remaining > 0 {
            if inv.cancel.is_cancelled() {
                return Ok(INTERRUPT_EXIT_CODE);
            }
            let Some(chunk) = reader.read().await else {
                break;
            };
            let take = (chunk.len() as u64).min(remaining) as usize;
            if writer.write(chunk.slice(..take)).await.is_err() {
                return Ok(0);
            }
            remaining -= take as u64;
        }
        // Hang up on the producer so upstream stages can finish.
        reader.cancel();
        Ok(0)
    }
}

fn parse_size(spec: &str) -> Option<u64> {
    let (digits, multiplier) = match spec.chars().last()? {
        'K' | 'k' => (&spec[..spec.len() - 1], 1024),
        'M' | 'm' => (&spec[..spec.len() - 1], 1024 * 1024),
        'G' | 'g' => (&spec[..spec.len() - 1], 1024 * 1024 * 1024),
        _ => (spec, 1),
    };
    digits.parse::<u64>().ok().map(|n| n * multiplier)
}

pub struct Tail;

#[async_trait]
impl Command for Tail {
    fn name(&self) -> &'static str {
        "tail"
    }

    fn description(&self) -> &'static str {
        "Output the last lines of input"
    }

    fn usage_line(&self) -> &'static str {
        "[-n LINES] [FILE]..."
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[OptSpec::value("lines", 'n', "number of lines to keep (default 10)")];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let count: usize = match inv.args.value("lines") {
            Some(spec) => match spec.parse() {
                Ok(count) => count,
                Err(_) => {
                    inv.writeln_stderr(&format!("tail: invalid line count: {spec}")).await;
                    return Ok(1);
                }
            },
            None => 10,
        };

        let operands = inv.args.positionals().to_vec();
        let mut kept = std::collections::VecDeque::with_capacity(count + 1);
        if operands.is_empty() {
            let Some(mut lines) = stdin_lines(inv) else {
                return Ok(0);
            };
            while let Some(line) = lines.next_line().await {
                if inv.cancel.is_cancelled() {
                    return Ok(INTERRUPT_EXIT_CODE);
                }
                kept.push_back(line);
                if kept.len() > count {
                    kept.pop_front();
                }
            }
        } else {
            for operand in &operands {
                let (handle, mut lines) = match file_lines(inv, operand).await {
                    Ok(opened) => opened,
                    Err(err) => {
                        inv.writeln_stderr(&format!("tail: {operand}: {err}")).await;
                        return Ok(1);
                    }
                };
                while let Some(line) = lines.next_line().await {
                    kept.push_back(line);
                    if kept.len() > count {
                        kept.pop_front();
                    }
                }
                let _ = inv.process.close(&handle).await;
            }
        }
        for line in kept {
            inv.writeln_stdout(&line).await;
        }
        Ok(0)
    }
}

pub struct Wc;

#[async_trait]
impl Command for Wc {
    fn name(&self) -> &'static str {
        "wc"
    }

    fn description(&self) -> &'static str {
        "Count lines, words and bytes"
    }

    fn usage_line(&self) -> &'static str {
        "[-lwc] [FILE]..."
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[
            OptSpec::flag("lines", 'l', "print the line count"),
            OptSpec::flag("words", 'w', "print the word count"),
            OptSpec::flag("bytes", 'c', "print the byte count"),
        ];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let operands = inv.args.positionals().to_vec();
        let content = if operands.is_empty() {
            let Some(stdin) = &inv.stdin else {
                return Ok(0);
            };
            match stdin.lock() {
                Ok(mut reader) => coral_streams::collect(&mut reader).await,
                Err(_) => Vec::new(),
            }
        } else {
            let mut all = Vec::new();
            for operand in &operands {
                match inv.fs().read_file(&inv.resolve(operand)).await {
                    Ok(bytes) => all.extend_from_slice(&bytes),
                    Err(err) => {
                        inv.writeln_stderr(&format!("wc: {operand}: {err}")).await;
                        return Ok(1);
                    }
                }
            }
            all
        };

        let text = String::from_utf8_lossy(&content);
        let lines = text.lines().count();
        let words = text.split_whitespace().count();
        let bytes = content.len();

        let show_lines = inv.args.has("lines");
        let show_words = inv.args.has("words");
        let show_bytes = inv.args.has("bytes");
        let show_all = !show_lines && !show_words && !show_bytes;

        let mut parts = Vec::new();
        if show_lines || show_all {
            parts.push(lines.to_string());
        }
        if show_words || show_all {
            parts.push(words.to_string());
        }
        if show_bytes || show_all {
            parts.push(bytes.to_string());
        }
        inv.writeln_stdout(&parts.join(" ")).await;
        Ok(0)
    }
}

pub struct Grep;

#[async_trait]
impl Command for Grep {
    fn name(&self) -> &'static str {
        "grep"
    }

    fn description(&self) -> &'static str {
        "Print lines matching a pattern"
    }

    fn usage_line(&self) -> &'static str {
        "[-inv] PATTERN [FILE]..."
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[
            OptSpec::flag("ignore-case", 'i', "case-insensitive matching"),
            OptSpec::flag("line-number", 'n', "prefix matches with line numbers"),
            OptSpec::flag("invert-match", 'v', "select non-matching lines"),
        ];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let positionals = inv.args.positionals().to_vec();
        let Some(pattern) = positionals.first() else {
            inv.writeln_stderr("grep: missing pattern").await;
            return Ok(2);
        };
        let source = if inv.args.has("ignore-case") {
            format!("(?i){pattern}")
        } else {
            pattern.clone()
        };
        let regex = match Regex::new(&source) {
            Ok(regex) => regex,
            Err(err) => {
                inv.writeln_stderr(&format!("grep: invalid pattern: {err}")).await;
                return Ok(2);
            }
        };

        let invert = inv.args.has("invert-match");
        let numbered = inv.args.has("line-number");
        let files = &positionals[1..];
        let mut matched = false;

        if files.is_empty() {
            let Some(mut lines) = stdin_lines(inv) else {
                return Ok(1);
            };
            let mut number = 0;
            while let Some(line) = lines.next_line().await {
                if inv.cancel.is_cancelled() {
                    return Ok(INTERRUPT_EXIT_CODE);
                }
                number += 1;
                if regex.is_match(&line) != invert {
                    matched = true;
                    self.emit(inv, None, numbered, number, &line).await;
                }
            }
        } else {
            let prefix_names = files.len() > 1;
            for operand in files {
                let (handle, mut lines) = match file_lines(inv, operand).await {
                    Ok(opened) => opened,
                    Err(err) => {
                        inv.writeln_stderr(&format!("grep: {operand}: {err}")).await;
                        return Ok(2);
                    }
                };
                let mut number = 0;
                while let Some(line) = lines.next_line().await {
                    number += 1;
                    if regex.is_match(&line) != invert {
                        matched = true;
                        let name = prefix_names.then_some(operand.as_str());
                        self.emit(inv, name, numbered, number, &line).await;
                    }
                }
                let _ = inv.process.close(&handle).await;
            }
        }
        Ok(if matched { 0 } else { 1 })
    }
}

impl Grep {
    async fn emit(
        &self,
        inv: &Invocation,
        file: Option<&str>,
        numbered: bool,
        number: usize,
        line: &str,
    ) {
        let mut out = String::new();
        if let Some(file) = file {
            out.push_str(file);
            out.push(':');
        }
        if numbered {
            out.push_str(&format!("{number}:"));
        }
        out.push_str(line);
        inv.writeln_stdout(&out).await;
    }
}

pub struct Diff;

#[async_trait]
impl Command for Diff {
    fn name(&self) -> &'static str {
        "diff"
    }

    fn description(&self) -> &'static str {
        "Compare two files line by line"
    }

    fn usage_line(&self) -> &'static str {
        "FILE1 FILE2"
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let positionals = inv.args.positionals().to_vec();
        let [left_name, right_name] = positionals.as_slice() else {
            inv.writeln_stderr("diff: expected exactly two files").await;
            return Ok(2);
        };

        let left = match inv.fs().read_to_string(&inv.resolve(left_name)).await {
            Ok(content) => content,
            Err(err) => {
                inv.writeln_stderr(&format!("diff: {left_name}: {err}")).await;
                return Ok(2);
            }
        };
        let right = match inv.fs().read_to_string(&inv.resolve(right_name)).await {
            Ok(content) => content,
            Err(err) => {
                inv.writeln_stderr(&format!("diff: {right_name}: {err}")).await;
                return Ok(2);
            }
        };

        let left_lines: Vec<&str> = left.lines().collect();
        let right_lines: Vec<&str> = right.lines().collect();
        let script = diff_lines(&left_lines, &right_lines);
        if script.iter().all(|op| matches!(op, DiffOp::Keep(_))) {
            return Ok(0);
        }

        inv.writeln_stdout(&format!("--- {left_name}")).await;
        inv.writeln_stdout(&format!("+++ {right_name}")).await;
        for op in script {
            match op {
                DiffOp::Keep(line) => inv.writeln_stdout(&format!("  {line}")).await,
                DiffOp::Remove(line) => inv.writeln_stdout(&format!("- {line}")).await,
                DiffOp::Add(line) => inv.writeln_stdout(&format!("+ {line}")).await,
            }
        }
        Ok(1)
    }
}

enum DiffOp<'a> {
    Keep(&'a str),
    Remove(&'a str),
    Add(&'a str),
}

/// Longest-common-subsequence edit script, deletions before insertions.
fn diff_lines<'a>(left: &[&'a str], right: &[&'a str]) -> Vec<DiffOp<'a>> {
    let n = left.len();
    let m = right.len();
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if left[i] == right[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if left[i] == right[j] {
            ops.push(DiffOp::Keep(left[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(DiffOp::Remove(left[i]));
            i += 1;
        } else {
            ops.push(DiffOp::Add(right[j]));
            j += 1;
        }
    }
    while i < n {
        ops.push(DiffOp::Remove(left[i]));
        i += 1;
    }
    while j < m {
        ops.push(DiffOp::Add(right[j]));
        j += 1;
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn echo_unescapes_sequences() {
        assert_eq!(unescape(r"alpha\nbeta"), "alpha\nbeta");
        assert_eq!(unescape(r"tab\there"), "tab\there");
        assert_eq!(unescape(r"keep\q"), r"keep\q");
        assert_eq!(unescape(r"slash\\"), r"slash\");
    }

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size("10"), Some(10));
        assert_eq!(parse_size("4K"), Some(4096));
        assert_eq!(parse_size("1M"), Some(1024 * 1024));
        assert_eq!(parse_size("x"), None);
    }

    #[test]
    fn diff_script_marks_changed_middle_line() {
        let script = diff_lines(&["A", "B", "C"], &["A", "X", "C"]);
        let rendered: Vec<String> = script
            .iter()
            .map(|op| match op {
                DiffOp::Keep(l) => format!("  {l}"),
                DiffOp::Remove(l) => format!("- {l}"),
                DiffOp::Add(l) => format!("+ {l}"),
            })
            .collect();
        assert_eq!(rendered, vec!["  A", "- B", "+ X", "  C"]);
    }

    #[test]
    fn diff_script_identical_is_all_keeps() {
        let script = diff_lines(&["same"], &["same"]);
        assert!(matches!(script.as_slice(), [DiffOp::Keep("same")]));
    }
}
