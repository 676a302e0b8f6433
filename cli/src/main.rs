//! The terminal host: boots a kernel and bridges the real TTY onto its
//! terminal abstraction.

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use coral_kernel::Kernel;
use coral_kernel::KernelOptions;
use crossterm::event::Event;
use crossterm::event::KeyCode;
use crossterm::event::KeyEvent;
use crossterm::event::KeyModifiers;
use tracing_subscriber::EnvFilter;

/// coral, a UNIX-flavored cooperative runtime on your terminal.
#[derive(Debug, Parser)]
#[clap(name = "coral", version)]
struct Cli {
    /// Path to a kernel config (TOML).
    #[clap(short = 'c', long)]
    config: Option<std::path::PathBuf>,

    /// Boot user (overrides the config).
    #[clap(long)]
    user: Option<String>,

    /// Boot password (overrides the config).
    #[clap(long)]
    password: Option<String>,

    /// Increase log verbosity (-v, -vv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_options(cli: &Cli) -> anyhow::Result<KernelOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            KernelOptions::from_toml(&content)?
        }
        None => KernelOptions::default(),
    };
    if let Some(user) = &cli.user {
        options.boot_user = user.clone();
    }
    if let Some(password) = &cli.password {
        options.boot_password = password.clone();
    }
    if let Ok((cols, rows)) = crossterm::terminal::size() {
        options.terminal_cols = cols;
        options.terminal_rows = rows;
    }
    Ok(options)
}

/// Restores the host terminal even on early returns.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> anyhow::Result<Self> {
        crossterm::terminal::enable_raw_mode().context("enabling raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Encodes a crossterm key event into the byte sequence the kernel's
/// terminal decoder understands.
fn encode_key(key: &KeyEvent) -> Vec<u8> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = key.code {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() {
                return vec![c as u8 - b'a' + 1];
            }
        }
    }
    match key.code {
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => b"\r".to_vec(),
        KeyCode::Tab => b"\t".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::Esc => vec![0x1b],
        _ => Vec::new(),
    }
}

enum InputEvent {
    Bytes(Vec<u8>),
    Resize(u16, u16),
}

/// Blocking crossterm event loop on its own thread; bytes flow to the
/// kernel terminal through a channel.
fn spawn_input_thread(tx: tokio::sync::mpsc::Sender<InputEvent>) {
    std::thread::spawn(move || {
        loop {
            match crossterm::event::read() {
                Ok(Event::Key(key)) => {
                    let bytes = encode_key(&key);
                    if !bytes.is_empty()
                        && tx.blocking_send(InputEvent::Bytes(bytes)).is_err()
                    {
                        break;
                    }
                }
                Ok(Event::Resize(cols, rows)) => {
                    if tx.blocking_send(InputEvent::Resize(cols, rows)).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let options = load_options(&cli)?;

    let kernel = Kernel::boot(options).await?;
    let raw = RawModeGuard::enable()?;

    // Kernel terminal → host stdout, with newline translation for raw mode.
    let output = kernel
        .terminal()
        .take_output()
        .await
        .context("terminal output already taken")?;
    let render = tokio::spawn(async move {
        let Ok(mut reader) = output.lock() else {
            return;
        };
        let mut stdout = std::io::stdout();
        while let Some(chunk) = reader.read().await {
            let mut translated = Vec::with_capacity(chunk.len());
            let mut last = 0u8;
            for &byte in chunk.iter() {
                if byte == b'\n' && last != b'\r' {
                    translated.push(b'\r');
                }
                translated.push(byte);
                last = byte;
            }
            if stdout.write_all(&translated).is_err() {
                break;
            }
            let _ = stdout.flush();
        }
    });

    // Host keyboard → kernel terminal.
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    spawn_input_thread(tx);
    let terminal = kernel.terminal().clone();
    let feeder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                InputEvent::Bytes(bytes) => terminal.feed(&bytes).await,
                InputEvent::Resize(cols, rows) => terminal.resize(cols, rows).await,
            }
        }
    });

    let status = kernel.run().await;
    render.abort();
    feeder.abort();
    drop(raw);
    // The input thread is parked in a blocking read; just leave.
    std::process::exit(status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_chords_map_to_c0_bytes() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(encode_key(&key), vec![0x03]);
        let key = KeyEvent::new(KeyCode::Char('D'), KeyModifiers::CONTROL);
        assert_eq!(encode_key(&key), vec![0x04]);
    }

    #[test]
    fn arrows_encode_as_csi_sequences() {
        let key = KeyEvent::new(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(encode_key(&key), b"\x1b[A".to_vec());
        let key = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(encode_key(&key), b"\r".to_vec());
    }
}
