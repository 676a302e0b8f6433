use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use bytes::Bytes;
use coral_streams::Fanout;
use coral_streams::ReadableStream;
use coral_streams::WritableStream;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

use crate::KeyDecoder;
use crate::KeyEvent;
use crate::Result;
use crate::ansi;
use crate::line_editor::LineEditor;

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermEvent {
    /// Ctrl-C. Long-running commands subscribe and cooperatively stop.
    Interrupt,
    Resize { cols: u16, rows: u16 },
}

/// Tab-completion hook consulted by the line editor. `cursor` is a byte
/// offset into `line`; candidates are full replacements for the word under
/// the cursor.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, line: &str, cursor: usize) -> Vec<String>;
}

pub(crate) struct TermInner {
    size: RwLock<(u16, u16)>,
    /// The render surface. Unbounded so kernel-side writers never stall on
    /// a slow host.
    output: WritableStream,
    output_stream: Mutex<Option<ReadableStream>>,
    input: Fanout,
    keys: broadcast::Sender<KeyEvent>,
    events: broadcast::Sender<TermEvent>,
    listening: AtomicBool,
    history: Mutex<Vec<String>>,
    completer: Mutex<Option<Arc<dyn Completer>>>,
    decoder: Mutex<KeyDecoder>,
}

/// The terminal: an ANSI write surface, a keystroke fan-out, structured key
/// events, and a line editor, glued to whatever host is pumping bytes in
/// and out.
#[derive(Clone)]
pub struct Terminal {
    pub(crate) inner: Arc<TermInner>,
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        let (keys, _) = broadcast::channel(256);
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(TermInner {
                size: RwLock::new((DEFAULT_COLS, DEFAULT_ROWS)),
                output: WritableStream::from_channel(tx),
                output_stream: Mutex::new(Some(ReadableStream::from_channel(rx))),
                input: Fanout::new(),
                keys,
                events,
                listening: AtomicBool::new(true),
                history: Mutex::new(Vec::new()),
                completer: Mutex::new(None),
                decoder: Mutex::new(KeyDecoder::new()),
            }),
        }
    }

    // --- write surface -----------------------------------------------------

    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.inner.output.lock()?;
        writer.write_all(bytes).await?;
        Ok(())
    }

    pub async fn write_str(&self, s: &str) -> Result<()> {
        self.write(s.as_bytes()).await
    }

    pub async fn writeln(&self, s: &str) -> Result<()> {
        let mut writer = self.inner.output.lock()?;
        writer.write_line(s).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.write_str(&ansi::clear_screen()).await
    }

    pub async fn move_cursor(&self, row: u16, col: u16) -> Result<()> {
        self.write_str(&ansi::cursor_to(row, col)).await
    }

    pub async fn bell(&self) -> Result<()> {
        self.write_str(ansi::BELL).await
    }

    /// The host drains this stream to render the terminal. Can be taken
    /// once.
    pub async fn take_output(&self) -> Option<ReadableStream> {
        self.inner.output_stream.lock().await.take()
    }

    /// A writable that lands verbatim on the render surface: what the
    /// shell wires as stdout/stderr for foreground commands.
    pub fn writer(&self) -> WritableStream {
        self.inner.output.clone()
    }

    // --- geometry ----------------------------------------------------------

    pub async fn size(&self) -> (u16, u16) {
        *self.inner.size.read().await
    }

    pub async fn resize(&self, cols: u16, rows: u16) {
        *self.inner.size.write().await = (cols, rows);
        let _ = self.inner.events.send(TermEvent::Resize { cols, rows });
    }

    // --- input -------------------------------------------------------------

    /// Pushes raw input bytes from the host: fans them out to every input
    /// subscriber and decodes key events. Ctrl-C additionally dispatches an
    /// interrupt on the event bus.
    pub async fn feed(&self, bytes: &[u8]) {
        self.inner.input.publish(Bytes::copy_from_slice(bytes)).await;
        let events = self.inner.decoder.lock().await.feed(bytes);
        for event in events {
            if event.is_interrupt() {
                let _ = self.inner.events.send(TermEvent::Interrupt);
            }
            let _ = self.inner.keys.send(event);
        }
    }

    /// An independent stream that observes every input byte from now until
    /// it is cancelled.
    pub async fn input_stream(&self) -> ReadableStream {
        self.inner.input.subscribe().await
    }

    pub async fn input_subscriber_count(&self) -> usize {
        self.inner.input.subscriber_count().await
    }

    /// Structured key events, independent of the byte stream.
    pub fn on_key(&self) -> broadcast::Receiver<KeyEvent> {
        self.inner.keys.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TermEvent> {
        self.inner.events.subscribe()
    }

    /// Dispatches an interrupt as if Ctrl-C had been pressed.
    pub fn interrupt(&self) {
        let _ = self.inner.events.send(TermEvent::Interrupt);
    }

    // --- line discipline ---------------------------------------------------

    /// Whether the line editor currently owns the keyboard. Full-screen UIs
    /// `unlisten` while they run and `listen` on the way out.
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Acquire)
    }

    pub fn listen(&self) {
        self.inner.listening.store(true, Ordering::Release);
    }

    pub fn unlisten(&self) {
        self.inner.listening.store(false, Ordering::Release);
    }

    pub async fn set_completer(&self, completer: Arc<dyn Completer>) {
        *self.inner.completer.lock().await = Some(completer);
    }

    pub(crate) async fn completer(&self) -> Option<Arc<dyn Completer>> {
        self.inner.completer.lock().await.clone()
    }

    /// Runs the in-terminal line editor: prompt, echo, history navigation,
    /// cursor movement, tab completion. Returns the line on Enter.
    pub async fn read_line(&self, prompt: &str, echo: bool, allow_empty: bool) -> Result<String> {
        LineEditor::new(self, prompt, echo, allow_empty).run().await
    }

    // --- history -----------------------------------------------------------

    pub async fn push_history(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let mut history = self.inner.history.lock().await;
        if history.last().map(String::as_str) != Some(line) {
            history.push(line.to_string());
        }
    }

    pub async fn history(&self) -> Vec<String> {
        self.inner.history.lock().await.clone()
    }

    pub async fn set_history(&self, lines: Vec<String>) {
        *self.inner.history.lock().await = lines;
    }
}
