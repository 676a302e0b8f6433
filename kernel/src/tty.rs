use async_trait::async_trait;
use bytes::Bytes;
use coral_streams::StreamReader;
use coral_term::Terminal;
use coral_vfs::DeviceDriver;
use coral_vfs::Result;
use tokio::sync::Mutex;

/// `/dev/tty`: reads pull from the terminal's input fan-out, writes land on
/// the render surface. The input subscription is created on first read and
/// held for the device's lifetime.
pub struct TtyDevice {
    terminal: Terminal,
    input: Mutex<Option<StreamReader>>,
}

impl TtyDevice {
    pub fn new(terminal: Terminal) -> Self {
        Self {
            terminal,
            input: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DeviceDriver for TtyDevice {
    async fn read(&self, _len: usize) -> Result<Bytes> {
        let mut guard = self.input.lock().await;
        if guard.is_none() {
            let stream = self.terminal.input_stream().await;
            match stream.lock() {
                Ok(reader) => *guard = Some(reader),
                Err(_) => return Ok(Bytes::new()),
            }
        }
        match guard.as_mut() {
            Some(reader) => Ok(reader.read().await.unwrap_or_default()),
            None => Ok(Bytes::new()),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let _ = self.terminal.write(data).await;
        Ok(data.len())
    }
}
