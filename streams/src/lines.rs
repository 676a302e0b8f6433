use crate::StreamReader;

/// Buffers a chunked reader into `\n`-terminated lines.
///
/// Chunk boundaries carry no meaning on a byte stream, so anything that
/// wants line semantics (`grep`, `head`, the shell `read` builtin) goes
/// through this adapter. The final line is yielded even without a trailing
/// newline.
#[derive(Debug)]
pub struct LineReader {
    reader: StreamReader,
    buf: Vec<u8>,
    eof: bool,
}

impl LineReader {
    pub fn new(reader: StreamReader) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            eof: false,
        }
    }

    /// Returns the next line without its trailing newline, or `None` at
    /// end-of-stream. Bytes are interpreted as UTF-8, lossily.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let rest = self.buf.split_off(pos + 1);
                let mut line = std::mem::replace(&mut self.buf, rest);
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            if self.eof {
                if self.buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.buf);
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            match self.reader.read().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => self.eof = true,
            }
        }
    }

    /// Hands the underlying reader back, with any unconsumed bytes lost.
    pub fn into_inner(self) -> StreamReader {
        self.reader
    }
}
