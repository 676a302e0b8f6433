//! Decoding raw terminal bytes into structured key events.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    Esc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub ctrl: bool,
    pub alt: bool,
}

impl KeyEvent {
    pub fn plain(code: KeyCode) -> Self {
        Self {
            code,
            ctrl: false,
            alt: false,
        }
    }

    pub fn ctrl(c: char) -> Self {
        Self {
            code: KeyCode::Char(c),
            ctrl: true,
            alt: false,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        self.ctrl && self.code == KeyCode::Char('c')
    }

    pub fn is_eof(&self) -> bool {
        self.ctrl && self.code == KeyCode::Char('d')
    }
}

/// Stateful byte-to-key decoder. Escape sequences and UTF-8 runes may span
/// chunk boundaries, so partial input is carried between feeds.
#[derive(Debug, Default)]
pub struct KeyDecoder {
    pending: Vec<u8>,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes `bytes` and returns every complete key event.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<KeyEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        loop {
            match decode_one(&self.pending) {
                Decoded::Event(event, used) => {
                    self.pending.drain(..used);
                    events.push(event);
                }
                Decoded::Skip(used) => {
                    self.pending.drain(..used);
                }
                Decoded::Incomplete => break,
                Decoded::Empty => break,
            }
        }
        events
    }
}

enum Decoded {
    Event(KeyEvent, usize),
    /// Recognized but uninteresting bytes (unsupported CSI sequences).
    Skip(usize),
    Incomplete,
    Empty,
}

fn decode_one(buf: &[u8]) -> Decoded {
    let Some(&first) = buf.first() else {
        return Decoded::Empty;
    };
    match first {
        0x1b => decode_escape(buf),
        b'\r' | b'\n' => Decoded::Event(KeyEvent::plain(KeyCode::Enter), 1),
        b'\t' => Decoded::Event(KeyEvent::plain(KeyCode::Tab), 1),
        0x7f | 0x08 => Decoded::Event(KeyEvent::plain(KeyCode::Backspace), 1),
        // Remaining C0 controls map to ctrl-letter chords.
        0x01..=0x1a => {
            let letter = (b'a' + first - 0x01) as char;
            Decoded::Event(KeyEvent::ctrl(letter), 1)
        }
        0x00 | 0x1c..=0x1f => Decoded::Skip(1),
        _ => decode_utf8(buf),
    }
}

fn decode_escape(buf: &[u8]) -> Decoded {
    match buf.get(1) {
        None => Decoded::Incomplete,
        Some(b'[') => decode_csi(buf),
        Some(b'O') => match buf.get(2) {
            None => Decoded::Incomplete,
            Some(b'H') => Decoded::Event(KeyEvent::plain(KeyCode::Home), 3),
            Some(b'F') => Decoded::Event(KeyEvent::plain(KeyCode::End), 3),
            Some(_) => Decoded::Skip(3),
        },
        // ESC + printable is an alt chord.
        Some(&c) if c.is_ascii_graphic() => Decoded::Event(
            KeyEvent {
                code: KeyCode::Char(c as char),
                ctrl: false,
                alt: true,
            },
            2,
        ),
        Some(_) => Decoded::Event(KeyEvent::plain(KeyCode::Esc), 1),
    }
}

fn decode_csi(buf: &[u8]) -> Decoded {
    // buf starts with ESC [; find the final byte (0x40..=0x7e).
    let Some((idx, &fin)) = buf
        .iter()
        .enumerate()
        .skip(2)
        .find(|&(_, &b)| (0x40..=0x7e).contains(&b))
    else {
        return Decoded::Incomplete;
    };
    let used = idx + 1;
    let params = &buf[2..idx];
    let event = match fin {
        b'A' => Some(KeyCode::Up),
        b'B' => Some(KeyCode::Down),
        b'C' => Some(KeyCode::Right),
        b'D' => Some(KeyCode::Left),
        b'H' => Some(KeyCode::Home),
        b'F' => Some(KeyCode::End),
        b'~' => match params {
            b"1" | b"7" => Some(KeyCode::Home),
            b"3" => Some(KeyCode::Delete),
            b"4" | b"8" => Some(KeyCode::End),
            _ => None,
        },
        _ => None,
    };
    match event {
        Some(code) => Decoded::Event(KeyEvent::plain(code), used),
        None => Decoded::Skip(used),
    }
}

fn decode_utf8(buf: &[u8]) -> Decoded {
    let len = match buf[0] {
        b if b < 0x80 => 1,
        b if b & 0xe0 == 0xc0 => 2,
        b if b & 0xf0 == 0xe0 => 3,
        b if b & 0xf8 == 0xf0 => 4,
        _ => return Decoded::Skip(1),
    };
    if buf.len() < len {
        return Decoded::Incomplete;
    }
    match std::str::from_utf8(&buf[..len]) {
        Ok(s) => match s.chars().next() {
            Some(c) => Decoded::Event(KeyEvent::plain(KeyCode::Char(c)), len),
            None => Decoded::Skip(len),
        },
        Err(_) => Decoded::Skip(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_characters_and_enter() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.feed(b"ls\r");
        assert_eq!(
            events,
            vec![
                KeyEvent::plain(KeyCode::Char('l')),
                KeyEvent::plain(KeyCode::Char('s')),
                KeyEvent::plain(KeyCode::Enter),
            ]
        );
    }

    #[test]
    fn ctrl_c_is_an_interrupt() {
        let mut decoder = KeyDecoder::new();
        let events = decoder.feed(&[0x03]);
        assert_eq!(events, vec![KeyEvent::ctrl('c')]);
        assert!(events[0].is_interrupt());
    }

    #[test]
    fn arrow_sequence_split_across_feeds() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.feed(&[0x1b]), vec![]);
        assert_eq!(decoder.feed(b"["), vec![]);
        assert_eq!(decoder.feed(b"A"), vec![KeyEvent::plain(KeyCode::Up)]);
    }

    #[test]
    fn delete_and_home_tilde_sequences() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(
            decoder.feed(b"\x1b[3~\x1b[1~"),
            vec![
                KeyEvent::plain(KeyCode::Delete),
                KeyEvent::plain(KeyCode::Home),
            ]
        );
    }

    #[test]
    fn multibyte_utf8_across_feeds() {
        let mut decoder = KeyDecoder::new();
        let encoded = "é".as_bytes();
        assert_eq!(decoder.feed(&encoded[..1]), vec![]);
        assert_eq!(
            decoder.feed(&encoded[1..]),
            vec![KeyEvent::plain(KeyCode::Char('é'))]
        );
    }

    #[test]
    fn unknown_csi_is_skipped() {
        let mut decoder = KeyDecoder::new();
        assert_eq!(decoder.feed(b"\x1b[5~x"), vec![KeyEvent::plain(KeyCode::Char('x'))]);
    }
}
