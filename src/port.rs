use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::charset::{decode_display, decode_display_text, encode_key, encode_keys};

/// Polled keyboard and display, as seen by the monitor.
///
/// Keys and display bytes use the high-bit encoding from [`crate::charset`].
pub trait CharacterPort {
    /// True when a key is waiting to be read.
    fn key_ready(&mut self) -> bool;

    /// Read the waiting key. Like the hardware latch, reading without a
    /// ready key returns the last key delivered.
    fn read_key(&mut self) -> u8;

    fn write_display(&mut self, byte: u8);

    /// False once no further keys can ever arrive.
    fn is_open(&self) -> bool {
        true
    }

    /// Poll until a key arrives. Returns `None` if the port closes first.
    fn wait_key(&mut self) -> Option<u8> {
        loop {
            if self.key_ready() {
                return Some(self.read_key());
            }
            if !self.is_open() {
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// In-memory port: a queue of typed keys and a capture of everything shown.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPort {
    input: VecDeque<u8>,
    output: Vec<u8>,
    last_key: u8,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(text: &str) -> Self {
        let mut port = Self::new();
        port.type_text(text);
        port
    }

    /// Queue host text as keystrokes.
    pub fn type_text(&mut self, text: &str) {
        self.input.extend(encode_keys(text));
    }

    /// Queue raw keyboard codes.
    pub fn push_keys(&mut self, keys: &[u8]) {
        self.input.extend(keys.iter().copied());
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_text(&self) -> String {
        decode_display_text(&self.output)
    }

    /// Drain the captured display bytes.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}

impl CharacterPort for ScriptedPort {
    fn key_ready(&mut self) -> bool {
        !self.input.is_empty()
    }

    fn read_key(&mut self) -> u8 {
        if let Some(key) = self.input.pop_front() {
            self.last_key = key;
        }
        self.last_key
    }

    fn write_display(&mut self, byte: u8) {
        self.output.push(byte);
    }

    fn is_open(&self) -> bool {
        !self.input.is_empty()
    }
}

/// Port bound to the process's stdin and stdout.
///
/// A reader thread turns stdin bytes into keystrokes; display bytes are
/// decoded and written straight to the output. If the output fails the
/// port closes, since nobody can see the monitor any more.
pub struct TerminalPort<W: Write = io::Stdout> {
    keys: Receiver<u8>,
    pending: Option<u8>,
    last_key: u8,
    closed: bool,
    out: W,
}

impl TerminalPort {
    pub fn new() -> Self {
        let (sender, keys) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            for byte in stdin.lock().bytes() {
                let byte = match byte {
                    Ok(byte) => byte,
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    }
                };
                // The monitor only understands ASCII keys.
                let Some(key) = encode_key(byte as char).filter(|_| byte.is_ascii()) else {
                    continue;
                };
                if sender.send(key).is_err() {
                    break;
                }
            }
            debug!("stdin closed");
        });

        Self::with_parts(keys, io::stdout())
    }
}

impl Default for TerminalPort {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> TerminalPort<W> {
    /// Port reading keystrokes from `keys` and displaying on `out`.
    pub fn with_parts(keys: Receiver<u8>, out: W) -> Self {
        Self {
            keys,
            pending: None,
            last_key: 0,
            closed: false,
            out,
        }
    }
}

impl<W: Write> CharacterPort for TerminalPort<W> {
    fn key_ready(&mut self) -> bool {
        if self.pending.is_none() && !self.closed {
            match self.keys.try_recv() {
                Ok(key) => self.pending = Some(key),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.closed = true,
            }
        }
        self.pending.is_some()
    }

    fn read_key(&mut self) -> u8 {
        if let Some(key) = self.pending.take() {
            self.last_key = key;
        }
        self.last_key
    }

    fn write_display(&mut self, byte: u8) {
        if self.closed {
            return;
        }
        let Some(c) = decode_display(byte) else {
            return;
        };
        let mut buf = [0u8; 4];
        let written = self
            .out
            .write_all(c.encode_utf8(&mut buf).as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(e) = written {
            warn!("display write failed, closing terminal: {}", e);
            self.closed = true;
            self.pending = None;
        }
    }

    fn is_open(&self) -> bool {
        !self.closed || self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::CR;

    #[test]
    fn test_scripted_port_delivers_keys_in_order() {
        let mut port = ScriptedPort::with_keys("A1\n");
        assert!(port.key_ready());
        assert_eq!(port.read_key(), b'A' | 0x80);
        assert_eq!(port.read_key(), b'1' | 0x80);
        assert_eq!(port.read_key(), CR);
        assert!(!port.key_ready());
        // The latch keeps the last key.
        assert_eq!(port.read_key(), CR);
    }

    #[test]
    fn test_scripted_port_captures_output() {
        let mut port = ScriptedPort::new();
        port.write_display(b'O' | 0x80);
        port.write_display(b'K' | 0x80);
        port.write_display(CR);
        assert_eq!(port.output_text(), "OK\n");
        assert_eq!(port.take_output().len(), 3);
        assert!(port.output().is_empty());
    }

    #[test]
    fn test_wait_key_stops_when_drained() {
        let mut port = ScriptedPort::with_keys("7");
        assert_eq!(port.wait_key(), Some(b'7' | 0x80));
        assert_eq!(port.wait_key(), None);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "display gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_terminal_port_displays_and_reads_keys() {
        let (sender, keys) = mpsc::channel();
        let mut port = TerminalPort::with_parts(keys, Vec::new());
        assert!(!port.key_ready());

        sender.send(b'7' | 0x80).unwrap();
        assert_eq!(port.wait_key(), Some(b'7' | 0x80));
        port.write_display(b'7' | 0x80);
        port.write_display(CR);
        assert_eq!(port.out, b"7\n");

        drop(sender);
        assert_eq!(port.wait_key(), None);
    }

    #[test]
    fn test_terminal_port_closes_when_display_fails() {
        let (sender, keys) = mpsc::channel();
        let mut port = TerminalPort::with_parts(keys, BrokenPipe);
        sender.send(b'A' | 0x80).unwrap();
        assert!(port.key_ready());

        port.write_display(b'A' | 0x80);
        assert!(!port.is_open());
        assert!(!port.key_ready());
        assert_eq!(port.wait_key(), None);
    }
}
