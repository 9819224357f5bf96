//! I/O bridge between the executor and the host.
//!
//! The executor never touches the OS directly: the I/O opcodes call this
//! interface. [`StdIo`] wires it to process stdin/stdout; [`ScriptedIo`]
//! is an in-memory double used by tests, the debugger and `run --input`.

use std::collections::VecDeque;
use std::io::{self, BufRead, Read, Write};
use std::sync::{Arc, Mutex};

use crate::word::Word13;
use thiserror::Error;

/// Abstract character/line/hex source and character sink.
///
/// `None` returns mean end of input; the executor turns that into an I/O
/// trap wherever input is required. Bridges are `Send` so whole VM
/// instances can move across threads.
pub trait IoBridge: Send {
    /// Read a single byte.
    fn read_char(&mut self) -> Result<Option<u8>, IoError>;

    /// Write a single byte.
    fn write_char(&mut self, byte: u8) -> Result<(), IoError>;

    /// Read one line, without the trailing newline.
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, IoError>;

    /// Read one line and parse it as whitespace-separated hex tokens.
    fn read_hex_tokens(&mut self) -> Result<Option<Vec<Word13>>, IoError>;
}

/// Errors signalled by an I/O bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("stream error: {0}")]
    Stream(String),

    #[error("invalid hex token {0:?}")]
    InvalidHexToken(String),
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        IoError::Stream(err.to_string())
    }
}

/// Parse a line of whitespace-separated hex tokens, each masked to 13 bits.
pub fn parse_hex_tokens(line: &[u8]) -> Result<Vec<Word13>, IoError> {
    let text = String::from_utf8_lossy(line);
    text.split_ascii_whitespace()
        .map(|token| {
            if token.chars().all(|c| c.is_ascii_hexdigit()) {
                u32::from_str_radix(token, 16)
                    .map(|v| Word13::new(v as u16))
                    .map_err(|_| IoError::InvalidHexToken(token.to_string()))
            } else {
                Err(IoError::InvalidHexToken(token.to_string()))
            }
        })
        .collect()
}

fn strip_newline(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}

/// Bridge wired to process stdin/stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdIo;

impl IoBridge for StdIo {
    fn read_char(&mut self) -> Result<Option<u8>, IoError> {
        let mut byte = [0u8; 1];
        match io::stdin().lock().read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn write_char(&mut self, byte: u8) -> Result<(), IoError> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&[byte])?;
        stdout.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, IoError> {
        let mut line = Vec::new();
        match io::stdin().lock().read_until(b'\n', &mut line)? {
            0 => Ok(None),
            _ => {
                strip_newline(&mut line);
                Ok(Some(line))
            }
        }
    }

    fn read_hex_tokens(&mut self) -> Result<Option<Vec<Word13>>, IoError> {
        match self.read_line()? {
            Some(line) => parse_hex_tokens(&line).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// In-memory bridge with scripted input and captured output.
///
/// Clones share state, so a handle kept outside the VM can inspect the
/// output after (or during) a run.
#[derive(Debug, Default, Clone)]
pub struct ScriptedIo {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedIo {
    /// Create a bridge whose input stream holds `input`.
    pub fn new(input: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptedState {
                input: input.bytes().collect(),
                output: Vec::new(),
            })),
        }
    }

    /// Append more scripted input.
    pub fn push_input(&self, text: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.input.extend(text.bytes());
        }
    }

    /// Everything the VM has written so far, lossily decoded.
    pub fn output(&self) -> String {
        self.state
            .lock()
            .map(|state| String::from_utf8_lossy(&state.output).into_owned())
            .unwrap_or_default()
    }

    /// Everything the VM has written so far, as raw bytes.
    pub fn output_bytes(&self) -> Vec<u8> {
        self.state
            .lock()
            .map(|state| state.output.clone())
            .unwrap_or_default()
    }

    fn locked<T>(&self, f: impl FnOnce(&mut ScriptedState) -> T) -> Result<T, IoError> {
        self.state
            .lock()
            .map(|mut state| f(&mut state))
            .map_err(|_| IoError::Stream("scripted I/O state poisoned".into()))
    }
}

impl IoBridge for ScriptedIo {
    fn read_char(&mut self) -> Result<Option<u8>, IoError> {
        self.locked(|state| state.input.pop_front())
    }

    fn write_char(&mut self, byte: u8) -> Result<(), IoError> {
        self.locked(|state| state.output.push(byte))
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, IoError> {
        self.locked(|state| {
            if state.input.is_empty() {
                return None;
            }
            let mut line = Vec::new();
            while let Some(byte) = state.input.pop_front() {
                if byte == b'\n' {
                    break;
                }
                line.push(byte);
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            Some(line)
        })
    }

    fn read_hex_tokens(&mut self) -> Result<Option<Vec<Word13>>, IoError> {
        match self.read_line()? {
            Some(line) => parse_hex_tokens(&line).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_chars() {
        let mut io = ScriptedIo::new("AB");
        assert_eq!(io.read_char().unwrap(), Some(b'A'));
        assert_eq!(io.read_char().unwrap(), Some(b'B'));
        assert_eq!(io.read_char().unwrap(), None);
    }

    #[test]
    fn test_scripted_output_shared() {
        let io = ScriptedIo::new("");
        let mut writer = io.clone();
        writer.write_char(b'o').unwrap();
        writer.write_char(b'k').unwrap();
        assert_eq!(io.output(), "ok");
    }

    #[test]
    fn test_scripted_lines() {
        let mut io = ScriptedIo::new("first\r\nsecond\nlast");
        assert_eq!(io.read_line().unwrap(), Some(b"first".to_vec()));
        assert_eq!(io.read_line().unwrap(), Some(b"second".to_vec()));
        assert_eq!(io.read_line().unwrap(), Some(b"last".to_vec()));
        assert_eq!(io.read_line().unwrap(), None);
    }

    #[test]
    fn test_parse_hex_tokens() {
        let tokens = parse_hex_tokens(b"10 1fff  0").unwrap();
        let values: Vec<u16> = tokens.iter().map(|w| w.get()).collect();
        assert_eq!(values, vec![0x10, 0x1FFF, 0]);
    }

    #[test]
    fn test_parse_hex_tokens_masks_to_13_bits() {
        let tokens = parse_hex_tokens(b"FFFF").unwrap();
        assert_eq!(tokens[0].get(), 0x1FFF);
    }

    #[test]
    fn test_parse_hex_tokens_rejects_garbage() {
        assert!(parse_hex_tokens(b"12 xyz").is_err());
        assert!(parse_hex_tokens(b"0x10").is_err());
    }

    #[test]
    fn test_scripted_hex_tokens() {
        let mut io = ScriptedIo::new("a B c\n");
        let tokens = io.read_hex_tokens().unwrap().unwrap();
        let values: Vec<u16> = tokens.iter().map(|w| w.get()).collect();
        assert_eq!(values, vec![0xA, 0xB, 0xC]);
        assert_eq!(io.read_hex_tokens().unwrap(), None);
    }
}
