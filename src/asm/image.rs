//! Program image formats.
//!
//! Two on-disk representations:
//! - a text listing (`.img`): one 13-bit word in hex per line, `;`
//!   comments and blank lines ignored
//! - the packed binary layout (`.bin`): the words bit-packed exactly as
//!   they sit in VM memory, 13 bits per cell LSB-first
//!
//! Either loads starting at cell 0, leaving the remainder zero.

use crate::cpu::memory::{MemoryError, PackedMemory, CELL_BITS, MEMORY_CELLS};
use crate::word::Word13;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

/// A loaded program image.
#[derive(Debug, Clone, Default)]
pub struct ProgramImage {
    /// The program words, cell 0 first.
    pub words: Vec<Word13>,
}

impl ProgramImage {
    /// Create an empty image.
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Wrap an existing word list.
    pub fn from_words(words: Vec<Word13>) -> Self {
        Self { words }
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Pack words into the VM's bit-packed byte layout.
///
/// The result holds exactly the bytes covering cells `0..words.len()`.
pub fn pack(words: &[Word13]) -> Result<Vec<u8>, MemoryError> {
    let mut mem = PackedMemory::new();
    mem.load_words(words)?;
    let bytes = (words.len() * CELL_BITS + 7) / 8;
    Ok(mem.as_bytes()[..bytes].to_vec())
}

/// Unpack a bit-packed byte buffer into as many whole cells as it holds.
pub fn unpack(bytes: &[u8]) -> Vec<Word13> {
    let cells = (bytes.len() * 8 / CELL_BITS).min(MEMORY_CELLS);
    let mem = PackedMemory::from_bytes(bytes);
    (0..cells as u16).map(|a| mem.peek(a)).collect()
}

/// Load a text image file.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ProgramImage, ImageError> {
    let file = std::fs::File::open(path.as_ref()).map_err(|e| ImageError::Io(e.to_string()))?;
    let reader = BufReader::new(file);

    let mut image = ProgramImage::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| ImageError::Io(e.to_string()))?;
        let trimmed = match line.find(';') {
            Some(idx) => line[..idx].trim(),
            None => line.trim(),
        };

        if trimmed.is_empty() {
            continue;
        }

        let word = Word13::parse_hex(trimmed).map_err(|e| ImageError::Parse {
            line: line_num + 1,
            message: e.to_string(),
        })?;
        image.words.push(word);
    }

    Ok(image)
}

/// Save a text image file.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ProgramImage) -> Result<(), ImageError> {
    let mut file = std::fs::File::create(path.as_ref()).map_err(|e| ImageError::Io(e.to_string()))?;

    writeln!(file, "; vm13 image").map_err(|e| ImageError::Io(e.to_string()))?;
    writeln!(file, "; {} words", image.len()).map_err(|e| ImageError::Io(e.to_string()))?;
    writeln!(file).map_err(|e| ImageError::Io(e.to_string()))?;

    for (addr, word) in image.words.iter().enumerate() {
        writeln!(file, "{} ; {:04X}", word, addr).map_err(|e| ImageError::Io(e.to_string()))?;
    }

    Ok(())
}

/// Load a packed binary image file.
pub fn load_packed<P: AsRef<Path>>(path: P) -> Result<ProgramImage, ImageError> {
    let bytes = std::fs::read(path.as_ref()).map_err(|e| ImageError::Io(e.to_string()))?;
    Ok(ProgramImage::from_words(unpack(&bytes)))
}

/// Save a packed binary image file.
pub fn save_packed<P: AsRef<Path>>(path: P, image: &ProgramImage) -> Result<(), ImageError> {
    let bytes = pack(&image.words).map_err(|e| ImageError::Io(e.to_string()))?;
    std::fs::write(path.as_ref(), bytes).map_err(|e| ImageError::Io(e.to_string()))
}

/// Errors that can occur during image operations.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}
