//! Bottom-LZ ("BLZ"): the backward LZ77 variant used for KIP1 segments.
//!
//! # Block layout
//! A coded block is read from the end toward the start:
//!
//! ```text
//! [ raw prefix | encoded stream | 0xFF pad | total_size | header_len | extra_size ]
//!                                            u32 LE       u32 LE       i32 LE
//! ```
//!
//! - `total_size` covers the encoded stream, the pad and the 12 footer bytes.
//!   Anything in front of it is a raw prefix the encoder left uncoded.
//! - `header_len` is the pad plus the footer (12..=15).
//! - `extra_size` is how much longer the decoded region is than `total_size`.
//!   It is a two's complement value and may be negative for tiny inputs.
//!
//! A stored ("not coded") block is the raw bytes, zero padded to a multiple of
//! four, followed by a single zero word.  A zero `extra_size` therefore always
//! means "stored", and the encoder never emits a coded block with that value.
//!
//! # Stream
//! Walking backward from `total_size - header_len`, each control byte tags the
//! next eight items MSB-first: `0` is a literal, `1` a two-byte back-reference
//! `LLLL OOOO OOOO OOOO` (length - 3, offset - 3).  Decoding stops as soon as
//! the write cursor reaches the start of the region.

mod decode;
mod encode;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};
use thiserror::Error;

pub use decode::{decompress, decompress_in_place, decompress_with, decompressed_len};
pub use encode::{compress, compress_with};

/// Longest match that is still cheaper to emit as literals.
pub const THRESHOLD: usize = 2;
/// Smallest encodable back-reference distance.
pub const MIN_OFFSET: usize = 3;
/// Largest back-reference distance: `(1 << 12) + 2`.
pub const MAX_OFFSET: usize = 0x1002;
/// Longest match: `(1 << 4) + THRESHOLD`.
pub const MAX_MATCH: usize = 0x12;
/// Three little-endian words at the tail of a coded block.
pub const FOOTER_LEN: usize = 12;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlzError {
    #[error("Malformed BLZ footer ({reason}): block_len={block_len} total_size={total_size} header_len={header_len} extra_size={extra_size}")]
    MalformedFooter {
        reason: &'static str,
        block_len: usize,
        total_size: u32,
        header_len: u32,
        extra_size: i32,
    },
    #[error("BLZ {what} out of bounds (read_index={read_index}, write_index={write_index}, buffer_len={buffer_len})")]
    OutOfBounds {
        what: &'static str,
        read_index: usize,
        write_index: usize,
        buffer_len: usize,
    },
}

impl BlzError {
    fn footer(reason: &'static str, block_len: usize, footer: Option<&Footer>) -> Self {
        let (total_size, header_len, extra_size) = footer
            .map(|f| (f.total_size, f.header_len, f.extra_size))
            .unwrap_or_default();
        BlzError::MalformedFooter { reason, block_len, total_size, header_len, extra_size }
    }
}

// ── Modes ────────────────────────────────────────────────────────────────────

/// Match search effort for the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMode {
    /// Plain greedy longest-match.
    Fast,
    /// Greedy plus the one-step LZ-CUE lookahead.
    #[default]
    Best,
}

impl CompressionMode {
    pub fn is_best(self) -> bool {
        matches!(self, CompressionMode::Best)
    }
}

/// How much the decoder trusts its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundsPolicy {
    /// Allocate the output and validate the whole footer before decoding.
    #[default]
    Strict,
    /// Decode in place over a caller-sized buffer, checking only what is
    /// needed to stay inside it.
    Permissive,
}

// ── Footer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub total_size: u32,
    pub header_len: u32,
    pub extra_size: i32,
}

impl Footer {
    /// Read the footer at the tail of `block`.
    ///
    /// Returns `Ok(None)` for a stored block (trailing zero word).  The zero
    /// word is the only marker, so a coded block whose `extra_size` is zero
    /// also reads as stored and decodes to its raw bytes; the encoder here
    /// never emits one.
    pub fn read(block: &[u8]) -> Result<Option<Self>, BlzError> {
        if block.len() < 4 {
            return Err(BlzError::footer("block shorter than one word", block.len(), None));
        }
        let mut tail = &block[block.len() - 4..];
        if tail.read_i32::<LittleEndian>().map_err(|_| eof(block.len()))? == 0 {
            return Ok(None);
        }
        if block.len() < FOOTER_LEN {
            return Err(BlzError::footer("block shorter than footer", block.len(), None));
        }
        let mut words = &block[block.len() - FOOTER_LEN..];
        let footer = Footer {
            total_size: words.read_u32::<LittleEndian>().map_err(|_| eof(block.len()))?,
            header_len: words.read_u32::<LittleEndian>().map_err(|_| eof(block.len()))?,
            extra_size: words.read_i32::<LittleEndian>().map_err(|_| eof(block.len()))?,
        };
        Ok(Some(footer))
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.total_size)?;
        writer.write_u32::<LittleEndian>(self.header_len)?;
        writer.write_i32::<LittleEndian>(self.extra_size)?;
        Ok(())
    }

    /// Length of the decoded region, i.e. everything after the raw prefix.
    /// Wraps like the loader does; a negative result is reported as `None`.
    pub fn region_len(&self) -> Option<usize> {
        let len = i64::from(self.total_size) + i64::from(self.extra_size);
        usize::try_from(len).ok()
    }

    /// Start of the encoded stream measured from the footer's region start.
    pub fn stream_len(&self) -> Option<usize> {
        self.total_size.checked_sub(self.header_len).map(|n| n as usize)
    }
}

fn eof(block_len: usize) -> BlzError {
    BlzError::footer("footer read past end of block", block_len, None)
}
