//! KIP1 container: fixed 256-byte header, six segments, opaque trailing data.
//!
//! # Layout
//! ```text
//! [ KipHeader (0x100) | segment 0 | segment 1 | ... | segment 5 | trailing ]
//! ```
//! Each segment occupies `compressed_size` bytes in array order; empty
//! segments occupy nothing.  Segments 0..=2 are BLZ blocks when the matching
//! bit of `flags` is set, otherwise they are stored verbatim.  Whatever
//! follows the last segment is carried through untouched.
//!
//! [`Kip1`] is the decoded form (plain segment contents); [`KipImage`] is the
//! on-disk form (stored segment bytes plus a header whose sizes and flags
//! describe them).

pub mod header;

use log::{debug, warn};
use std::io;
use thiserror::Error;

use crate::blz::{self, BlzError, BoundsPolicy, CompressionMode};
pub use header::{
    KipHeader, Segment, COMPRESSIBLE_SEGMENTS, HEADER_SIZE, MAGIC, SEGMENT_COUNT, SEGMENT_NAMES,
};

// ── Errors ───────────────────────────────────────────────────────────────────

/// A segment decoded to a different length than its header declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatch {
    pub segment: usize,
    pub declared: u32,
    pub actual: usize,
}

#[derive(Error, Debug)]
pub enum KipError {
    #[error("Invalid KIP1 magic: {found:02x?}")]
    InvalidMagic { found: [u8; 4] },
    #[error("KIP1 truncated reading {field} at offset {offset:#x}: need {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Segment {index} failed to decompress: {source}")]
    Segment {
        index: usize,
        #[source]
        source: BlzError,
    },
    #[error("Segment {} decompressed to {} bytes, header declares {}", .0.segment, .0.actual, .0.declared)]
    SizeMismatch(SizeMismatch),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`Kip1::parse_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// `Permissive` decodes each segment in place, the way a loader does.
    pub policy: BoundsPolicy,
}

/// What [`Kip1::build`] does with segments 0..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentCompression {
    /// Store every segment uncompressed.
    Off,
    Fast,
    #[default]
    Best,
}

impl SegmentCompression {
    fn mode(self) -> Option<CompressionMode> {
        match self {
            SegmentCompression::Off => None,
            SegmentCompression::Fast => Some(CompressionMode::Fast),
            SegmentCompression::Best => Some(CompressionMode::Best),
        }
    }
}

/// Configuration for [`Kip1::build`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub compression: SegmentCompression,
}

// ── Decoded container ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Kip1 {
    /// Header exactly as read; `build` derives a new one from it.
    pub header: KipHeader,
    /// Decoded contents of each segment.
    pub segments: [Vec<u8>; SEGMENT_COUNT],
    pub trailing: Vec<u8>,
    /// Segments whose decoded length disagreed with `decompressed_size`.
    pub size_mismatches: Vec<SizeMismatch>,
}

impl Kip1 {
    pub fn new(header: KipHeader, segments: [Vec<u8>; SEGMENT_COUNT], trailing: Vec<u8>) -> Self {
        Self { header, segments, trailing, size_mismatches: Vec::new() }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, KipError> {
        Self::parse_with(bytes, &ParseOptions::default())
    }

    /// Parse a KIP1 image and decode its compressed segments.
    ///
    /// A segment that decodes to the wrong length is kept and recorded in
    /// `size_mismatches`; a segment that fails to decode aborts the parse.
    pub fn parse_with(bytes: &[u8], opts: &ParseOptions) -> Result<Self, KipError> {
        let header = KipHeader::parse(bytes)?;
        let mut segments: [Vec<u8>; SEGMENT_COUNT] = Default::default();
        let mut size_mismatches = Vec::new();
        let mut offset = HEADER_SIZE;

        for (index, info) in header.segments.iter().enumerate() {
            if info.is_empty() {
                debug!("segment {index} ({}) empty", SEGMENT_NAMES[index]);
                continue;
            }

            let len = info.compressed_size as usize;
            let stored = bytes.get(offset..offset + len).ok_or(KipError::Truncated {
                field: SEGMENT_NAMES[index],
                offset,
                needed: len,
                available: bytes.len().saturating_sub(offset),
            })?;
            offset += len;

            if !header.is_compressed(index) {
                debug!("segment {index} ({}) stored, {len} bytes", SEGMENT_NAMES[index]);
                segments[index] = stored.to_vec();
                continue;
            }

            let data = decode_segment(stored, info.decompressed_size as usize, opts.policy)
                .map_err(|source| KipError::Segment { index, source })?;
            debug!(
                "segment {index} ({}) BLZ {len} -> {} bytes",
                SEGMENT_NAMES[index],
                data.len()
            );
            if data.len() != info.decompressed_size as usize {
                let mismatch = SizeMismatch {
                    segment: index,
                    declared: info.decompressed_size,
                    actual: data.len(),
                };
                warn!("{}", KipError::SizeMismatch(mismatch));
                size_mismatches.push(mismatch);
            }
            segments[index] = data;
        }

        let trailing = bytes[offset..].to_vec();
        if !trailing.is_empty() {
            debug!("{} bytes of trailing data at {offset:#x}", trailing.len());
        }

        Ok(Self { header, segments, trailing, size_mismatches })
    }

    /// Fail on the first recorded size mismatch.
    pub fn check_sizes(&self) -> Result<(), KipError> {
        match self.size_mismatches.first() {
            Some(mismatch) => Err(KipError::SizeMismatch(*mismatch)),
            None => Ok(()),
        }
    }

    /// Lay the container out for writing.
    ///
    /// Segments 0..=2 are BLZ compressed when that makes them strictly
    /// smaller; everything else is stored.  `compressed_size` and the
    /// compression flags follow the stored bytes, `decompressed_size` is left
    /// alone.
    pub fn build(&self, opts: &BuildOptions) -> KipImage {
        let mut header = self.header.clone();
        header.clear_compression();
        let mut segments = self.segments.clone();

        if let Some(mode) = opts.compression.mode() {
            for (index, segment) in segments.iter_mut().enumerate().take(COMPRESSIBLE_SEGMENTS) {
                if segment.is_empty() {
                    continue;
                }
                let packed = blz::compress_with(segment, mode);
                if packed.len() < segment.len() {
                    debug!(
                        "segment {index} ({}) compressed {} -> {} bytes",
                        SEGMENT_NAMES[index],
                        segment.len(),
                        packed.len()
                    );
                    *segment = packed;
                    header.set_compressed(index, true);
                } else {
                    debug!(
                        "segment {index} ({}) kept uncompressed ({} bytes, BLZ gave {})",
                        SEGMENT_NAMES[index],
                        segment.len(),
                        packed.len()
                    );
                }
            }
        }

        for (index, (info, segment)) in header.segments.iter_mut().zip(&segments).enumerate() {
            info.compressed_size = size_field(segment.len());
            if info.compressed_size as usize != segment.len() {
                warn!("segment {index} ({}) is {} bytes, size field saturated", SEGMENT_NAMES[index], segment.len());
            }
        }

        KipImage { header, segments, trailing: self.trailing.clone() }
    }

    pub fn to_bytes(&self, opts: &BuildOptions) -> Vec<u8> {
        self.build(opts).serialize()
    }
}

/// Header size fields are `u32`; larger segments saturate instead of wrapping.
fn size_field(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn decode_segment(stored: &[u8], declared: usize, policy: BoundsPolicy) -> Result<Vec<u8>, BlzError> {
    match policy {
        BoundsPolicy::Strict => blz::decompress(stored),
        BoundsPolicy::Permissive => {
            // Loader style: the segment's final buffer, compressed bytes at its start.
            let mut buf = vec![0u8; declared.max(stored.len())];
            buf[..stored.len()].copy_from_slice(stored);
            let len = blz::decompress_in_place(&mut buf, stored.len())?;
            buf.truncate(len);
            Ok(buf)
        }
    }
}

// ── On-disk container ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct KipImage {
    pub header: KipHeader,
    /// Segment bytes as stored in the file.
    pub segments: [Vec<u8>; SEGMENT_COUNT],
    pub trailing: Vec<u8>,
}

impl KipImage {
    pub fn serialize(&self) -> Vec<u8> {
        serialize(&self.header, &self.segments, &self.trailing)
    }
}

/// Concatenate header, non-empty segments in order, then trailing bytes.
pub fn serialize(header: &KipHeader, segments: &[Vec<u8>; SEGMENT_COUNT], trailing: &[u8]) -> Vec<u8> {
    let body: usize = segments.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(HEADER_SIZE + body + trailing.len());
    out.extend_from_slice(&header.to_bytes());
    for segment in segments {
        out.extend_from_slice(segment);
    }
    out.extend_from_slice(trailing);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(n: usize) -> Vec<u8> {
        b"mov x0, x1; bl 0x1000; ret; "
            .iter()
            .cycle()
            .take(n)
            .copied()
            .collect()
    }

    fn plain_kip() -> Kip1 {
        let mut header = KipHeader::new("Test", 0x0100_0000_0000_0042);
        let segments = [text(0x600), vec![0x11; 0x200], b"data".to_vec(), Vec::new(), Vec::new(), Vec::new()];
        for (info, segment) in header.segments.iter_mut().zip(&segments) {
            info.decompressed_size = segment.len() as u32;
            info.compressed_size = segment.len() as u32;
        }
        header.segments[3].decompressed_size = 0x80;
        Kip1::new(header, segments, b"trailing!".to_vec())
    }

    #[test]
    fn build_compresses_only_when_smaller() {
        let image = plain_kip().build(&BuildOptions::default());
        assert!(image.header.is_compressed(0));
        assert!(image.header.is_compressed(1));
        assert!(!image.header.is_compressed(2));
        assert_eq!(image.segments[2], b"data");
        for (info, segment) in image.header.segments.iter().zip(&image.segments) {
            assert_eq!(info.compressed_size as usize, segment.len());
        }
        assert_eq!(image.header.segments[0].decompressed_size, 0x600);
        assert_eq!(image.header.segments[3].decompressed_size, 0x80);
    }

    #[test]
    fn parse_decodes_built_image() {
        let kip = plain_kip();
        let bytes = kip.to_bytes(&BuildOptions::default());
        let parsed = Kip1::parse(&bytes).unwrap();
        assert_eq!(parsed.segments, kip.segments);
        assert_eq!(parsed.trailing, b"trailing!");
        assert!(parsed.size_mismatches.is_empty());
        parsed.check_sizes().unwrap();

        let permissive = Kip1::parse_with(&bytes, &ParseOptions { policy: BoundsPolicy::Permissive }).unwrap();
        assert_eq!(permissive.segments, kip.segments);
    }

    #[test]
    fn recompress_is_byte_identical() {
        let bytes = plain_kip().to_bytes(&BuildOptions::default());
        let again = Kip1::parse(&bytes).unwrap().to_bytes(&BuildOptions::default());
        assert_eq!(again, bytes);
    }

    #[test]
    fn off_clears_flags_and_stores_plain_segments() {
        let bytes = plain_kip().to_bytes(&BuildOptions::default());
        let image = Kip1::parse(&bytes).unwrap().build(&BuildOptions { compression: SegmentCompression::Off });
        assert_eq!(image.header.flags & 0b111, 0);
        assert_eq!(image.header.segments[0].compressed_size, 0x600);
        assert_eq!(image.serialize(), plain_kip().to_bytes(&BuildOptions { compression: SegmentCompression::Off }));
    }

    #[test]
    fn size_mismatch_is_recorded_not_fatal() {
        let mut kip = plain_kip();
        kip.header.segments[0].decompressed_size = 0x700;
        let bytes = kip.to_bytes(&BuildOptions::default());
        let parsed = Kip1::parse(&bytes).unwrap();
        assert_eq!(parsed.segments[0].len(), 0x600);
        assert_eq!(
            parsed.size_mismatches,
            vec![SizeMismatch { segment: 0, declared: 0x700, actual: 0x600 }]
        );
        assert!(matches!(parsed.check_sizes(), Err(KipError::SizeMismatch(_))));
    }

    #[test]
    fn size_field_saturates() {
        assert_eq!(size_field(0x600), 0x600);
        assert_eq!(size_field(u32::MAX as usize), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(size_field(u32::MAX as usize + 1), u32::MAX);
    }

    #[test]
    fn corrupt_segment_names_its_index() {
        let mut bytes = plain_kip().to_bytes(&BuildOptions::default());
        let image = Kip1::parse(&bytes).unwrap().build(&BuildOptions::default());
        // Point segment 1's total_size past the start of its block.
        let seg1_end = HEADER_SIZE + image.segments[0].len() + image.segments[1].len();
        bytes[seg1_end - 12..seg1_end - 8].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        match Kip1::parse(&bytes).unwrap_err() {
            KipError::Segment { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(source, BlzError::MalformedFooter { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn short_segment_data_is_truncated() {
        let bytes = plain_kip().to_bytes(&BuildOptions { compression: SegmentCompression::Off });
        let err = Kip1::parse(&bytes[..HEADER_SIZE + 0x100]).unwrap_err();
        assert!(matches!(err, KipError::Truncated { field: ".text", offset: HEADER_SIZE, .. }));
    }
}
