use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Cursor, Read, Write};

use super::KipError;

pub const MAGIC: &[u8; 4] = b"KIP1";
/// Fixed on-disk size of [`KipHeader`].
pub const HEADER_SIZE: usize = 0x100;
pub const SEGMENT_COUNT: usize = 6;
/// Only the first three segments may carry BLZ data.
pub const COMPRESSIBLE_SEGMENTS: usize = 3;
pub const CAPABILITY_COUNT: usize = 0x20;
pub const NAME_LEN: usize = 0xC;

pub const SEGMENT_NAMES: [&str; SEGMENT_COUNT] =
    [".text", ".rodata", ".data", ".bss", "reserved4", "reserved5"];

const COMPRESSION_MASK: u8 = 0b0000_0111;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub dst_offset: u32,
    pub decompressed_size: u32,
    pub compressed_size: u32,
    pub attribute: u32,
}

impl Segment {
    pub const SIZE: usize = 16;

    /// No bytes for this segment follow the header.
    pub fn is_empty(&self) -> bool {
        self.compressed_size == 0
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.dst_offset)?;
        writer.write_u32::<LittleEndian>(self.decompressed_size)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.attribute)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KipHeader {
    pub name: [u8; NAME_LEN],
    pub title_id: u64,
    pub process_category: u32,
    pub main_thread_priority: u8,
    pub default_cpu_id: u8,
    pub reserved: u8,
    /// Bits 0..=2: segment i is BLZ compressed.
    pub flags: u8,
    pub segments: [Segment; SEGMENT_COUNT],
    pub capabilities: [u32; CAPABILITY_COUNT],
}

impl Default for KipHeader {
    fn default() -> Self {
        Self {
            name: [0; NAME_LEN],
            title_id: 0,
            process_category: 0,
            main_thread_priority: 0,
            default_cpu_id: 0,
            reserved: 0,
            flags: 0,
            segments: [Segment::default(); SEGMENT_COUNT],
            capabilities: [0; CAPABILITY_COUNT],
        }
    }
}

impl KipHeader {
    pub fn new(name: &str, title_id: u64) -> Self {
        let mut header = Self { title_id, ..Self::default() };
        let len = name.len().min(NAME_LEN);
        header.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        header
    }

    /// Name up to the first NUL, lossily decoded.
    pub fn name_str(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn is_compressed(&self, index: usize) -> bool {
        index < COMPRESSIBLE_SEGMENTS && self.flags & (1 << index) != 0
    }

    pub fn set_compressed(&mut self, index: usize, compressed: bool) {
        if index >= COMPRESSIBLE_SEGMENTS {
            return;
        }
        if compressed {
            self.flags |= 1 << index;
        } else {
            self.flags &= !(1 << index);
        }
    }

    pub(crate) fn clear_compression(&mut self) {
        self.flags &= !COMPRESSION_MASK;
    }

    /// Parse the fixed header from the start of `bytes`.
    ///
    /// The magic is checked before anything else is read.
    pub fn parse(bytes: &[u8]) -> Result<Self, KipError> {
        let mut reader = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        field(&mut reader, "magic", 4, |r| r.read_exact(&mut magic))?;
        if &magic != MAGIC {
            return Err(KipError::InvalidMagic { found: magic });
        }

        let mut name = [0u8; NAME_LEN];
        field(&mut reader, "name", NAME_LEN, |r| r.read_exact(&mut name))?;
        let title_id = field(&mut reader, "title_id", 8, |r| r.read_u64::<LittleEndian>())?;
        let process_category =
            field(&mut reader, "process_category", 4, |r| r.read_u32::<LittleEndian>())?;
        let main_thread_priority = field(&mut reader, "main_thread_priority", 1, |r| r.read_u8())?;
        let default_cpu_id = field(&mut reader, "default_cpu_id", 1, |r| r.read_u8())?;
        let reserved = field(&mut reader, "reserved", 1, |r| r.read_u8())?;
        let flags = field(&mut reader, "flags", 1, |r| r.read_u8())?;

        let mut segments = [Segment::default(); SEGMENT_COUNT];
        for segment in segments.iter_mut() {
            *segment = field(&mut reader, "segment", Segment::SIZE, |r| {
                Ok(Segment {
                    dst_offset: r.read_u32::<LittleEndian>()?,
                    decompressed_size: r.read_u32::<LittleEndian>()?,
                    compressed_size: r.read_u32::<LittleEndian>()?,
                    attribute: r.read_u32::<LittleEndian>()?,
                })
            })?;
        }

        let mut capabilities = [0u32; CAPABILITY_COUNT];
        field(&mut reader, "capabilities", CAPABILITY_COUNT * 4, |r| {
            r.read_u32_into::<LittleEndian>(&mut capabilities)
        })?;

        debug_assert_eq!(reader.position() as usize, HEADER_SIZE);

        Ok(Self {
            name,
            title_id,
            process_category,
            main_thread_priority,
            default_cpu_id,
            reserved,
            flags,
            segments,
            capabilities,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&self.name)?;
        writer.write_u64::<LittleEndian>(self.title_id)?;
        writer.write_u32::<LittleEndian>(self.process_category)?;
        writer.write_u8(self.main_thread_priority)?;
        writer.write_u8(self.default_cpu_id)?;
        writer.write_u8(self.reserved)?;
        writer.write_u8(self.flags)?;
        for segment in &self.segments {
            segment.write(&mut writer)?;
        }
        for cap in &self.capabilities {
            writer.write_u32::<LittleEndian>(*cap)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut out[..]);
        // The fields add up to exactly HEADER_SIZE, so the slice never runs out.
        let _ = self.write(&mut cursor);
        debug_assert_eq!(cursor.position() as usize, HEADER_SIZE);
        out
    }
}

/// Read one fixed-size field, mapping a short read to `Truncated`.
fn field<T>(
    reader: &mut Cursor<&[u8]>,
    name: &'static str,
    needed: usize,
    read: impl FnOnce(&mut Cursor<&[u8]>) -> io::Result<T>,
) -> Result<T, KipError> {
    let offset = reader.position() as usize;
    let available = reader.get_ref().len().saturating_sub(offset);
    if available < needed {
        return Err(KipError::Truncated { field: name, offset, needed, available });
    }
    read(reader).map_err(KipError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KipHeader {
        let mut header = KipHeader::new("FS", 0x0100_0000_0000_0000);
        header.process_category = 1;
        header.main_thread_priority = 0x1C;
        header.default_cpu_id = 3;
        header.flags = 0b0011_0101;
        header.segments[0] = Segment { dst_offset: 0, decompressed_size: 0x1000, compressed_size: 0x800, attribute: 0 };
        header.segments[3] = Segment { dst_offset: 0x3000, decompressed_size: 0x400, compressed_size: 0, attribute: 0 };
        header.capabilities[0] = 0x0000_3FF7;
        header.capabilities[31] = 0xFFFF_FFFF;
        header
    }

    #[test]
    fn header_is_exactly_256_bytes() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(&bytes[4..6], b"FS");
        assert_eq!(bytes[0x1F], 0b0011_0101);
        assert_eq!(&bytes[0xFC..], &[0xFF; 4]);
    }

    #[test]
    fn parse_reads_back_written_fields() {
        let header = sample();
        assert_eq!(KipHeader::parse(&header.to_bytes()).unwrap(), header);
        assert_eq!(header.name_str(), "FS");
    }

    #[test]
    fn bad_magic_stops_before_other_fields() {
        let err = KipHeader::parse(b"NSO0").unwrap_err();
        assert!(matches!(err, KipError::InvalidMagic { found } if &found == b"NSO0"));
    }

    #[test]
    fn short_header_reports_field() {
        let bytes = sample().to_bytes();
        match KipHeader::parse(&bytes[..0x28]).unwrap_err() {
            KipError::Truncated { field, offset, .. } => {
                assert_eq!(field, "segment");
                assert_eq!(offset, 0x20);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(KipHeader::parse(b"KI"), Err(KipError::Truncated { field: "magic", .. })));
    }

    #[test]
    fn compression_flags_only_cover_first_three_segments() {
        let mut header = KipHeader::default();
        header.set_compressed(1, true);
        header.set_compressed(4, true);
        assert_eq!(header.flags, 0b010);
        assert!(header.is_compressed(1));
        assert!(!header.is_compressed(4));
        header.flags |= 0xF0;
        header.clear_compression();
        assert_eq!(header.flags, 0xF0);
    }
}
