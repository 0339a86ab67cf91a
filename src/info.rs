//! Human and JSON summaries of a parsed KIP1.

use serde::Serialize;
use std::fmt;

use crate::kip::{Kip1, Segment, SEGMENT_NAMES};

/// One row of the segment table.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentInfo {
    pub index: usize,
    pub name: &'static str,
    #[serde(flatten)]
    pub layout: Segment,
    pub compressed: bool,
    pub decoded_len: usize,
    /// BLAKE3 of the decoded contents, hex; absent for empty segments.
    pub blake3: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KipInfo {
    pub name: String,
    pub title_id: String,
    pub process_category: u32,
    pub main_thread_priority: u8,
    pub default_cpu_id: u8,
    pub flags: u8,
    pub segments: Vec<SegmentInfo>,
    /// Non-zero capability words, hex.
    pub capabilities: Vec<String>,
    pub trailing_len: usize,
    pub size_mismatches: usize,
}

impl KipInfo {
    pub fn from_kip(kip: &Kip1) -> Self {
        let header = &kip.header;
        let segments = header
            .segments
            .iter()
            .zip(&kip.segments)
            .enumerate()
            .map(|(index, (layout, data))| SegmentInfo {
                index,
                name: SEGMENT_NAMES[index],
                layout: *layout,
                compressed: header.is_compressed(index),
                decoded_len: data.len(),
                blake3: (!data.is_empty()).then(|| hex::encode(blake3::hash(data).as_bytes())),
            })
            .collect();

        Self {
            name: header.name_str(),
            title_id: hex::encode(header.title_id.to_be_bytes()),
            process_category: header.process_category,
            main_thread_priority: header.main_thread_priority,
            default_cpu_id: header.default_cpu_id,
            flags: header.flags,
            segments,
            capabilities: header
                .capabilities
                .iter()
                .filter(|&&cap| cap != 0)
                .map(|cap| hex::encode(cap.to_be_bytes()))
                .collect(),
            trailing_len: kip.trailing.len(),
            size_mismatches: kip.size_mismatches.len(),
        }
    }
}

impl fmt::Display for KipInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── KIP1 ─────────────────────────────────────────────────")?;
        writeln!(f, "  Name           {}", self.name)?;
        writeln!(f, "  Title ID       {}", self.title_id)?;
        writeln!(f, "  Category       {}", self.process_category)?;
        writeln!(f, "  Priority       {}", self.main_thread_priority)?;
        writeln!(f, "  Default CPU    {}", self.default_cpu_id)?;
        writeln!(f, "  Flags          {:#04x}", self.flags)?;
        writeln!(f, "  Trailing       {} B", self.trailing_len)?;
        writeln!(
            f,
            "  {:<10} {:>10} {:>10} {:>10} {:>4}  BLAKE3",
            "Segment", "DstOff", "Decomp", "Stored", "BLZ"
        )?;
        for s in &self.segments {
            let hash = s.blake3.as_deref().map(|h| &h[..12]).unwrap_or("—");
            writeln!(
                f,
                "  {:<10} {:>#10x} {:>10} {:>10} {:>4}  {}",
                s.name,
                s.layout.dst_offset,
                s.layout.decompressed_size,
                s.layout.compressed_size,
                if s.compressed { "yes" } else { "no" },
                hash
            )?;
        }
        write!(f, "  Capabilities   {}", self.capabilities.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kip::{BuildOptions, KipHeader};

    #[test]
    fn summary_tracks_header_and_content() {
        let mut header = KipHeader::new("Loader", 0x0100_0000_0000_0001);
        header.capabilities[2] = 0x0000_3FF7;
        let text = vec![0x90u8; 0x400];
        header.segments[0].decompressed_size = text.len() as u32;
        let kip = Kip1::new(header, [text, vec![], vec![], vec![], vec![], vec![]], vec![1, 2, 3]);
        let parsed = Kip1::parse(&kip.to_bytes(&BuildOptions::default())).unwrap();

        let info = KipInfo::from_kip(&parsed);
        assert_eq!(info.name, "Loader");
        assert_eq!(info.title_id, "0100000000000001");
        assert!(info.segments[0].compressed);
        assert_eq!(info.segments[0].decoded_len, 0x400);
        assert_eq!(info.segments[0].blake3.as_ref().map(String::len), Some(64));
        assert!(info.segments[1].blake3.is_none());
        assert_eq!(info.capabilities, vec!["00003ff7".to_string()]);
        assert_eq!(info.trailing_len, 3);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["segments"][0]["decompressed_size"], 0x400);
        assert!(info.to_string().contains(".text"));
    }
}
