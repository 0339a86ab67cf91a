pub mod blz;
pub mod kip;
pub mod info;

pub use blz::{compress, decompress, BlzError, BoundsPolicy, CompressionMode};
pub use kip::{BuildOptions, Kip1, KipError, KipHeader, KipImage, ParseOptions, SegmentCompression};
pub use info::KipInfo;
