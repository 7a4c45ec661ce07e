//! ZIP container parsing.
//!
//! - [`structures`]: binary layouts of the ZIP format records (EOCD,
//!   ZIP64 locator/EOCD, header signatures, entry descriptors)
//! - [`reader`]: [`ArchiveReader`], which walks the central directory
//!   into [`ArchiveEntry`] descriptors and resolves payload offsets
//!
//! Supported: standard ZIP plus ZIP64 extensions, STORED and DEFLATE
//! methods. Not supported: encryption, multi-disk archives, other
//! compression methods (those entries are reported and skipped, never
//! fatal to a run).

mod reader;
mod structures;

pub use reader::ArchiveReader;
pub use structures::*;
