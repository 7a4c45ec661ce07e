mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use crate::error::Result;
use async_trait::async_trait;

/// Random-access reads from an archive byte source.
///
/// The extraction engine only ever reads bounded slices at explicit
/// offsets, which is what keeps both local and HTTP-Range sources
/// memory-bounded: nothing ever pulls the whole archive into memory.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read, which may be short only at
    /// end of source.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Total size of the data source in bytes.
    fn size(&self) -> u64;
}
