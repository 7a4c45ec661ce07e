use async_trait::async_trait;
use reqwest::Client;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use super::ReadAt;
use crate::error::{ExtractError, Result};

/// HTTP Range reader for remote ZIP archives.
///
/// Sends a HEAD request up front to confirm Range support and learn the
/// archive size, then serves `read_at` calls as `bytes=start-end` Range
/// requests. Transient connect/timeout failures are retried with a
/// growing delay.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeReader {
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(http_err)?;

        let resp = client.head(&url).send().await.map_err(http_err)?;

        if !resp.status().is_success() {
            return Err(ExtractError::InvalidArchive(format!(
                "HTTP request failed with status: {}",
                resp.status()
            )));
        }

        // Range support is required: without it we cannot read the
        // central directory from the tail of the archive.
        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");

        if !accept_ranges.contains("bytes") {
            return Err(ExtractError::InvalidArchive(
                "remote server does not support Range requests".into(),
            ));
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                ExtractError::InvalidArchive("remote server did not return Content-Length".into())
            })?;

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retry: 10,
        })
    }

    /// Total bytes transferred from the network so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

fn http_err(e: reqwest::Error) -> ExtractError {
    ExtractError::Io(io::Error::other(e))
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        // Offsets at or past EOF are reachable through hostile archive
        // metadata; they are an empty read, not a Range request.
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = offset + buf.len() as u64 - 1;
        let end = end.min(self.size - 1);
        let expected_size = (end - offset + 1) as usize;

        let mut received = 0;
        let mut retry_count = 0;

        while received < expected_size {
            let current_start = offset + received as u64;
            let range = format!("bytes={}-{}", current_start, end);

            let result = self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        return Err(ExtractError::Io(io::Error::other(format!(
                            "HTTP request failed with status: {}",
                            resp.status()
                        ))));
                    }

                    let bytes = resp.bytes().await.map_err(http_err)?;
                    let chunk_len = bytes.len().min(expected_size - received);
                    buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
                    received += chunk_len;

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(ExtractError::Io(io::Error::other("max retries exceeded")));
                    }
                    warn!(retry = retry_count, max = self.max_retry, error = %e, "connection error, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(http_err(e)),
            }
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer every request as a HEAD response advertising Range
    /// support and the given size. Enough for constructing a reader;
    /// the tests below never issue a GET.
    async fn serve_head_only(size: u64) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let mut req = [0u8; 1024];
                let _ = stream.read(&mut req).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nAccept-Ranges: bytes\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    size
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{}/archive.zip", addr)
    }

    #[tokio::test]
    async fn read_at_or_past_end_is_an_empty_read() {
        let url = serve_head_only(10).await;
        let reader = HttpRangeReader::new(url).await.unwrap();
        assert_eq!(reader.size(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(10, &mut buf).await.unwrap(), 0);
        assert_eq!(reader.read_at(u64::MAX, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_remote_source_reads_zero() {
        let url = serve_head_only(0).await;
        let reader = HttpRangeReader::new(url).await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(0, &mut buf).await.unwrap(), 0);
    }
}
