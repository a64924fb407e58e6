//! Streaming zlib layer for inbound traffic
//!
//! The server compresses its whole outbound stream with one deflate context
//! and flushes with `Z_SYNC_FLUSH` after every write. The client keeps one
//! inflate context per connection and feeds it each read as it arrives, so
//! chunk boundaries never have to line up with compressed blocks.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use gamelink_core::{LinkError, Result};
use tracing::{error, trace};

/// Inflate side of the stream, owned by a connection
#[derive(Debug)]
pub struct InflateStream {
    inner: Decompress,
}

impl InflateStream {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(true),
        }
    }

    /// Inflate `input` onto the end of `out`, reserving `grow` bytes at a
    /// time. Returns the number of bytes produced.
    pub fn inflate(&mut self, input: &[u8], out: &mut Vec<u8>, grow: usize) -> Result<usize> {
        let start = out.len();
        let grow = grow.max(64);
        let mut consumed = 0;

        loop {
            out.reserve(grow);
            let total_in = self.inner.total_in();
            let status = self
                .inner
                .decompress_vec(&input[consumed..], out, FlushDecompress::Sync)
                .map_err(|e| {
                    error!("Inflate failed after {} compressed bytes: {}", self.inner.total_in(), e);
                    LinkError::Compression(e.to_string())
                })?;
            consumed += (self.inner.total_in() - total_in) as usize;

            let output_full = out.len() == out.capacity();
            match status {
                Status::StreamEnd => break,
                Status::BufError if !output_full => break,
                _ if consumed >= input.len() && !output_full => break,
                _ => {}
            }
        }

        if consumed < input.len() {
            error!("Inflate stopped with {} of {} bytes unused", input.len() - consumed, input.len());
            return Err(LinkError::Compression(format!(
                "{} trailing bytes after end of stream",
                input.len() - consumed
            )));
        }
        trace!("Inflated {} bytes into {}", input.len(), out.len() - start);
        Ok(out.len() - start)
    }

    /// Total compressed bytes consumed since creation
    pub fn total_in(&self) -> u64 {
        self.inner.total_in()
    }

    pub fn total_out(&self) -> u64 {
        self.inner.total_out()
    }
}

impl Default for InflateStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Deflate side of the stream, as the server runs it
#[derive(Debug)]
pub struct DeflateStream {
    inner: Compress,
}

impl DeflateStream {
    pub fn new(level: Compression) -> Self {
        Self {
            inner: Compress::new(level, true),
        }
    }

    /// Compress `input` and sync-flush so the peer can decode everything so far
    pub fn deflate(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let mut consumed = 0;

        loop {
            out.reserve(out.capacity().max(64));
            let total_in = self.inner.total_in();
            self.inner
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| {
                    error!("Deflate failed: {}", e);
                    LinkError::Compression(e.to_string())
                })?;
            consumed += (self.inner.total_in() - total_in) as usize;

            if consumed >= input.len() && out.len() < out.capacity() {
                break;
            }
        }
        Ok(out)
    }
}

impl Default for DeflateStream {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_across_writes() {
        let mut deflate = DeflateStream::default();
        let mut inflate = InflateStream::new();
        let mut decoded = Vec::new();

        let first = b"Hello, World! This is a test of the compression system.".repeat(4);
        let second = b"A second write shares the same dictionary".to_vec();

        let chunk = deflate.deflate(&first).unwrap();
        assert_eq!(inflate.inflate(&chunk, &mut decoded, 16).unwrap(), first.len());
        let chunk = deflate.deflate(&second).unwrap();
        assert_eq!(inflate.inflate(&chunk, &mut decoded, 16).unwrap(), second.len());

        assert_eq!(&decoded[..first.len()], &first[..]);
        assert_eq!(&decoded[first.len()..], &second[..]);
        assert_eq!(inflate.total_out(), (first.len() + second.len()) as u64);
    }

    #[test]
    fn test_split_chunk() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();
        let compressed = DeflateStream::default().deflate(&payload).unwrap();

        let mut inflate = InflateStream::new();
        let mut decoded = Vec::new();
        let (a, b) = compressed.split_at(compressed.len() / 3);
        inflate.inflate(a, &mut decoded, 128).unwrap();
        inflate.inflate(b, &mut decoded, 128).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let mut inflate = InflateStream::new();
        let mut decoded = Vec::new();
        let result = inflate.inflate(&[0xFF, 0xFF, 0xFF, 0xFF], &mut decoded, 64);
        assert!(matches!(result, Err(LinkError::Compression(_))));
    }
}
