//! `c`: HTTP/1.1 chunked transfer decoding
//!
//! Decoding is lossy by nature of the evidence: a malformed chunk-size line
//! or a truncated chunk ends decoding, keeping everything decoded so far.

use super::require_parent;
use crate::core::layer::{read_to_vec, Layer, MemoryLayer};
use crate::core::registry::DriverContext;
use crate::error::LayerError;
use tracing::debug;

pub const SPECIFIER: char = 'c';

const CRLF: &[u8] = b"\r\n";

/// Result of decoding a chunked body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dechunked {
    pub data: Vec<u8>,
    /// The terminating zero-length chunk was reached
    pub complete: bool,
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(CRLF.len())
        .position(|w| w == CRLF)
        .map(|p| from + p)
}

fn parse_size_line(line: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(line).ok()?;
    // Chunk extensions follow a ';'
    let hex = text.split(';').next()?.trim();
    if hex.is_empty() {
        return None;
    }
    usize::from_str_radix(hex, 16).ok()
}

/// Decode a chunked body, producing at most `limit` bytes
pub fn decode(data: &[u8], limit: usize) -> Dechunked {
    let mut out = Vec::new();
    let mut pos = 0usize;

    loop {
        let Some(eol) = find_crlf(data, pos) else {
            debug!("No chunk-size line at offset {}, stopping", pos);
            break;
        };
        let Some(size) = parse_size_line(&data[pos..eol]) else {
            debug!(
                "Expected chunk length at offset {}, found {:?}. Losing sync.",
                pos,
                String::from_utf8_lossy(&data[pos..eol])
            );
            break;
        };
        if size == 0 {
            return Dechunked {
                data: out,
                complete: true,
            };
        }

        let start = eol + CRLF.len();
        let end = start.saturating_add(size);
        let available = data.len().min(end);
        let room = limit.saturating_sub(out.len());
        let take = (available - start.min(available)).min(room);
        out.extend_from_slice(&data[start..start + take]);

        if end > data.len() {
            debug!("Chunk at offset {} truncated ({} of {} bytes)", pos, take, size);
            break;
        }
        if out.len() >= limit {
            debug!("Chunked output reached limit of {} bytes", limit);
            break;
        }
        pos = end + CRLF.len();
    }

    Dechunked {
        data: out,
        complete: false,
    }
}

pub fn open(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
    _params: &str,
) -> Result<Box<dyn Layer>, LayerError> {
    let mut parent = require_parent(ctx, parent)?;
    let raw = read_to_vec(parent.as_mut())?;
    let limit = usize::try_from(ctx.config.max_decoded_size).unwrap_or(usize::MAX);
    let decoded = decode(&raw, limit);
    debug!(
        "Dechunked {} bytes into {} (complete: {})",
        raw.len(),
        decoded.data.len(),
        decoded.complete
    );
    Ok(Box::new(MemoryLayer::new(decoded.data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::drivers::testing::{read_all, Fixture};

    #[test]
    fn test_decode_complete() {
        let body = b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n";
        let out = decode(body, usize::MAX);
        assert_eq!(out.data, b"hello, world");
        assert!(out.complete);
    }

    #[test]
    fn test_decode_extensions_and_case() {
        let body = b"A;name=value\r\n0123456789\r\n0\r\n\r\n";
        let out = decode(body, usize::MAX);
        assert_eq!(out.data, b"0123456789");
        assert!(out.complete);
    }

    #[test]
    fn test_decode_loses_sync() {
        let body = b"3\r\nabc\r\nzz\r\nmore\r\n0\r\n\r\n";
        let out = decode(body, usize::MAX);
        assert_eq!(out.data, b"abc");
        assert!(!out.complete);
    }

    #[test]
    fn test_decode_truncated_chunk() {
        let out = decode(b"10\r\nshort", usize::MAX);
        assert_eq!(out.data, b"short");
        assert!(!out.complete);
    }

    #[test]
    fn test_decode_limit() {
        let out = decode(b"5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n", 7);
        assert_eq!(out.data, b"hellowo");
    }

    #[test]
    fn test_open_layer() {
        let fx = Fixture::new();
        let body = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let mut layer = fx.open_over("Icap|S1|c0", Some(body), open).unwrap();
        assert_eq!(layer.size(), 9);
        assert_eq!(read_all(&mut layer), b"Wikipedia");
    }
}
