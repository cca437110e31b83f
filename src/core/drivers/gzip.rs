//! `G`: gzip decoding
//!
//! Handles multi-member streams. A corrupt or truncated stream keeps the
//! bytes inflated before the damage; only a stream that fails before
//! producing anything is an error.

use super::require_parent;
use crate::core::layer::{read_to_vec, Layer, MemoryLayer};
use crate::core::registry::DriverContext;
use crate::error::LayerError;
use flate2::read::MultiGzDecoder;
use std::io::{self, Read};
use tracing::debug;

pub const SPECIFIER: char = 'G';

const STEP: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inflated {
    pub data: Vec<u8>,
    /// The stream ended cleanly (or the limit was reached) without error
    pub complete: bool,
}

/// Inflate `data`, producing at most `limit` bytes
pub fn decode(data: &[u8], limit: usize) -> Result<Inflated, LayerError> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut out = Vec::new();
    let mut buf = vec![0u8; STEP];
    let mut failure: Option<io::Error> = None;

    while out.len() < limit {
        match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let take = n.min(limit - out.len());
                out.extend_from_slice(&buf[..take]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    match failure {
        Some(e) if out.is_empty() => Err(LayerError::Decode(format!("gzip: {}", e))),
        Some(e) => {
            debug!("Error inflating gzip stream, could only get {} bytes: {}", out.len(), e);
            Ok(Inflated {
                data: out,
                complete: false,
            })
        }
        None => Ok(Inflated {
            data: out,
            complete: true,
        }),
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
    let inflated = decode(&raw, limit)?;
    debug!(
        "Inflated {} bytes into {} (complete: {})",
        raw.len(),
        inflated.data.len(),
        inflated.complete
    );
    Ok(Box::new(MemoryLayer::new(inflated.data)))
}
