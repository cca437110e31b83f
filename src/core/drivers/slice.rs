//! `o<offset>[:<length>]`: a byte range of the parent
//!
//! Without a length the slice runs to the end of the parent. A length
//! reaching past the parent is clamped to it.

use super::require_parent;
use crate::core::layer::{resolve_seek, Layer};
use crate::core::registry::DriverContext;
use crate::error::LayerError;
use std::io::{self, Read, Seek, SeekFrom};

pub const SPECIFIER: char = 'o';

/// Window `[start, start + len)` over a parent layer
pub struct SliceLayer {
    parent: Box<dyn Layer>,
    start: u64,
    len: u64,
    pos: u64,
}

impl SliceLayer {
    pub fn new(parent: Box<dyn Layer>, start: u64, len: Option<u64>) -> Self {
        let available = parent.size().saturating_sub(start);
        let len = len.map_or(available, |len| len.min(available));
        SliceLayer {
            parent,
            start,
            len,
            pos: 0,
        }
    }
}

impl Read for SliceLayer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.len - self.pos).unwrap_or(usize::MAX));
        self.parent.seek(SeekFrom::Start(self.start + self.pos))?;
        let n = self.parent.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SliceLayer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.len)?;
        Ok(self.pos)
    }
}

impl Layer for SliceLayer {
    fn size(&self) -> u64 {
        self.len
    }
}

/// Parse `offset[:length]`
pub fn parse_params(params: &str) -> Result<(u64, Option<u64>), LayerError> {
    let bad = |reason: &str| LayerError::invalid_params(SPECIFIER, params, reason);

    let (offset, length) = match params.split_once(':') {
        Some((offset, length)) => (offset, Some(length)),
        None => (params, None),
    };
    let offset = offset.parse::<u64>().map_err(|_| bad("offset is not an integer"))?;
    let length = length
        .map(|l| l.parse::<u64>().map_err(|_| bad("length is not an integer")))
        .transpose()?;
    Ok((offset, length))
}

pub fn open(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
    params: &str,
) -> Result<Box<dyn Layer>, LayerError> {
    let parent = require_parent(ctx, parent)?;
    let (offset, length) = parse_params(params)?;

    if offset > parent.size() {
        return Err(LayerError::invalid_params(
            SPECIFIER,
            params,
            format!("offset past end of parent ({} bytes)", parent.size()),
        ));
    }

    Ok(Box::new(SliceLayer::new(parent, offset, length)))
}
