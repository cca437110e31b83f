//! `S<id>` / `S<id>/<id>/...`: reassembled TCP streams over a capture
//!
//! A single id reads one direction, with stream offset 0 at the ISN.
//! Several ids produce a combined view: every listed direction's segments
//! in packet order, laid end to end from offset 0.
//!
//! Bytes no segment covers read as zero, so gaps in the capture never
//! shorten a read. Where segments overlap, later segments in table order
//! win unless the overlap policy is strict, in which case conflicting
//! bytes are an [`InconsistentOverlap`](crate::error::ReassemblyError)
//! error.

use super::require_parent;
use crate::config::OverlapPolicy;
use crate::core::extent::read_full;
use crate::core::layer::{resolve_seek, Layer};
use crate::core::reassembly::{Connection, SegmentRecord};
use crate::core::registry::DriverContext;
use crate::error::{LayerError, ReassemblyError, StoreError};
use std::io::{self, Read, Seek, SeekFrom};
use tracing::debug;

pub const SPECIFIER: char = 'S';

/// Where a segment's payload lands in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    start: u64,
    length: u64,
    packet_offset: u64,
    connection_id: u64,
}

/// Linear byte stream stitched from captured segments
pub struct StreamLayer {
    capture: Box<dyn Layer>,
    /// Sorted by `start`; equal starts keep segment-table order
    placements: Vec<Placement>,
    max_length: u64,
    size: u64,
    pos: u64,
    policy: OverlapPolicy,
}

impl StreamLayer {
    /// One direction, offsets relative to the connection's ISN
    ///
    /// Segments starting before the ISN are clipped at offset 0.
    pub fn single(
        connection: &Connection,
        segments: &[SegmentRecord],
        capture: Box<dyn Layer>,
        policy: OverlapPolicy,
    ) -> Self {
        let placements = segments
            .iter()
            .filter_map(|seg| {
                let rel = seg.relative_seq(connection.isn);
                let skip = if rel < 0 { rel.unsigned_abs() } else { 0 };
                let length = u64::from(seg.length).checked_sub(skip).filter(|&l| l > 0)?;
                Some(Placement {
                    start: rel.max(0) as u64,
                    length,
                    packet_offset: seg.packet_offset + skip,
                    connection_id: seg.connection_id,
                })
            })
            .collect();
        Self::from_placements(placements, capture, policy)
    }

    /// Segments of several directions in packet order, laid end to end
    pub fn combined(
        mut segments: Vec<SegmentRecord>,
        capture: Box<dyn Layer>,
        policy: OverlapPolicy,
    ) -> Self {
        segments.sort_by_key(|seg| seg.packet_id);
        let mut offset = 0u64;
        let placements = segments
            .iter()
            .filter(|seg| seg.length > 0)
            .map(|seg| {
                let placement = Placement {
                    start: offset,
                    length: u64::from(seg.length),
                    packet_offset: seg.packet_offset,
                    connection_id: seg.connection_id,
                };
                offset += placement.length;
                placement
            })
            .collect();
        Self::from_placements(placements, capture, policy)
    }

    fn from_placements(
        mut placements: Vec<Placement>,
        capture: Box<dyn Layer>,
        policy: OverlapPolicy,
    ) -> Self {
        placements.sort_by_key(|p| p.start);
        let size = placements.iter().map(|p| p.start + p.length).max().unwrap_or(0);
        let max_length = placements.iter().map(|p| p.length).max().unwrap_or(0);
        StreamLayer {
            capture,
            placements,
            max_length,
            size,
            pos: 0,
            policy,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.placements.len()
    }

    /// Fill `buf` from stream offset `offset`
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ReassemblyError> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(usize::try_from(self.size - offset).unwrap_or(usize::MAX));
        let out = &mut buf[..n];
        out.fill(0);

        let end = offset + n as u64;
        let strict = self.policy == OverlapPolicy::Strict;
        let mut covered = if strict { vec![false; n] } else { Vec::new() };
        let mut scratch = Vec::new();

        // No placement starting before this index can reach `offset`
        let max_length = self.max_length;
        let first = self
            .placements
            .partition_point(|p| p.start.saturating_add(max_length) <= offset);

        for p in &self.placements[first..] {
            if p.start >= end {
                break;
            }
            let p_end = p.start + p.length;
            if p_end <= offset {
                continue;
            }

            let lo = p.start.max(offset);
            let hi = p_end.min(end);
            let dst = (lo - offset) as usize;
            let len = (hi - lo) as usize;

            self.capture
                .seek(SeekFrom::Start(p.packet_offset + (lo - p.start)))?;

            if !strict {
                read_full(&mut self.capture, &mut out[dst..dst + len])?;
                continue;
            }

            scratch.resize(len, 0);
            let got = read_full(&mut self.capture, &mut scratch)?;
            for i in 0..got {
                let at = dst + i;
                if covered[at] && out[at] != scratch[i] {
                    return Err(ReassemblyError::InconsistentOverlap {
                        connection: p.connection_id,
                        offset: lo + i as u64,
                    });
                }
                out[at] = scratch[i];
                covered[at] = true;
            }
        }

        Ok(n)
    }
}

impl Read for StreamLayer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for StreamLayer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.size)?;
        Ok(self.pos)
    }
}

impl Layer for StreamLayer {
    fn size(&self) -> u64 {
        self.size
    }
}

/// Parse `id` or `id/id/...`
pub fn parse_params(params: &str) -> Result<Vec<u64>, LayerError> {
    params
        .split('/')
        .map(|id| {
            id.parse::<u64>().map_err(|_| {
                LayerError::invalid_params(SPECIFIER, params, format!("bad connection id {:?}", id))
            })
        })
        .collect()
}

fn load_connection(ctx: &DriverContext<'_>, id: u64) -> Result<Connection, LayerError> {
    match ctx.store.connection(id) {
        Ok(connection) => Ok(connection),
        Err(StoreError::NotFound(_)) => Err(ReassemblyError::UnknownConnection { id }.into()),
        Err(e) => Err(e.into()),
    }
}

pub fn open(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
    params: &str,
) -> Result<Box<dyn Layer>, LayerError> {
    let capture = require_parent(ctx, parent)?;
    let ids = parse_params(params)?;
    let policy = ctx.config.reassembly.overlap_policy;

    let layer = if let [id] = ids[..] {
        let connection = load_connection(ctx, id)?;
        let segments = ctx.store.segments(id)?;
        StreamLayer::single(&connection, &segments, capture, policy)
    } else {
        let mut segments = Vec::new();
        for &id in &ids {
            load_connection(ctx, id)?;
            segments.extend(ctx.store.segments(id)?);
        }
        StreamLayer::combined(segments, capture, policy)
    };

    debug!(
        "Stream {} has {} segments, {} bytes",
        params,
        layer.segment_count(),
        layer.size()
    );
    Ok(Box::new(layer))
}
