//! `D<inode>`: a file stored as block runs on the parent device
//!
//! Extent rows come from the store. Inodes without runs but with resident
//! data are served from that data. The file size is the recorded inode
//! size when present, otherwise the end of the last run.

use super::{parse_u64, require_parent};
use crate::core::extent::ExtentTable;
use crate::core::layer::{resolve_seek, Layer, MemoryLayer};
use crate::core::registry::DriverContext;
use crate::error::LayerError;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::debug;

pub const SPECIFIER: char = 'D';

/// Block-mapped file over a device layer
pub struct PhysicalLayer {
    device: Box<dyn Layer>,
    table: ExtentTable,
    block_size: u64,
    size: u64,
    pos: u64,
}

impl PhysicalLayer {
    pub fn new(device: Box<dyn Layer>, table: ExtentTable, block_size: u64, size: Option<u64>) -> Self {
        let size = size.unwrap_or_else(|| table.logical_len(block_size));
        PhysicalLayer {
            device,
            table,
            block_size,
            size,
            pos: 0,
        }
    }

    pub fn table(&self) -> &ExtentTable {
        &self.table
    }
}

impl Read for PhysicalLayer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.size - self.pos).unwrap_or(usize::MAX));
        let n = self
            .table
            .read_into(self.pos, &mut buf[..want], self.block_size, &mut self.device)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for PhysicalLayer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.size)?;
        Ok(self.pos)
    }
}

impl Layer for PhysicalLayer {
    fn size(&self) -> u64 {
        self.size
    }
}

pub fn open(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
    params: &str,
) -> Result<Box<dyn Layer>, LayerError> {
    let device = require_parent(ctx, parent)?;
    let inode = parse_u64(SPECIFIER, params, "inode")?;

    let rows = ctx.store.extent_rows(inode)?;
    let size = ctx.store.inode_size(inode)?;

    if rows.is_empty() {
        if let Some(mut data) = ctx.store.resident(inode)? {
            if let Some(size) = size.and_then(|s| usize::try_from(s).ok()) {
                data.truncate(size);
            }
            debug!("Inode {} served from resident data ({} bytes)", inode, data.len());
            return Ok(Box::new(MemoryLayer::new(data)));
        }
    }

    let table = ExtentTable::build(rows)?;
    let block_size = ctx
        .store
        .block_size()?
        .unwrap_or(ctx.config.default_block_size);
    debug!(
        "Inode {}: {} runs, block size {}",
        inode,
        table.runs().len(),
        block_size
    );

    Ok(Box::new(PhysicalLayer::new(device, table, block_size, size)))
}
