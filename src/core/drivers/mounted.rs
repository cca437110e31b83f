//! `M<id>`: passthrough to a real file on a mounted filesystem
//!
//! Relative paths recorded in the store are resolved against
//! `mount_root`. The file is read directly rather than mapped.

use super::{parse_u64, reject_parent};
use crate::core::layer::{resolve_seek, Layer};
use crate::core::registry::DriverContext;
use crate::error::LayerError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub const SPECIFIER: char = 'M';

/// Layer over an open file handle
#[derive(Debug)]
pub struct FileLayer {
    file: File,
    size: u64,
    pos: u64,
}

impl FileLayer {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(FileLayer { file, size, pos: 0 })
    }
}

impl Read for FileLayer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(self.pos))?;
        let n = self.file.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for FileLayer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.size)?;
        Ok(self.pos)
    }
}

impl Layer for FileLayer {
    fn size(&self) -> u64 {
        self.size
    }
}

pub fn open(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
    params: &str,
) -> Result<Box<dyn Layer>, LayerError> {
    reject_parent(ctx, parent)?;
    let id = parse_u64(SPECIFIER, params, "mounted file id")?;

    let recorded = ctx.store.mounted_path(id)?;
    let path = match &ctx.config.mount_root {
        Some(root) if recorded.is_relative() => root.join(&recorded),
        _ => recorded,
    };

    Ok(Box::new(FileLayer::open(&path)?))
}
