//! `I<name>`: a named IO source (disk image, capture file)
//!
//! The store maps the name to a path; the mapping comes from the shared
//! [`SourceCache`](crate::core::cache::SourceCache).

use super::reject_parent;
use crate::core::layer::{Layer, MemoryLayer};
use crate::core::registry::DriverContext;
use crate::error::LayerError;

pub const SPECIFIER: char = 'I';

pub fn open(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
    params: &str,
) -> Result<Box<dyn Layer>, LayerError> {
    reject_parent(ctx, parent)?;
    if params.is_empty() {
        return Err(LayerError::invalid_params(SPECIFIER, params, "missing source name"));
    }

    let path = ctx.store.source_path(params)?;
    let bytes = ctx.cache.open(&path)?;
    Ok(Box::new(MemoryLayer::new(bytes)))
}
