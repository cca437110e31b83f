//! `U<key>`: a range of unallocated space on the parent image
//!
//! The unallocated scanner records `(offset, size)` per range; a missing
//! size extends the range to the end of the image.

use super::slice::SliceLayer;
use super::{parse_u64, require_parent};
use crate::core::layer::Layer;
use crate::core::registry::DriverContext;
use crate::error::LayerError;

pub const SPECIFIER: char = 'U';

pub fn open(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
    params: &str,
) -> Result<Box<dyn Layer>, LayerError> {
    let image = require_parent(ctx, parent)?;
    let key = parse_u64(SPECIFIER, params, "range key")?;
    let range = ctx.store.unallocated(key)?;

    if range.offset > image.size() {
        return Err(LayerError::invalid_params(
            SPECIFIER,
            params,
            format!(
                "range offset {} past end of image ({} bytes)",
                range.offset,
                image.size()
            ),
        ));
    }

    Ok(Box::new(SliceLayer::new(image, range.offset, range.size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::drivers::testing::{read_all, Fixture};
    use crate::core::store::{CaseStore, UnallocatedRange};
    use crate::error::StoreError;

    fn image() -> Option<Vec<u8>> {
        Some((0..64u8).collect())
    }

    #[test]
    fn test_bounded_range() {
        let fx = Fixture::new();
        fx.store
            .add_unallocated(
                1,
                UnallocatedRange {
                    offset: 8,
                    size: Some(4),
                },
            )
            .unwrap();
        let mut layer = fx.open_over("Idisk|U1", image(), open).unwrap();
        assert_eq!(read_all(&mut layer), vec![8, 9, 10, 11]);
    }

    #[test]
    fn test_range_to_end() {
        let fx = Fixture::new();
        fx.store
            .add_unallocated(
                2,
                UnallocatedRange {
                    offset: 60,
                    size: None,
                },
            )
            .unwrap();
        let mut layer = fx.open_over("Idisk|U2", image(), open).unwrap();
        assert_eq!(read_all(&mut layer), vec![60, 61, 62, 63]);
    }

    #[test]
    fn test_unknown_range() {
        let fx = Fixture::new();
        let err = fx.open_over("Idisk|U9", image(), open).unwrap_err();
        assert!(matches!(err, LayerError::Store(StoreError::NotFound(_))));
    }
}
