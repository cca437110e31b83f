//! Built-in layer drivers
//!
//! | Specifier | Kind      | Params                  | Layer                          |
//! |-----------|-----------|-------------------------|--------------------------------|
//! | `I`       | root      | source name             | mapped IO source               |
//! | `M`       | root      | mounted file id         | real file passthrough          |
//! | `D`       | transform | inode number            | block-mapped file (extents)    |
//! | `U`       | transform | range key               | unallocated space              |
//! | `S`       | transform | `id` or `id/id/...`     | reassembled TCP stream         |
//! | `o`       | transform | `offset[:length]`       | byte-range slice               |
//! | `c`       | transform | ignored                 | HTTP chunked-transfer decode   |
//! | `G`       | transform | ignored                 | gzip decode                    |

pub mod chunked;
pub mod gzip;
pub mod mounted;
pub mod physical;
pub mod slice;
pub mod source;
pub mod stream;
pub mod unallocated;

use crate::core::layer::Layer;
use crate::core::registry::{DriverContext, LayerDriverRegistry};
use crate::error::LayerError;

/// Register every built-in driver under its specifier
pub fn register_standard(registry: &mut LayerDriverRegistry) {
    registry.register(source::SPECIFIER, source::open);
    registry.register(mounted::SPECIFIER, mounted::open);
    registry.register(physical::SPECIFIER, physical::open);
    registry.register(unallocated::SPECIFIER, unallocated::open);
    registry.register(stream::SPECIFIER, stream::open);
    registry.register(slice::SPECIFIER, slice::open);
    registry.register(chunked::SPECIFIER, chunked::open);
    registry.register(gzip::SPECIFIER, gzip::open);
}

/// Transform drivers need the layer below them
pub(crate) fn require_parent(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
) -> Result<Box<dyn Layer>, LayerError> {
    parent.ok_or_else(|| LayerError::MissingParent(ctx.specifier()))
}

/// Root drivers must be segment 0
pub(crate) fn reject_parent(
    ctx: &DriverContext<'_>,
    parent: Option<Box<dyn Layer>>,
) -> Result<(), LayerError> {
    match parent {
        Some(_) => Err(LayerError::UnexpectedParent(ctx.specifier())),
        None => Ok(()),
    }
}

pub(crate) fn parse_u64(specifier: char, params: &str, what: &str) -> Result<u64, LayerError> {
    params
        .trim()
        .parse::<u64>()
        .map_err(|e| LayerError::invalid_params(specifier, params, format!("{}: {}", what, e)))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for driver tests

    use crate::config::VfsConfig;
    use crate::core::address::InodeAddress;
    use crate::core::cache::SourceCache;
    use crate::core::layer::{read_to_vec, Layer, MemoryLayer};
    use crate::core::registry::DriverContext;
    use crate::core::store::MemoryStore;
    use crate::error::LayerError;

    pub struct Fixture {
        pub store: MemoryStore,
        pub cache: SourceCache,
        pub config: VfsConfig,
    }

    impl Fixture {
        pub fn new() -> Self {
            Fixture {
                store: MemoryStore::new(),
                cache: SourceCache::new(4),
                config: VfsConfig::default(),
            }
        }

        /// Run a factory as segment 1 of `address` over an in-memory parent
        pub fn open_over<F>(
            &self,
            address: &str,
            parent: Option<Vec<u8>>,
            factory: F,
        ) -> Result<Box<dyn Layer>, LayerError>
        where
            F: Fn(&DriverContext<'_>, Option<Box<dyn Layer>>, &str) -> Result<Box<dyn Layer>, LayerError>,
        {
            let address = InodeAddress::parse(address).unwrap();
            let index = address.len() - 1;
            let ctx = DriverContext {
                store: &self.store,
                cache: &self.cache,
                config: &self.config,
                address: &address,
                index,
            };
            let parent = parent.map(|bytes| Box::new(MemoryLayer::new(bytes)) as Box<dyn Layer>);
            factory(&ctx, parent, &address.last().params)
        }
    }

    pub fn read_all(layer: &mut Box<dyn Layer>) -> Vec<u8> {
        read_to_vec(layer.as_mut()).unwrap()
    }
}
