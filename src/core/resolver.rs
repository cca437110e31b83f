//! Address resolution
//!
//! Walks an address left to right, opening each segment on top of the
//! layer produced by the previous one. The walk is an explicit loop with a
//! depth bound, and every specifier is checked against the registry before
//! any driver runs, so an address that cannot be resolved never opens
//! anything.

use crate::config::VfsConfig;
use crate::core::address::InodeAddress;
use crate::core::cache::SourceCache;
use crate::core::layer::Layer;
use crate::core::registry::{DriverContext, LayerDriverRegistry};
use crate::core::store::CaseStore;
use crate::error::{AddressParseError, OpenError};
use std::sync::Arc;
use tracing::debug;

/// Materializes layers for addresses
#[derive(Clone)]
pub struct VfsResolver {
    registry: Arc<LayerDriverRegistry>,
    store: Arc<dyn CaseStore>,
    cache: Arc<SourceCache>,
    config: Arc<VfsConfig>,
}

impl VfsResolver {
    pub fn new(
        registry: Arc<LayerDriverRegistry>,
        store: Arc<dyn CaseStore>,
        cache: Arc<SourceCache>,
        config: Arc<VfsConfig>,
    ) -> Self {
        VfsResolver {
            registry,
            store,
            cache,
            config,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.config.max_depth
    }

    pub fn registry(&self) -> &LayerDriverRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Parse and open a textual address
    pub fn open_str(&self, address: &str) -> Result<Box<dyn Layer>, OpenError> {
        self.open(&InodeAddress::parse(address)?)
    }

    /// Open the full layer stack named by `address`
    pub fn open(&self, address: &InodeAddress) -> Result<Box<dyn Layer>, OpenError> {
        let depth = address.len();
        let max = self.config.max_depth;
        if depth > max {
            return Err(OpenError::DepthExceeded { depth, max });
        }

        for (index, segment) in address.segments().iter().enumerate() {
            if !self.registry.contains(segment.specifier) {
                return Err(OpenError::UnknownSpecifier {
                    index,
                    specifier: segment.specifier,
                });
            }
        }

        let mut current: Option<Box<dyn Layer>> = None;
        for (index, segment) in address.segments().iter().enumerate() {
            let factory =
                self.registry
                    .get(segment.specifier)
                    .ok_or(OpenError::UnknownSpecifier {
                        index,
                        specifier: segment.specifier,
                    })?;

            let ctx = DriverContext {
                store: self.store.as_ref(),
                cache: &self.cache,
                config: &self.config,
                address,
                index,
            };

            let layer = factory(&ctx, current.take(), &segment.params).map_err(|source| {
                OpenError::LayerFailed {
                    index,
                    segment: segment.to_string(),
                    source,
                }
            })?;
            debug!("Opened segment {} '{}' ({} bytes)", index, segment, layer.size());
            current = Some(layer);
        }

        current.ok_or(OpenError::Parse(AddressParseError::Empty))
    }
}

impl std::fmt::Debug for VfsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VfsResolver")
            .field("registry", &self.registry)
            .field("max_depth", &self.config.max_depth)
            .finish()
    }
}
