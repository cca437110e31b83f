//! Specifier → driver factory registry
//!
//! Built once by the caller and injected into the resolver. There is no
//! global registration: two cases can carry different driver sets.

use crate::config::VfsConfig;
use crate::core::address::InodeAddress;
use crate::core::cache::SourceCache;
use crate::core::drivers;
use crate::core::layer::Layer;
use crate::core::store::CaseStore;
use crate::error::LayerError;
use std::collections::HashMap;

/// Everything a driver factory may consult while opening a layer
pub struct DriverContext<'a> {
    pub store: &'a dyn CaseStore,
    pub cache: &'a SourceCache,
    pub config: &'a VfsConfig,
    /// Full address being resolved
    pub address: &'a InodeAddress,
    /// Index of the segment being opened
    pub index: usize,
}

impl<'a> DriverContext<'a> {
    pub fn specifier(&self) -> char {
        self.address.segments()[self.index].specifier
    }
}

/// Builds a layer from its parent (`None` for segment 0) and params
pub type LayerFactory = Box<
    dyn Fn(&DriverContext<'_>, Option<Box<dyn Layer>>, &str) -> Result<Box<dyn Layer>, LayerError>
        + Send
        + Sync,
>;

/// Maps one-character specifiers to layer factories
#[derive(Default)]
pub struct LayerDriverRegistry {
    factories: HashMap<char, LayerFactory>,
}

impl LayerDriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in driver
    pub fn with_standard_drivers() -> Self {
        let mut registry = Self::new();
        drivers::register_standard(&mut registry);
        registry
    }

    /// Register a factory, returning the one it replaced
    pub fn register<F>(&mut self, specifier: char, factory: F) -> Option<LayerFactory>
    where
        F: Fn(&DriverContext<'_>, Option<Box<dyn Layer>>, &str) -> Result<Box<dyn Layer>, LayerError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(specifier, Box::new(factory))
    }

    pub fn get(&self, specifier: char) -> Option<&LayerFactory> {
        self.factories.get(&specifier)
    }

    pub fn contains(&self, specifier: char) -> bool {
        self.factories.contains_key(&specifier)
    }

    /// Registered specifiers, sorted
    pub fn specifiers(&self) -> Vec<char> {
        let mut all: Vec<char> = self.factories.keys().copied().collect();
        all.sort_unstable();
        all
    }
}

impl std::fmt::Debug for LayerDriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerDriverRegistry")
            .field("specifiers", &self.specifiers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layer::MemoryLayer;

    #[test]
    fn test_standard_drivers_registered() {
        let registry = LayerDriverRegistry::with_standard_drivers();
        assert_eq!(
            registry.specifiers(),
            vec!['D', 'G', 'I', 'M', 'S', 'U', 'c', 'o']
        );
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = LayerDriverRegistry::new();
        assert!(registry
            .register('X', |_, _, _| Ok(Box::new(MemoryLayer::new(vec![1]))))
            .is_none());
        assert!(registry
            .register('X', |_, _, _| Ok(Box::new(MemoryLayer::new(vec![2]))))
            .is_some());
        assert!(registry.contains('X'));
        assert!(!registry.contains('Y'));
    }
}
