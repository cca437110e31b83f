//! Case façade
//!
//! Ties a [`CaseStore`], a driver registry and the source cache together
//! behind one handle, and hosts the workflows that write back into the
//! case: registering nodes, committing reassembled streams and carving.

use crate::config::VfsConfig;
use crate::core::address::{InodeAddress, Segment};
use crate::core::cache::SourceCache;
use crate::core::carver::{CancellationToken, SignatureCarver};
use crate::core::drivers::{slice, stream};
use crate::core::layer::{read_to_vec, Layer};
use crate::core::reassembly::{Connection, SegmentRecord, StreamReassembler};
use crate::core::registry::LayerDriverRegistry;
use crate::core::resolver::VfsResolver;
use crate::core::store::{CaseStore, MemoryStore, SqliteStore, VfsNode};
use crate::error::{Result, StoreError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DIGEST_CHUNK: usize = 64 * 1024;

/// An open forensic case
#[derive(Clone)]
pub struct Case {
    resolver: VfsResolver,
    store: Arc<dyn CaseStore>,
    config: Arc<VfsConfig>,
}

impl Case {
    /// In-memory case with the standard drivers and default configuration
    pub fn in_memory() -> Self {
        let store: Arc<dyn CaseStore> = Arc::new(MemoryStore::new());
        Self::assemble(
            store,
            LayerDriverRegistry::with_standard_drivers(),
            VfsConfig::default(),
        )
    }

    pub fn builder() -> CaseBuilder {
        CaseBuilder::new()
    }

    fn assemble(store: Arc<dyn CaseStore>, registry: LayerDriverRegistry, config: VfsConfig) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(SourceCache::new(config.source_cache_capacity));
        let resolver = VfsResolver::new(
            Arc::new(registry),
            Arc::clone(&store),
            cache,
            Arc::clone(&config),
        );
        Case {
            resolver,
            store,
            config,
        }
    }

    pub fn store(&self) -> &dyn CaseStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn resolver(&self) -> &VfsResolver {
        &self.resolver
    }

    pub fn open(&self, address: &InodeAddress) -> Result<Box<dyn Layer>> {
        Ok(self.resolver.open(address)?)
    }

    pub fn open_str(&self, address: &str) -> Result<Box<dyn Layer>> {
        Ok(self.resolver.open_str(address)?)
    }

    /// Materialize the full contents of an address
    pub fn read_all(&self, address: &InodeAddress) -> Result<Vec<u8>> {
        let mut layer = self.open(address)?;
        Ok(read_to_vec(layer.as_mut())?)
    }

    /// Lowercase hex SHA-256 of the contents of an address
    pub fn digest(&self, address: &InodeAddress) -> Result<String> {
        let mut layer = self.open(address)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; DIGEST_CHUNK];
        loop {
            let n = match layer.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
        }
        Ok(hasher
            .finalize()
            .iter()
            .fold(String::with_capacity(64), |mut out, byte| {
                let _ = write!(out, "{:02x}", byte);
                out
            }))
    }

    /// Open `address` to check it resolves, then record it under `path`
    pub fn create_node(&self, address: &InodeAddress, path: &str) -> Result<VfsNode> {
        let layer = self.open(address)?;
        let node = VfsNode {
            address: address.clone(),
            path: path.to_string(),
            size: Some(layer.size()),
        };
        self.store.register_node(&node)?;
        debug!("Registered node {} at {}", node.address, node.path);
        Ok(node)
    }

    pub fn nodes(&self) -> Result<Vec<VfsNode>> {
        Ok(self.store.nodes()?)
    }

    /// Path of an existing node, or the address text for unnamed layers
    fn display_path(&self, address: &InodeAddress) -> Result<String> {
        Ok(match self.store.node(address)? {
            Some(node) => node.path,
            None => address.to_string(),
        })
    }

    /// Carve `address` and register one slice node per hit.
    ///
    /// Nodes registered before a cancellation or read error are kept; the
    /// error is returned afterwards.
    pub fn carve(
        &self,
        address: &InodeAddress,
        token: &CancellationToken,
        extensions: &[String],
    ) -> Result<Vec<VfsNode>> {
        let layer = self.open(address)?;
        let size = layer.size();
        let base_path = self.display_path(address)?;
        let carver = SignatureCarver::with_defaults(&self.config.carve)?.with_extensions(extensions);

        info!("Carving {} ({} bytes) for {:?}", address, size, carver.extensions());
        let mut nodes = Vec::new();
        for hit in carver.scan(layer, token.clone()) {
            let hit = match hit {
                Ok(hit) => hit,
                Err(e) => {
                    warn!("Carving {} stopped after {} hits: {}", address, nodes.len(), e);
                    return Err(e.into());
                }
            };
            let node = VfsNode {
                address: address.extend(Segment::new(
                    slice::SPECIFIER,
                    format!("{}:{}", hit.offset, hit.length),
                ))?,
                path: format!("{}/{}.{}", base_path, hit.offset, hit.type_tag),
                size: Some(hit.length.min(size.saturating_sub(hit.offset))),
            };
            self.store.register_node(&node)?;
            nodes.push(node);
        }
        info!("Carved {} files from {}", nodes.len(), address);
        Ok(nodes)
    }

    /// Reassembler configured from this case
    pub fn reassembler(&self) -> StreamReassembler {
        StreamReassembler::new(&self.config.reassembly)
    }

    /// Persist every connection of `reassembler` and register one stream
    /// node per direction on top of `capture`
    ///
    /// Reassembler ids are mapped onto case ids: a connection already stored
    /// with the same record and segment table keeps its id, any other
    /// connection whose id is taken gets a fresh one. Committing the same
    /// reassembler twice is a no-op and earlier streams never change.
    pub fn commit_streams(
        &self,
        reassembler: &StreamReassembler,
        capture: &InodeAddress,
    ) -> Result<Vec<VfsNode>> {
        let base_path = self.display_path(capture)?;
        let connections = reassembler.connections();
        let ids = self.assign_connection_ids(reassembler, &connections)?;

        let mut nodes = Vec::new();
        for connection in connections {
            let id = ids[&connection.id];
            let segments: Vec<SegmentRecord> = reassembler
                .segments(connection.id)?
                .into_iter()
                .map(|segment| SegmentRecord {
                    connection_id: id,
                    ..segment
                })
                .collect();
            let connection = Connection {
                id,
                peer: connection.peer.and_then(|peer| ids.get(&peer).copied()),
                ..connection
            };
            self.store.insert_connection(&connection)?;
            self.store.insert_segments(&segments)?;

            let address = capture.extend(Segment::new(stream::SPECIFIER, id.to_string()))?;
            let size = self.open(&address)?.size();
            let node = VfsNode {
                address,
                path: format!("{}/{}", base_path, connection.name()),
                size: Some(size),
            };
            self.store.register_node(&node)?;
            nodes.push(node);
        }
        info!("Committed {} streams from {}", nodes.len(), capture);
        Ok(nodes)
    }

    /// Reassembler id -> case id
    fn assign_connection_ids(
        &self,
        reassembler: &StreamReassembler,
        connections: &[Connection],
    ) -> Result<HashMap<u64, u64>> {
        let local_next = connections.iter().map(|c| c.id + 1).max().unwrap_or(1);
        let mut next = self.store.next_connection_id()?.max(local_next);
        let mut ids = HashMap::with_capacity(connections.len());

        for connection in connections {
            let keep = match self.store.connection(connection.id) {
                Ok(stored) => {
                    stored == *connection
                        && self.store.segments(connection.id)?
                            == reassembler.segments(connection.id)?
                }
                Err(StoreError::NotFound(_)) => true,
                Err(e) => return Err(e.into()),
            };
            let id = if keep {
                connection.id
            } else {
                let id = next;
                next += 1;
                debug!("Connection {} renumbered to {}", connection.id, id);
                id
            };
            ids.insert(connection.id, id);
        }
        Ok(ids)
    }
}

impl std::fmt::Debug for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Case")
            .field("resolver", &self.resolver)
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`Case`]
///
/// ```rust,no_run
/// use layerfs::{CaseBuilder, VfsConfig};
///
/// # fn main() -> layerfs::Result<()> {
/// let case = CaseBuilder::new()
///     .sqlite("case.db")
///     .config(VfsConfig::load("case.toml")?)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct CaseBuilder {
    store: Option<Arc<dyn CaseStore>>,
    sqlite: Option<PathBuf>,
    config: VfsConfig,
    registry: Option<LayerDriverRegistry>,
}

impl CaseBuilder {
    pub fn new() -> Self {
        CaseBuilder {
            store: None,
            sqlite: None,
            config: VfsConfig::default(),
            registry: None,
        }
    }

    /// Use an existing store
    pub fn store(mut self, store: Arc<dyn CaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Open (or create) a SQLite case database
    pub fn sqlite<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.sqlite = Some(path.into());
        self
    }

    pub fn config(mut self, config: VfsConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the standard driver set
    pub fn registry(mut self, registry: LayerDriverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Case> {
        self.config.validate()?;

        let store: Arc<dyn CaseStore> = match (self.store, self.sqlite) {
            (Some(store), _) => store,
            (None, Some(path)) => {
                info!("Opening case database {:?}", path);
                Arc::new(SqliteStore::open(&path)?)
            }
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let registry = self
            .registry
            .unwrap_or_else(LayerDriverRegistry::with_standard_drivers);

        Ok(Case::assemble(store, registry, self.config))
    }
}

impl Default for CaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
