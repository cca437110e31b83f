//! In-memory case store

use super::{CaseStore, UnallocatedRange, VfsNode};
use crate::core::address::InodeAddress;
use crate::core::extent::Extent;
use crate::core::reassembly::{Connection, SegmentRecord};
use crate::error::StoreError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
struct Tables {
    block_size: Option<u64>,
    sources: HashMap<String, PathBuf>,
    extents: HashMap<u64, Vec<Extent>>,
    inode_sizes: HashMap<u64, u64>,
    resident: HashMap<u64, Vec<u8>>,
    unallocated: HashMap<u64, UnallocatedRange>,
    mounted: HashMap<u64, PathBuf>,
    connections: HashMap<u64, Connection>,
    segments: HashMap<u64, Vec<SegmentRecord>>,
    /// `(connection_id, packet_id)` of every stored segment
    segment_keys: HashSet<(u64, u64)>,
    nodes: HashMap<InodeAddress, VfsNode>,
}

/// Case store held entirely in memory, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(what: &str, key: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{} {}", what, key))
}

impl CaseStore for MemoryStore {
    fn block_size(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.tables.read().block_size)
    }

    fn set_block_size(&self, size: u64) -> Result<(), StoreError> {
        self.tables.write().block_size = Some(size);
        Ok(())
    }

    fn source_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        self.tables
            .read()
            .sources
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("source", name))
    }

    fn add_source(&self, name: &str, path: &Path) -> Result<(), StoreError> {
        self.tables
            .write()
            .sources
            .insert(name.to_string(), path.to_path_buf());
        Ok(())
    }

    fn extent_rows(&self, inode: u64) -> Result<Vec<Extent>, StoreError> {
        Ok(self.tables.read().extents.get(&inode).cloned().unwrap_or_default())
    }

    fn add_extent_rows(&self, inode: u64, rows: &[Extent]) -> Result<(), StoreError> {
        self.tables
            .write()
            .extents
            .entry(inode)
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }

    fn inode_size(&self, inode: u64) -> Result<Option<u64>, StoreError> {
        Ok(self.tables.read().inode_sizes.get(&inode).copied())
    }

    fn set_inode_size(&self, inode: u64, size: u64) -> Result<(), StoreError> {
        self.tables.write().inode_sizes.insert(inode, size);
        Ok(())
    }

    fn resident(&self, inode: u64) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.read().resident.get(&inode).cloned())
    }

    fn set_resident(&self, inode: u64, data: &[u8]) -> Result<(), StoreError> {
        self.tables.write().resident.insert(inode, data.to_vec());
        Ok(())
    }

    fn unallocated(&self, key: u64) -> Result<UnallocatedRange, StoreError> {
        self.tables
            .read()
            .unallocated
            .get(&key)
            .copied()
            .ok_or_else(|| not_found("unallocated range", key))
    }

    fn add_unallocated(&self, key: u64, range: UnallocatedRange) -> Result<(), StoreError> {
        self.tables.write().unallocated.insert(key, range);
        Ok(())
    }

    fn mounted_path(&self, id: u64) -> Result<PathBuf, StoreError> {
        self.tables
            .read()
            .mounted
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("mounted file", id))
    }

    fn add_mounted(&self, id: u64, path: &Path) -> Result<(), StoreError> {
        self.tables.write().mounted.insert(id, path.to_path_buf());
        Ok(())
    }

    fn connection(&self, id: u64) -> Result<Connection, StoreError> {
        self.tables
            .read()
            .connections
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("connection", id))
    }

    fn segments(&self, connection_id: u64) -> Result<Vec<SegmentRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .segments
            .get(&connection_id)
            .cloned()
            .unwrap_or_default())
    }

    fn next_connection_id(&self) -> Result<u64, StoreError> {
        Ok(self
            .tables
            .read()
            .connections
            .keys()
            .max()
            .map_or(1, |id| id + 1))
    }

    fn insert_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        self.tables
            .write()
            .connections
            .insert(connection.id, connection.clone());
        Ok(())
    }

    fn insert_segments(&self, segments: &[SegmentRecord]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        for segment in segments {
            if !tables
                .segment_keys
                .insert((segment.connection_id, segment.packet_id))
            {
                continue;
            }
            tables
                .segments
                .entry(segment.connection_id)
                .or_default()
                .push(*segment);
        }
        Ok(())
    }

    fn register_node(&self, node: &VfsNode) -> Result<(), StoreError> {
        self.tables
            .write()
            .nodes
            .insert(node.address.clone(), node.clone());
        Ok(())
    }

    fn node(&self, address: &InodeAddress) -> Result<Option<VfsNode>, StoreError> {
        Ok(self.tables.read().nodes.get(address).cloned())
    }

    fn nodes(&self) -> Result<Vec<VfsNode>, StoreError> {
        let tables = self.tables.read();
        let sorted: BTreeMap<(&str, String), &VfsNode> = tables
            .nodes
            .values()
            .map(|node| ((node.path.as_str(), node.address.to_string()), node))
            .collect();
        Ok(sorted.into_values().cloned().collect())
    }
}
