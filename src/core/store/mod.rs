//! Case persistence boundary
//!
//! The core only reads and writes a handful of facts about a case: block
//! size, named IO sources, extent rows, resident data, unallocated ranges,
//! mounted file paths, TCP connections with their segment tables, and the
//! registered virtual nodes. [`CaseStore`] is that narrow interface.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::core::address::InodeAddress;
use crate::core::extent::Extent;
use crate::core::reassembly::{Connection, SegmentRecord};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Byte range of unallocated space on an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnallocatedRange {
    pub offset: u64,
    /// `None` means up to the end of the image
    pub size: Option<u64>,
}

/// A registered virtual file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfsNode {
    pub address: InodeAddress,
    /// Display path within the case, e.g. `/carved/4096.jpg`
    pub path: String,
    pub size: Option<u64>,
}

/// Narrow DAO over the case database
pub trait CaseStore: Send + Sync {
    fn block_size(&self) -> Result<Option<u64>, StoreError>;
    fn set_block_size(&self, size: u64) -> Result<(), StoreError>;

    /// Path of a named IO source (disk image, capture file)
    fn source_path(&self, name: &str) -> Result<PathBuf, StoreError>;
    fn add_source(&self, name: &str, path: &Path) -> Result<(), StoreError>;

    /// Extent rows of an inode, in no particular order
    fn extent_rows(&self, inode: u64) -> Result<Vec<Extent>, StoreError>;
    fn add_extent_rows(&self, inode: u64, rows: &[Extent]) -> Result<(), StoreError>;

    fn inode_size(&self, inode: u64) -> Result<Option<u64>, StoreError>;
    fn set_inode_size(&self, inode: u64, size: u64) -> Result<(), StoreError>;

    /// Data stored inside the inode record itself, for small files
    fn resident(&self, inode: u64) -> Result<Option<Vec<u8>>, StoreError>;
    fn set_resident(&self, inode: u64, data: &[u8]) -> Result<(), StoreError>;

    fn unallocated(&self, key: u64) -> Result<UnallocatedRange, StoreError>;
    fn add_unallocated(&self, key: u64, range: UnallocatedRange) -> Result<(), StoreError>;

    fn mounted_path(&self, id: u64) -> Result<PathBuf, StoreError>;
    fn add_mounted(&self, id: u64, path: &Path) -> Result<(), StoreError>;

    fn connection(&self, id: u64) -> Result<Connection, StoreError>;
    /// Segment table of a connection in insertion order
    fn segments(&self, connection_id: u64) -> Result<Vec<SegmentRecord>, StoreError>;
    /// One past the highest stored connection id, 1 for an empty case
    fn next_connection_id(&self) -> Result<u64, StoreError>;
    fn insert_connection(&self, connection: &Connection) -> Result<(), StoreError>;
    /// Append segments; a `(connection_id, packet_id)` already stored is skipped
    fn insert_segments(&self, segments: &[SegmentRecord]) -> Result<(), StoreError>;

    /// Register (or replace) a virtual node by address
    fn register_node(&self, node: &VfsNode) -> Result<(), StoreError>;
    fn node(&self, address: &InodeAddress) -> Result<Option<VfsNode>, StoreError>;
    /// All nodes ordered by path
    fn nodes(&self) -> Result<Vec<VfsNode>, StoreError>;
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every store implementation must share

    use super::*;
    use crate::core::reassembly::Direction;

    pub fn check_all(store: &dyn CaseStore) {
        block_size(store);
        sources(store);
        extents(store);
        resident(store);
        unallocated(store);
        connections(store);
        nodes(store);
    }

    fn block_size(store: &dyn CaseStore) {
        assert_eq!(store.block_size().unwrap(), None);
        store.set_block_size(4096).unwrap();
        assert_eq!(store.block_size().unwrap(), Some(4096));
    }

    fn sources(store: &dyn CaseStore) {
        store.add_source("disk", Path::new("/evidence/disk.dd")).unwrap();
        assert_eq!(store.source_path("disk").unwrap(), PathBuf::from("/evidence/disk.dd"));
        assert!(matches!(store.source_path("nope"), Err(StoreError::NotFound(_))));
    }

    fn extents(store: &dyn CaseStore) {
        let rows = [Extent::new(100, 2, 0), Extent::new(7, 1, 2)];
        store.add_extent_rows(5, &rows).unwrap();
        let mut back = store.extent_rows(5).unwrap();
        back.sort_by_key(|e| e.logical_block_index);
        assert_eq!(back, rows.to_vec());
        assert!(store.extent_rows(6).unwrap().is_empty());

        assert_eq!(store.inode_size(5).unwrap(), None);
        store.set_inode_size(5, 2500).unwrap();
        assert_eq!(store.inode_size(5).unwrap(), Some(2500));
    }

    fn resident(store: &dyn CaseStore) {
        assert_eq!(store.resident(9).unwrap(), None);
        store.set_resident(9, b"tiny").unwrap();
        assert_eq!(store.resident(9).unwrap(), Some(b"tiny".to_vec()));
    }

    fn unallocated(store: &dyn CaseStore) {
        let bounded = UnallocatedRange {
            offset: 512,
            size: Some(1024),
        };
        let open = UnallocatedRange {
            offset: 4096,
            size: None,
        };
        store.add_unallocated(1, bounded).unwrap();
        store.add_unallocated(2, open).unwrap();
        assert_eq!(store.unallocated(1).unwrap(), bounded);
        assert_eq!(store.unallocated(2).unwrap(), open);
        assert!(matches!(store.unallocated(3), Err(StoreError::NotFound(_))));

        store.add_mounted(1, Path::new("docs/a.txt")).unwrap();
        assert_eq!(store.mounted_path(1).unwrap(), PathBuf::from("docs/a.txt"));
    }

    fn connections(store: &dyn CaseStore) {
        let conn = Connection {
            id: 7,
            src_ip: "1.2.3.4".parse().unwrap(),
            src_port: 1000,
            dst_ip: "::1".parse().unwrap(),
            dst_port: 80,
            isn: 4_000_000_000,
            direction: Direction::Reverse,
            peer: Some(6),
        };
        assert_eq!(store.next_connection_id().unwrap(), 1);
        store.insert_connection(&conn).unwrap();
        assert_eq!(store.connection(7).unwrap(), conn);
        assert_eq!(store.next_connection_id().unwrap(), 8);
        assert!(matches!(store.connection(8), Err(StoreError::NotFound(_))));

        let segs = [
            SegmentRecord {
                connection_id: 7,
                packet_id: 2,
                seq: 4_000_000_000,
                length: 10,
                packet_offset: 300,
            },
            SegmentRecord {
                connection_id: 7,
                packet_id: 1,
                seq: 4_000_000_010,
                length: 5,
                packet_offset: 100,
            },
        ];
        store.insert_segments(&segs).unwrap();
        assert_eq!(store.segments(7).unwrap(), segs.to_vec());

        // Same packets again are ignored, new ones append
        let extra = SegmentRecord {
            packet_id: 3,
            seq: 4_000_000_015,
            ..segs[1]
        };
        store.insert_segments(&[segs[0], extra, segs[1]]).unwrap();
        assert_eq!(store.segments(7).unwrap(), vec![segs[0], segs[1], extra]);
        assert!(store.segments(8).unwrap().is_empty());
    }

    fn nodes(store: &dyn CaseStore) {
        let addr = InodeAddress::parse("Idisk|o10:20").unwrap();
        let node = VfsNode {
            address: addr.clone(),
            path: "/b/10.jpg".into(),
            size: Some(20),
        };
        let other = VfsNode {
            address: InodeAddress::parse("Idisk").unwrap(),
            path: "/a/disk".into(),
            size: None,
        };
        store.register_node(&node).unwrap();
        store.register_node(&other).unwrap();
        assert_eq!(store.node(&addr).unwrap(), Some(node.clone()));

        let paths: Vec<String> = store.nodes().unwrap().into_iter().map(|n| n.path).collect();
        assert_eq!(paths, vec!["/a/disk".to_string(), "/b/10.jpg".to_string()]);

        // Re-registering replaces
        let renamed = VfsNode {
            path: "/c/renamed.jpg".into(),
            ..node
        };
        store.register_node(&renamed).unwrap();
        assert_eq!(store.nodes().unwrap().len(), 2);
        assert_eq!(store.node(&addr).unwrap().unwrap().path, "/c/renamed.jpg");
    }
}
