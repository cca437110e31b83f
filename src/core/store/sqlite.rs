//! SQLite-backed case store
//!
//! 64-bit unsigned values are stored bit-for-bit in SQLite's signed INTEGER
//! column type and cast back on read.

use super::{CaseStore, UnallocatedRange, VfsNode};
use crate::core::address::InodeAddress;
use crate::core::extent::Extent;
use crate::core::reassembly::{Connection, Direction, SegmentRecord};
use crate::error::StoreError;
use parking_lot::Mutex;
use rusqlite::{params, Connection as SqlConnection, OptionalExtension, Row};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS sources (
    name TEXT PRIMARY KEY,
    path TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS block (
    inode     INTEGER NOT NULL,
    block     INTEGER NOT NULL,
    count     INTEGER NOT NULL,
    run_index INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS block_inode ON block(inode);
CREATE TABLE IF NOT EXISTS inode (
    inode INTEGER PRIMARY KEY,
    size  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS resident (
    inode INTEGER PRIMARY KEY,
    data  BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS unallocated (
    range_key    INTEGER PRIMARY KEY,
    range_offset INTEGER NOT NULL,
    range_size   INTEGER
);
CREATE TABLE IF NOT EXISTS mounted (
    id   INTEGER PRIMARY KEY,
    path TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS connection_details (
    id        INTEGER PRIMARY KEY,
    src_ip    TEXT NOT NULL,
    src_port  INTEGER NOT NULL,
    dst_ip    TEXT NOT NULL,
    dst_port  INTEGER NOT NULL,
    isn       INTEGER NOT NULL,
    direction TEXT NOT NULL,
    peer      INTEGER
);
CREATE TABLE IF NOT EXISTS connection (
    connection_id INTEGER NOT NULL,
    packet_id     INTEGER NOT NULL,
    seq           INTEGER NOT NULL,
    length        INTEGER NOT NULL,
    packet_offset INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS connection_packet ON connection(connection_id, packet_id);
CREATE TABLE IF NOT EXISTS vfs (
    address TEXT PRIMARY KEY,
    path    TEXT NOT NULL,
    size    INTEGER
);
"#;

/// Case store persisted in a SQLite database
pub struct SqliteStore {
    conn: Mutex<SqlConnection>,
}

impl SqliteStore {
    /// Open (creating if needed) a case database on disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = SqlConnection::open(path.as_ref())?;
        debug!("Opened case database {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(SqlConnection::open_in_memory()?)
    }

    fn with_connection(conn: SqlConnection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn int(v: u64) -> i64 {
    v as i64
}

fn uint(v: i64) -> u64 {
    v as u64
}

fn not_found(what: &str, key: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{} {}", what, key))
}

fn path_text(path: &Path) -> Result<&str, StoreError> {
    path.to_str()
        .ok_or_else(|| StoreError::Corrupt(format!("non UTF-8 path: {}", path.display())))
}

fn parse_ip(text: &str) -> Result<IpAddr, StoreError> {
    text.parse()
        .map_err(|_| StoreError::Corrupt(format!("invalid IP address: {}", text)))
}

fn port(v: i64) -> Result<u16, StoreError> {
    u16::try_from(v).map_err(|_| StoreError::Corrupt(format!("invalid port: {}", v)))
}

fn seq32(v: i64) -> Result<u32, StoreError> {
    u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("invalid 32-bit value: {}", v)))
}

/// Raw `connection_details` row before validation
struct ConnectionRow {
    id: i64,
    src_ip: String,
    src_port: i64,
    dst_ip: String,
    dst_port: i64,
    isn: i64,
    direction: String,
    peer: Option<i64>,
}

impl ConnectionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ConnectionRow {
            id: row.get(0)?,
            src_ip: row.get(1)?,
            src_port: row.get(2)?,
            dst_ip: row.get(3)?,
            dst_port: row.get(4)?,
            isn: row.get(5)?,
            direction: row.get(6)?,
            peer: row.get(7)?,
        })
    }

    fn into_connection(self) -> Result<Connection, StoreError> {
        Ok(Connection {
            id: uint(self.id),
            src_ip: parse_ip(&self.src_ip)?,
            src_port: port(self.src_port)?,
            dst_ip: parse_ip(&self.dst_ip)?,
            dst_port: port(self.dst_port)?,
            isn: seq32(self.isn)?,
            direction: Direction::parse(&self.direction).ok_or_else(|| {
                StoreError::Corrupt(format!("invalid direction: {}", self.direction))
            })?,
            peer: self.peer.map(uint),
        })
    }
}

impl CaseStore for SqliteStore {
    fn block_size(&self) -> Result<Option<u64>, StoreError> {
        let conn = self.conn.lock();
        let value: Option<i64> = conn
            .query_row("SELECT value FROM meta WHERE name = 'block_size'", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.map(uint))
    }

    fn set_block_size(&self, size: u64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO meta (name, value) VALUES ('block_size', ?1)",
            params![int(size)],
        )?;
        Ok(())
    }

    fn source_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let conn = self.conn.lock();
        let path: Option<String> = conn
            .query_row("SELECT path FROM sources WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?;
        path.map(PathBuf::from)
            .ok_or_else(|| not_found("source", name))
    }

    fn add_source(&self, name: &str, path: &Path) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO sources (name, path) VALUES (?1, ?2)",
            params![name, path_text(path)?],
        )?;
        Ok(())
    }

    fn extent_rows(&self, inode: u64) -> Result<Vec<Extent>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT block, count, run_index FROM block WHERE inode = ?1 ORDER BY run_index",
        )?;
        let rows = stmt
            .query_map(params![int(inode)], |row| {
                Ok(Extent::new(
                    uint(row.get(0)?),
                    uint(row.get(1)?),
                    uint(row.get(2)?),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn add_extent_rows(&self, inode: u64, rows: &[Extent]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO block (inode, block, count, run_index) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in rows {
                stmt.execute(params![
                    int(inode),
                    int(row.physical_block),
                    int(row.run_length_blocks),
                    int(row.logical_block_index)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn inode_size(&self, inode: u64) -> Result<Option<u64>, StoreError> {
        let conn = self.conn.lock();
        let size: Option<i64> = conn
            .query_row("SELECT size FROM inode WHERE inode = ?1", params![int(inode)], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(size.map(uint))
    }

    fn set_inode_size(&self, inode: u64, size: u64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO inode (inode, size) VALUES (?1, ?2)",
            params![int(inode), int(size)],
        )?;
        Ok(())
    }

    fn resident(&self, inode: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT data FROM resident WHERE inode = ?1",
                params![int(inode)],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_resident(&self, inode: u64, data: &[u8]) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO resident (inode, data) VALUES (?1, ?2)",
            params![int(inode), data],
        )?;
        Ok(())
    }

    fn unallocated(&self, key: u64) -> Result<UnallocatedRange, StoreError> {
        let conn = self.conn.lock();
        let row: Option<(i64, Option<i64>)> = conn
            .query_row(
                "SELECT range_offset, range_size FROM unallocated WHERE range_key = ?1",
                params![int(key)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (offset, size) = row.ok_or_else(|| not_found("unallocated range", key))?;
        Ok(UnallocatedRange {
            offset: uint(offset),
            size: size.map(uint),
        })
    }

    fn add_unallocated(&self, key: u64, range: UnallocatedRange) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO unallocated (range_key, range_offset, range_size) VALUES (?1, ?2, ?3)",
            params![int(key), int(range.offset), range.size.map(int)],
        )?;
        Ok(())
    }

    fn mounted_path(&self, id: u64) -> Result<PathBuf, StoreError> {
        let conn = self.conn.lock();
        let path: Option<String> = conn
            .query_row("SELECT path FROM mounted WHERE id = ?1", params![int(id)], |row| {
                row.get(0)
            })
            .optional()?;
        path.map(PathBuf::from)
            .ok_or_else(|| not_found("mounted file", id))
    }

    fn add_mounted(&self, id: u64, path: &Path) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO mounted (id, path) VALUES (?1, ?2)",
            params![int(id), path_text(path)?],
        )?;
        Ok(())
    }

    fn connection(&self, id: u64) -> Result<Connection, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, src_ip, src_port, dst_ip, dst_port, isn, direction, peer
                 FROM connection_details WHERE id = ?1",
                params![int(id)],
                ConnectionRow::from_row,
            )
            .optional()?;
        row.ok_or_else(|| not_found("connection", id))?
            .into_connection()
    }

    fn segments(&self, connection_id: u64) -> Result<Vec<SegmentRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT packet_id, seq, length, packet_offset FROM connection
             WHERE connection_id = ?1 ORDER BY rowid",
        )?;
        let raw = stmt
            .query_map(params![int(connection_id)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(packet_id, seq, length, packet_offset)| {
                Ok(SegmentRecord {
                    connection_id,
                    packet_id: uint(packet_id),
                    seq: seq32(seq)?,
                    length: seq32(length)?,
                    packet_offset: uint(packet_offset),
                })
            })
            .collect()
    }

    fn next_connection_id(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let max: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM connection_details", [], |row| row.get(0))?;
        Ok(max.map_or(1, |id| uint(id) + 1))
    }

    fn insert_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO connection_details
             (id, src_ip, src_port, dst_ip, dst_port, isn, direction, peer)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                int(connection.id),
                connection.src_ip.to_string(),
                connection.src_port,
                connection.dst_ip.to_string(),
                connection.dst_port,
                connection.isn,
                connection.direction.as_str(),
                connection.peer.map(int)
            ],
        )?;
        Ok(())
    }

    fn insert_segments(&self, segments: &[SegmentRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO connection (connection_id, packet_id, seq, length, packet_offset)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for seg in segments {
                stmt.execute(params![
                    int(seg.connection_id),
                    int(seg.packet_id),
                    seg.seq,
                    seg.length,
                    int(seg.packet_offset)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn register_node(&self, node: &VfsNode) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO vfs (address, path, size) VALUES (?1, ?2, ?3)",
            params![node.address.to_string(), node.path, node.size.map(int)],
        )?;
        Ok(())
    }

    fn node(&self, address: &InodeAddress) -> Result<Option<VfsNode>, StoreError> {
        let conn = self.conn.lock();
        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT path, size FROM vfs WHERE address = ?1",
                params![address.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(path, size)| VfsNode {
            address: address.clone(),
            path,
            size: size.map(uint),
        }))
    }

    fn nodes(&self) -> Result<Vec<VfsNode>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT address, path, size FROM vfs ORDER BY path, address")?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(address, path, size)| {
                let address = InodeAddress::parse(&address)
                    .map_err(|e| StoreError::Corrupt(format!("address {:?}: {}", address, e)))?;
                Ok(VfsNode {
                    address,
                    path,
                    size: size.map(uint),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::conformance;

    #[test]
    fn test_sqlite_store_conformance() {
        conformance::check_all(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_large_values_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_inode_size(u64::MAX, u64::MAX - 1).unwrap();
        assert_eq!(store.inode_size(u64::MAX).unwrap(), Some(u64::MAX - 1));
    }

    #[test]
    fn test_corrupt_connection_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO connection_details VALUES (1, 'not-an-ip', 1, '1.1.1.1', 2, 0, 'forward', NULL)",
                [],
            )
            .unwrap();
        assert!(matches!(store.connection(1), Err(StoreError::Corrupt(_))));
    }
}
