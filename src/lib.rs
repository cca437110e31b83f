//! # layerfs - Layered Virtual Filesystem for Forensic Evidence
//!
//! `layerfs` exposes everything found inside a piece of evidence (files in a
//! disk image, TCP streams in a packet capture, documents embedded in either)
//! as seekable byte streams addressed by a short textual path:
//!
//! ```text
//! Idisk|D1234|o512:4096|G0
//! ```
//!
//! Each `|`-separated segment names a driver (its first character) and the
//! driver's parameters (the rest). Resolving an address opens the segments
//! left to right, each on top of the one before it.
//!
//! - **Extent tables** map a file's logical bytes onto physical blocks
//! - **Stream reassembly** rebuilds TCP byte streams from captured packets
//! - **Signature carving** finds embedded files in unstructured space
//! - **Case stores** keep the tables in memory or in SQLite
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use layerfs::{Case, InodeAddress, Result};
//! use std::path::Path;
//!
//! # fn main() -> Result<()> {
//! let case = Case::in_memory();
//! case.store().add_source("disk", Path::new("/evidence/disk.dd"))?;
//!
//! // Bytes 512..4608 of the image, gunzipped
//! let address = InodeAddress::parse("Idisk|o512:4096|G0")?;
//! let contents = case.read_all(&address)?;
//! println!("{} bytes, sha256 {}", contents.len(), case.digest(&address)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Drivers
//!
//! ```rust,no_run
//! use layerfs::{CaseBuilder, LayerDriverRegistry, MemoryLayer, Layer, Result};
//!
//! # fn main() -> Result<()> {
//! let mut registry = LayerDriverRegistry::with_standard_drivers();
//! // `X<text>`: a root layer holding its own parameters
//! registry.register('X', |_ctx, _parent, params| {
//!     let layer: Box<dyn Layer> = Box::new(MemoryLayer::new(params.as_bytes().to_vec()));
//!     Ok(layer)
//! });
//!
//! let case = CaseBuilder::new().sqlite("case.db").registry(registry).build()?;
//! let layer = case.open_str("Xhello|o1")?;
//! assert_eq!(layer.size(), 4);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;

pub use crate::config::{CarveConfig, OverlapPolicy, ReassemblyConfig, VfsConfig};
pub use crate::core::{
    address::{InodeAddress, Segment},
    cache::{CacheStats, SourceCache},
    carver::{default_signatures, CancellationToken, CarveHit, Signature, SignatureCarver},
    case::{Case, CaseBuilder},
    extent::{Extent, ExtentTable},
    layer::{read_to_vec, Layer, MemoryLayer, SharedBytes},
    reassembly::{
        ClosePolicy, Connection, Direction, Endpoint, FinOrRst, NeverClose, Packet,
        SegmentRecord, StreamReassembler, TcpFlags,
    },
    registry::{DriverContext, LayerDriverRegistry, LayerFactory},
    resolver::VfsResolver,
    store::{CaseStore, MemoryStore, SqliteStore, UnallocatedRange, VfsNode},
};
pub use crate::error::{
    AddressParseError, CarveError, ConfigError, Error, ExtentError, LayerError, OpenError,
    ReassemblyError, Result, StoreError,
};
