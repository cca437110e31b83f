//! Error types for layerfs
//!
//! Each component has its own error enum so callers can match on the
//! failure they care about. [`Error`] wraps all of them for the high-level
//! [`Case`](crate::Case) API.

use std::io;
use thiserror::Error;

/// Failures while building or reading through an extent table
#[derive(Error, Debug)]
pub enum ExtentError {
    /// Logical offset has no covering run (allocation gap, not end of file)
    #[error("offset {offset} falls in a hole")]
    Hole { offset: u64 },

    /// Logical offset is past the end of the last run
    #[error("offset {offset} is out of range (table ends at {end})")]
    OutOfRange { offset: u64, end: u64 },

    #[error("malformed extent table: {0}")]
    MalformedTable(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExtentError {
    /// Recover a typed extent error that travelled through a `Layer` read
    pub fn from_io(err: &io::Error) -> Option<&ExtentError> {
        err.get_ref()?.downcast_ref::<ExtentError>()
    }
}

impl From<ExtentError> for io::Error {
    fn from(err: ExtentError) -> Self {
        match err {
            ExtentError::Io(inner) => inner,
            eof @ ExtentError::OutOfRange { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, eof),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Failures parsing the pipe-delimited address grammar
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("empty inode address")]
    Empty,

    #[error("empty segment at index {index}")]
    EmptySegment { index: usize },

    /// Segment params may not contain the separator, there is no escaping
    #[error("segment {index} params contain the '|' separator")]
    SeparatorInParams { index: usize },
}

/// Reassembly lookups and strict-mode consistency failures
#[derive(Error, Debug)]
pub enum ReassemblyError {
    #[error("unknown connection: {id}")]
    UnknownConnection { id: u64 },

    /// Two overlapping segments disagree on a byte (strict overlap policy only)
    #[error("inconsistent overlapping data in connection {connection} at stream offset {offset}")]
    InconsistentOverlap { connection: u64, offset: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ReassemblyError {
    /// Recover a typed reassembly error that travelled through a `Layer` read
    pub fn from_io(err: &io::Error) -> Option<&ReassemblyError> {
        err.get_ref()?.downcast_ref::<ReassemblyError>()
    }
}

impl From<ReassemblyError> for io::Error {
    fn from(err: ReassemblyError) -> Self {
        match err {
            ReassemblyError::Io(inner) => inner,
            missing @ ReassemblyError::UnknownConnection { .. } => {
                io::Error::new(io::ErrorKind::NotFound, missing)
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Case store (persistence boundary) failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure inside a single layer driver
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("extent error: {0}")]
    Extent(#[from] ExtentError),

    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid params for '{specifier}': {params:?} ({reason})")]
    InvalidParams {
        specifier: char,
        params: String,
        reason: String,
    },

    #[error("decode error: {0}")]
    Decode(String),

    /// A transform driver was opened as the first segment
    #[error("driver '{0}' requires a parent layer")]
    MissingParent(char),

    /// A root driver was opened on top of another layer
    #[error("driver '{0}' must be the root of an address")]
    UnexpectedParent(char),
}

impl LayerError {
    pub(crate) fn invalid_params(specifier: char, params: &str, reason: impl Into<String>) -> Self {
        LayerError::InvalidParams {
            specifier,
            params: params.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure resolving an address into a layer stack
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("address parse error: {0}")]
    Parse(#[from] AddressParseError),

    #[error("no driver registered for specifier '{specifier}' (segment {index})")]
    UnknownSpecifier { index: usize, specifier: char },

    #[error("segment {index} ({segment}) failed to open: {source}")]
    LayerFailed {
        index: usize,
        segment: String,
        #[source]
        source: LayerError,
    },

    #[error("address depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: usize, max: usize },
}

/// Carving failures; hits yielded before the error remain valid
#[derive(Error, Debug)]
pub enum CarveError {
    #[error("I/O error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("scan cancelled at offset {offset}")]
    Cancelled { offset: u64 },

    #[error("invalid pattern for signature '{extension}': {source}")]
    InvalidPattern {
        extension: String,
        #[source]
        source: regex::Error,
    },

    #[error("start pattern of signature '{extension}' has no maximum match length")]
    UnboundedPattern { extension: String },

    #[error("invalid carver configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration loading and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error for the [`Case`](crate::Case) API
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Extent(#[from] ExtentError),

    #[error(transparent)]
    Address(#[from] AddressParseError),

    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    #[error(transparent)]
    Carve(#[from] CarveError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
