//! Inode addresses
//!
//! An address names a chain of layers as `segment ('|' segment)*`, where each
//! segment is a one-character driver specifier followed by opaque params:
//!
//! ```text
//! Iimage|D1234|o4096:512
//! Icapture|S12|c0|G1
//! ```
//!
//! Segment 0 is a root source. Every later segment is a transform over the
//! layer produced by the segment before it. Addresses are only ever extended,
//! never edited in place.

use crate::error::AddressParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between address segments
pub const SEPARATOR: char = '|';

/// One `(specifier, params)` step of an address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub specifier: char,
    pub params: String,
}

impl Segment {
    pub fn new<S: Into<String>>(specifier: char, params: S) -> Self {
        Segment {
            specifier,
            params: params.into(),
        }
    }

    fn parse(token: &str, index: usize) -> Result<Self, AddressParseError> {
        let mut chars = token.chars();
        let specifier = chars
            .next()
            .ok_or(AddressParseError::EmptySegment { index })?;
        Ok(Segment {
            specifier,
            params: chars.as_str().to_string(),
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.specifier, self.params)
    }
}

/// Ordered, non-empty chain of segments identifying a virtual node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InodeAddress {
    segments: Vec<Segment>,
}

impl InodeAddress {
    /// Parse the textual form; fails on an empty string or any empty token
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }

        let segments = s
            .split(SEPARATOR)
            .enumerate()
            .map(|(index, token)| Segment::parse(token, index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(InodeAddress { segments })
    }

    /// Address consisting of a single root segment
    pub fn root(segment: Segment) -> Result<Self, AddressParseError> {
        Self::from_segments(vec![segment])
    }

    /// Build from segments, validating that params can round-trip
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, AddressParseError> {
        if segments.is_empty() {
            return Err(AddressParseError::Empty);
        }
        for (index, segment) in segments.iter().enumerate() {
            if segment.specifier == SEPARATOR || segment.params.contains(SEPARATOR) {
                return Err(AddressParseError::SeparatorInParams { index });
            }
        }
        Ok(InodeAddress { segments })
    }

    /// New address with `segment` appended; `self` is left untouched
    pub fn extend(&self, segment: Segment) -> Result<Self, AddressParseError> {
        if segment.specifier == SEPARATOR || segment.params.contains(SEPARATOR) {
            return Err(AddressParseError::SeparatorInParams {
                index: self.segments.len(),
            });
        }
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(InodeAddress { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments (layer depth)
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn root_segment(&self) -> &Segment {
        &self.segments[0]
    }

    pub fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// Address of the layer this one is built on, `None` for a root
    pub fn parent(&self) -> Option<InodeAddress> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(self.prefix(self.segments.len() - 1))
    }

    /// The first `len` segments (clamped to at least one)
    pub fn prefix(&self, len: usize) -> InodeAddress {
        let len = len.clamp(1, self.segments.len());
        InodeAddress {
            segments: self.segments[..len].to_vec(),
        }
    }
}

impl fmt::Display for InodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for InodeAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InodeAddress::parse(s)
    }
}

impl TryFrom<String> for InodeAddress {
    type Error = AddressParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        InodeAddress::parse(&s)
    }
}

impl From<InodeAddress> for String {
    fn from(addr: InodeAddress) -> Self {
        addr.to_string()
    }
}
