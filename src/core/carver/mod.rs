//! Signature carving
//!
//! Scans a byte source for known file headers in fixed-size windows. The
//! trailing bytes of each window are carried into the next one so a header
//! straddling a window boundary is still found, and hits inside the carried
//! region are reported once. The carry is the configured `overlap` or the
//! longest possible start match, whichever is larger.
//!
//! When a signature has an end pattern the carver reads `max_length` bytes
//! from the hit offset and reports the length up to the end of the first
//! end match; otherwise the length is `max_length`.

pub mod signatures;

pub use signatures::{default_signatures, Signature};

use crate::config::CarveConfig;
use crate::core::extent::read_full;
use crate::error::CarveError;
use regex::bytes::{Regex, RegexBuilder};
use regex_syntax::ParserBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A candidate embedded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarveHit {
    /// Absolute offset of the header in the scanned source
    pub offset: u64,
    pub length: u64,
    /// Extension of the matching signature
    pub type_tag: String,
}

/// Cooperative cancellation flag shared between a scan and its owner
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct CompiledSignature {
    extension: String,
    start: Regex,
    end: Option<Regex>,
    max_length: u64,
}

fn compile(extension: &str, pattern: &str) -> Result<Regex, CarveError> {
    RegexBuilder::new(pattern)
        .unicode(false)
        .build()
        .map_err(|source| CarveError::InvalidPattern {
            extension: extension.to_string(),
            source,
        })
}

/// Longest byte sequence `pattern` can match
///
/// Only called on patterns that already compiled, so a parse failure here
/// is reported as unbounded.
fn maximum_match_len(extension: &str, pattern: &str) -> Result<usize, CarveError> {
    let unbounded = || CarveError::UnboundedPattern {
        extension: extension.to_string(),
    };
    let hir = ParserBuilder::new()
        .unicode(false)
        .utf8(false)
        .build()
        .parse(pattern)
        .map_err(|_| unbounded())?;
    hir.properties().maximum_len().ok_or_else(unbounded)
}

/// Finds embedded files by header signature
#[derive(Debug)]
pub struct SignatureCarver {
    signatures: Vec<CompiledSignature>,
    window_size: usize,
    overlap: usize,
}

impl SignatureCarver {
    pub fn new(signatures: Vec<Signature>, config: &CarveConfig) -> Result<Self, CarveError> {
        if config.window_size == 0 {
            return Err(CarveError::InvalidConfig("window_size must be non-zero".into()));
        }
        if config.overlap >= config.window_size {
            return Err(CarveError::InvalidConfig(format!(
                "overlap ({}) must be smaller than window_size ({})",
                config.overlap, config.window_size
            )));
        }

        let mut longest = 0;
        let signatures = signatures
            .into_iter()
            .map(|sig| {
                let start = compile(&sig.extension, &sig.start)?;
                longest = longest.max(maximum_match_len(&sig.extension, &sig.start)?);
                Ok(CompiledSignature {
                    start,
                    end: sig
                        .end
                        .as_deref()
                        .map(|end| compile(&sig.extension, end))
                        .transpose()?,
                    max_length: sig.max_length,
                    extension: sig.extension,
                })
            })
            .collect::<Result<Vec<_>, CarveError>>()?;

        let overlap = config.overlap.max(longest);
        if overlap >= config.window_size {
            return Err(CarveError::InvalidConfig(format!(
                "longest start pattern ({} bytes) does not fit in window_size ({})",
                longest, config.window_size
            )));
        }

        Ok(SignatureCarver {
            signatures,
            window_size: config.window_size,
            overlap,
        })
    }

    /// Carver over the stock signature table
    pub fn with_defaults(config: &CarveConfig) -> Result<Self, CarveError> {
        Self::new(default_signatures(), config)
    }

    /// Keep only signatures whose extension is listed. An empty list keeps all.
    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        if !extensions.is_empty() {
            self.signatures
                .retain(|sig| extensions.iter().any(|ext| ext.as_ref() == sig.extension));
        }
        self
    }

    pub fn extensions(&self) -> Vec<&str> {
        self.signatures.iter().map(|s| s.extension.as_str()).collect()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Bytes carried from one window into the next
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Scan `source` from its beginning
    pub fn scan<R: Read + Seek>(&self, source: R, token: CancellationToken) -> CarveScan<'_, R> {
        self.scan_from(source, 0, token)
    }

    /// Scan `source` starting at `offset`, typically a previous scan's
    /// [`CarveScan::resume_offset`]
    pub fn scan_from<R: Read + Seek>(
        &self,
        source: R,
        offset: u64,
        token: CancellationToken,
    ) -> CarveScan<'_, R> {
        CarveScan {
            carver: self,
            source,
            token,
            next_offset: offset,
            carry: Vec::new(),
            pending: VecDeque::new(),
            seen: HashSet::new(),
            scanned: 0,
            reported: 0,
            done: false,
        }
    }
}

/// Lazy sequence of hits produced by [`SignatureCarver::scan`]
///
/// Yields `Err` at most once, after which the sequence ends. Hits already
/// yielded stay valid when a later window fails.
pub struct CarveScan<'a, R> {
    carver: &'a SignatureCarver,
    source: R,
    token: CancellationToken,
    /// Offset of the first byte not yet read
    next_offset: u64,
    /// Tail of the previous window
    carry: Vec<u8>,
    pending: VecDeque<CarveHit>,
    /// (signature, offset) pairs already reported inside the carried region
    seen: HashSet<(usize, u64)>,
    scanned: u64,
    reported: u64,
    done: bool,
}

impl<R: Read + Seek> CarveScan<'_, R> {
    /// Offset from which a new scan continues without missing a hit.
    ///
    /// Hits inside the carried overlap may be reported again by the new scan.
    pub fn resume_offset(&self) -> u64 {
        self.next_offset - self.carry.len() as u64
    }

    pub fn bytes_scanned(&self) -> u64 {
        self.scanned
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn io_error(offset: u64) -> impl FnOnce(std::io::Error) -> CarveError {
        move |source| CarveError::Io { offset, source }
    }

    /// Length of a hit: up to the end of the first end match, or `max_length`
    fn measure(&mut self, sig: usize, offset: u64) -> Result<u64, CarveError> {
        let carver = self.carver;
        let signature = &carver.signatures[sig];
        let Some(end) = &signature.end else {
            return Ok(signature.max_length);
        };

        let mut data = vec![0u8; usize::try_from(signature.max_length).unwrap_or(usize::MAX)];
        self.source
            .seek(SeekFrom::Start(offset))
            .map_err(Self::io_error(offset))?;
        let n = read_full(&mut self.source, &mut data).map_err(Self::io_error(offset))?;
        data.truncate(n);

        Ok(match end.find(&data) {
            Some(m) => m.end() as u64,
            None => signature.max_length,
        })
    }

    /// Read and scan the next window. Returns false at end of source.
    fn fill_window(&mut self) -> Result<bool, CarveError> {
        let read_at = self.next_offset;
        self.source
            .seek(SeekFrom::Start(read_at))
            .map_err(Self::io_error(read_at))?;
        let mut data = vec![0u8; self.carver.window_size];
        let n = read_full(&mut self.source, &mut data).map_err(Self::io_error(read_at))?;
        if n == 0 {
            return Ok(false);
        }
        data.truncate(n);

        let base = self.resume_offset();
        let mut buffer = std::mem::take(&mut self.carry);
        buffer.extend_from_slice(&data);
        debug!("Scanning window at {} ({} bytes)", base, buffer.len());

        let mut found = Vec::new();
        for (index, sig) in self.carver.signatures.iter().enumerate() {
            let mut pos = 0;
            while pos < buffer.len() {
                let Some(m) = sig.start.find_at(&buffer, pos) else {
                    break;
                };
                let offset = base + m.start() as u64;
                if self.seen.insert((index, offset)) {
                    found.push((index, offset));
                }
                pos = m.start() + 1;
            }
        }

        // Stable: hits at the same offset keep signature table order
        found.sort_by_key(|&(_, offset)| offset);
        for (index, offset) in found {
            let length = self.measure(index, offset)?;
            self.pending.push_back(CarveHit {
                offset,
                length,
                type_tag: self.carver.signatures[index].extension.clone(),
            });
        }

        self.next_offset = read_at + n as u64;
        self.scanned += n as u64;

        let keep = self.carver.overlap.min(buffer.len());
        self.carry = buffer.split_off(buffer.len() - keep);
        let carry_start = self.resume_offset();
        self.seen.retain(|&(_, offset)| offset >= carry_start);

        Ok(true)
    }
}

impl<R: Read + Seek> Iterator for CarveScan<'_, R> {
    type Item = Result<CarveHit, CarveError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.pending.pop_front() {
                self.reported += 1;
                return Some(Ok(hit));
            }
            if self.done {
                return None;
            }
            if self.token.is_cancelled() {
                self.done = true;
                let offset = self.resume_offset();
                info!("Carve scan cancelled at offset {}", offset);
                return Some(Err(CarveError::Cancelled { offset }));
            }
            match self.fill_window() {
                Ok(true) => continue,
                Ok(false) => {
                    self.done = true;
                    info!(
                        "Carve scan finished: {} hits in {} bytes",
                        self.reported, self.scanned
                    );
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
