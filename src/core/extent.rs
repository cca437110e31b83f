//! Sparse extent tables for block-mapped files
//!
//! A file on a block device is described by runs of contiguous physical
//! blocks, each mapped to a contiguous range of logical blocks. Coverage may
//! be sparse: a logical block with no covering run is a hole, which is an
//! error to read, not end of file.

use crate::error::ExtentError;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom};

/// A run of contiguous physical blocks mapped to contiguous logical blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First physical block on the backing device
    pub physical_block: u64,
    /// Number of blocks in the run
    pub run_length_blocks: u64,
    /// Logical block within the file where the run starts
    pub logical_block_index: u64,
}

impl Extent {
    pub fn new(physical_block: u64, run_length_blocks: u64, logical_block_index: u64) -> Self {
        Extent {
            physical_block,
            run_length_blocks,
            logical_block_index,
        }
    }

    /// One past the last logical block covered by this run
    pub fn logical_end(&self) -> u64 {
        self.logical_block_index + self.run_length_blocks
    }

    /// Check if this run covers a logical block
    pub fn contains(&self, logical_block: u64) -> bool {
        logical_block >= self.logical_block_index && logical_block < self.logical_end()
    }
}

/// Immutable, sorted, non-overlapping list of extents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtentTable {
    runs: Vec<Extent>,
}

impl ExtentTable {
    /// Build a table from persisted rows in any order
    ///
    /// Fails with `MalformedTable` for zero-length runs, duplicate or
    /// overlapping logical ranges, and runs whose end does not fit in `u64`.
    pub fn build<I>(rows: I) -> Result<Self, ExtentError>
    where
        I: IntoIterator<Item = Extent>,
    {
        let mut runs: Vec<Extent> = rows.into_iter().collect();
        runs.sort_by_key(|run| run.logical_block_index);

        for run in &runs {
            if run.run_length_blocks == 0 {
                return Err(ExtentError::MalformedTable(format!(
                    "zero-length run at logical block {}",
                    run.logical_block_index
                )));
            }
            if run.logical_block_index.checked_add(run.run_length_blocks).is_none()
                || run.physical_block.checked_add(run.run_length_blocks).is_none()
            {
                return Err(ExtentError::MalformedTable(format!(
                    "run at logical block {} overflows",
                    run.logical_block_index
                )));
            }
        }

        for pair in runs.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.logical_block_index == next.logical_block_index {
                return Err(ExtentError::MalformedTable(format!(
                    "duplicate logical block index {}",
                    next.logical_block_index
                )));
            }
            if prev.logical_end() > next.logical_block_index {
                return Err(ExtentError::MalformedTable(format!(
                    "run at logical block {} overlaps run at {}",
                    prev.logical_block_index, next.logical_block_index
                )));
            }
        }

        Ok(ExtentTable { runs })
    }

    pub fn runs(&self) -> &[Extent] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Logical byte length covered up to the end of the last run
    pub fn logical_len(&self, block_size: u64) -> u64 {
        self.runs
            .last()
            .map(|run| run.logical_end().saturating_mul(block_size))
            .unwrap_or(0)
    }

    /// Map a logical byte offset to `(physical_offset, bytes_until_run_end)`
    pub fn translate(&self, logical_offset: u64, block_size: u64) -> Result<(u64, u64), ExtentError> {
        if block_size == 0 {
            return Err(ExtentError::MalformedTable("block size must be non-zero".into()));
        }

        let block = logical_offset / block_size;
        let within = logical_offset % block_size;

        // Runs starting at or before `block`; the candidate is the last of them
        let idx = self.runs.partition_point(|run| run.logical_block_index <= block);
        let is_last = idx == self.runs.len();

        if idx == 0 {
            return if self.runs.is_empty() {
                Err(ExtentError::OutOfRange {
                    offset: logical_offset,
                    end: 0,
                })
            } else {
                Err(ExtentError::Hole {
                    offset: logical_offset,
                })
            };
        }

        let run = &self.runs[idx - 1];
        if !run.contains(block) {
            return if is_last {
                Err(ExtentError::OutOfRange {
                    offset: logical_offset,
                    end: self.logical_len(block_size),
                })
            } else {
                Err(ExtentError::Hole {
                    offset: logical_offset,
                })
            };
        }

        let overflow = || ExtentError::MalformedTable(format!(
            "physical offset for logical offset {} overflows",
            logical_offset
        ));

        let physical_block = run.physical_block + (block - run.logical_block_index);
        let physical = physical_block
            .checked_mul(block_size)
            .and_then(|base| base.checked_add(within))
            .ok_or_else(overflow)?;
        let remaining = (run.logical_end() - block)
            .checked_mul(block_size)
            .map(|bytes| bytes - within)
            .ok_or_else(overflow)?;

        Ok((physical, remaining))
    }

    /// Read up to `buf.len()` logical bytes starting at `logical_offset`
    ///
    /// Returns the number of bytes read, which is short only at true end of
    /// file: past the last run or at the end of the backing source. A hole
    /// anywhere in the requested range is an error.
    pub fn read_into<R: Read + Seek + ?Sized>(
        &self,
        logical_offset: u64,
        buf: &mut [u8],
        block_size: u64,
        source: &mut R,
    ) -> Result<usize, ExtentError> {
        let mut filled = 0usize;

        while filled < buf.len() {
            let pos = logical_offset + filled as u64;
            let (physical, run_left) = match self.translate(pos, block_size) {
                Ok(mapping) => mapping,
                Err(ExtentError::OutOfRange { .. }) => break,
                Err(e) => return Err(e),
            };

            let want = (buf.len() - filled).min(usize::try_from(run_left).unwrap_or(usize::MAX));
            source.seek(SeekFrom::Start(physical))?;
            let got = read_full(source, &mut buf[filled..filled + want])?;
            filled += got;

            if got < want {
                break;
            }
        }

        Ok(filled)
    }

    /// Read `length` logical bytes starting at `logical_offset` into a new buffer
    pub fn read<R: Read + Seek + ?Sized>(
        &self,
        logical_offset: u64,
        length: usize,
        block_size: u64,
        source: &mut R,
    ) -> Result<Vec<u8>, ExtentError> {
        let mut buf = vec![0u8; length];
        let n = self.read_into(logical_offset, &mut buf, block_size, source)?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Fill `buf` from `source`, stopping early only at end of stream
pub(crate) fn read_full<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn device(blocks: u64, block_size: u64) -> Cursor<Vec<u8>> {
        let data = (0..blocks * block_size)
            .map(|i| (i / block_size) as u8)
            .collect::<Vec<u8>>();
        Cursor::new(data)
    }

    #[test]
    fn test_extent_contains() {
        let run = Extent::new(100, 4, 10);
        assert!(run.contains(10));
        assert!(run.contains(13));
        assert!(!run.contains(14));
        assert!(!run.contains(9));
        assert_eq!(run.logical_end(), 14);
    }

    #[test]
    fn test_build_sorts_rows() {
        let table = ExtentTable::build(vec![Extent::new(50, 2, 4), Extent::new(10, 4, 0)]).unwrap();
        assert_eq!(table.runs()[0].logical_block_index, 0);
        assert_eq!(table.runs()[1].logical_block_index, 4);
    }

    #[test]
    fn test_build_rejects_zero_count() {
        let err = ExtentTable::build(vec![Extent::new(1, 0, 0)]).unwrap_err();
        assert!(matches!(err, ExtentError::MalformedTable(_)));
    }

    #[test]
    fn test_build_rejects_duplicate_index() {
        let err = ExtentTable::build(vec![Extent::new(1, 1, 3), Extent::new(9, 1, 3)]).unwrap_err();
        assert!(matches!(err, ExtentError::MalformedTable(_)));
    }

    #[test]
    fn test_build_rejects_overlap() {
        let err = ExtentTable::build(vec![Extent::new(1, 4, 0), Extent::new(9, 1, 2)]).unwrap_err();
        assert!(matches!(err, ExtentError::MalformedTable(_)));
    }

    #[test]
    fn test_translate_within_run() {
        let table = ExtentTable::build(vec![Extent::new(10, 2, 0), Extent::new(40, 3, 2)]).unwrap();

        assert_eq!(table.translate(0, 512).unwrap(), (10 * 512, 1024));
        assert_eq!(table.translate(700, 512).unwrap(), (11 * 512 + 188, 324));
        assert_eq!(table.translate(1024, 512).unwrap(), (40 * 512, 1536));
    }

    #[test]
    fn test_translate_hole_and_out_of_range() {
        let table = ExtentTable::build(vec![Extent::new(10, 1, 1), Extent::new(20, 1, 4)]).unwrap();

        assert!(matches!(table.translate(0, 100), Err(ExtentError::Hole { offset: 0 })));
        assert!(matches!(table.translate(250, 100), Err(ExtentError::Hole { offset: 250 })));
        assert!(matches!(
            table.translate(500, 100),
            Err(ExtentError::OutOfRange { offset: 500, end: 500 })
        ));
    }

    #[test]
    fn test_translate_empty_table() {
        let table = ExtentTable::default();
        assert!(matches!(
            table.translate(0, 512),
            Err(ExtentError::OutOfRange { end: 0, .. })
        ));
    }

    #[test]
    fn test_read_spans_runs() {
        let mut dev = device(16, 4);
        // logical blocks 0..2 -> physical 8..10, logical 2..3 -> physical 3
        let table = ExtentTable::build(vec![Extent::new(8, 2, 0), Extent::new(3, 1, 2)]).unwrap();

        let data = table.read(2, 8, 4, &mut dev).unwrap();
        assert_eq!(data, vec![8, 8, 9, 9, 9, 9, 3, 3]);
    }

    #[test]
    fn test_read_stops_at_last_run() {
        let mut dev = device(16, 4);
        let table = ExtentTable::build(vec![Extent::new(5, 1, 0)]).unwrap();

        let data = table.read(0, 100, 4, &mut dev).unwrap();
        assert_eq!(data, vec![5, 5, 5, 5]);
    }

    #[test]
    fn test_read_hole_is_error() {
        let mut dev = device(16, 4);
        let table = ExtentTable::build(vec![Extent::new(1, 1, 0), Extent::new(2, 1, 2)]).unwrap();

        let err = table.read(0, 12, 4, &mut dev).unwrap_err();
        assert!(matches!(err, ExtentError::Hole { offset: 4 }));
    }

    #[test]
    fn test_read_short_device_is_eof() {
        let mut dev = device(2, 4);
        let table = ExtentTable::build(vec![Extent::new(1, 4, 0)]).unwrap();

        let data = table.read(0, 16, 4, &mut dev).unwrap();
        assert_eq!(data, vec![1, 1, 1, 1]);
    }
}
