//! Physical RAM range discovery from the kernel's `/proc/iomem` table.
//!
//! Valid lines look like `00100000-07ffffff : System RAM`. Indented lines are
//! children of a top-level region (kernel code, ACPI tables, ...) and are
//! never significant on their own.

use crate::error::{MemrError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// Default location of the kernel's physical address map
pub const IOMEM_PATH: &str = "/proc/iomem";

/// Label of the top-level regions backed by real memory
pub const SYSTEM_RAM_LABEL: &str = "System RAM";

/// One contiguous "System RAM" region.
///
/// `end` is stored exactly as printed by the kernel, which is the last valid
/// address of the region rather than one past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemRange {
    pub start: u64,
    pub end: u64,
}

impl MemRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Whether `start < end`
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }
}

impl fmt::Display for MemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "start={}; end={}", self.start, self.end)
    }
}

/// Ordered, non-empty sequence of RAM ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemRanges(Vec<MemRange>);

impl MemRanges {
    /// Wrap an existing list; fails when the list is empty.
    pub fn new(ranges: Vec<MemRange>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(MemrError::NoRangesFound {
                path: "<memory>".to_string(),
                reason: "empty range list".to_string(),
            });
        }
        Ok(Self(ranges))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MemRange> {
        self.0.iter()
    }

    /// First range in table order
    pub fn first(&self) -> Option<&MemRange> {
        self.0.first()
    }

    pub fn as_slice(&self) -> &[MemRange] {
        &self.0
    }

    /// Set of all range start addresses
    pub fn start_set(&self) -> HashSet<u64> {
        self.0.iter().map(|r| r.start).collect()
    }
}

impl<'a> IntoIterator for &'a MemRanges {
    type Item = &'a MemRange;
    type IntoIter = std::slice::Iter<'a, MemRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for MemRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rng) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[{:02}] {}", i, rng)?;
        }
        Ok(())
    }
}

/// Read ranges from a file in the `/proc/iomem` format
pub fn read_ranges_from<P: AsRef<Path>>(path: P) -> Result<MemRanges> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| MemrError::NoRangesFound {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    ranges_from_reader(BufReader::new(file)).map_err(|e| match e {
        MemrError::NoRangesFound { reason, .. } => MemrError::NoRangesFound {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// Parse ranges from any buffered reader of range-table text
pub fn ranges_from_reader<R: BufRead>(reader: R) -> Result<MemRanges> {
    let mut ranges = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| MemrError::NoRangesFound {
            path: "<reader>".to_string(),
            reason: e.to_string(),
        })?;

        if let Some(range) = parse_line(&line) {
            ranges.push(range);
        }
    }

    if ranges.is_empty() {
        return Err(MemrError::NoRangesFound {
            path: "<reader>".to_string(),
            reason: format!("no \"{}\" lines", SYSTEM_RAM_LABEL),
        });
    }

    let ranges = MemRanges(ranges);
    debug!(count = ranges.len(), "loaded ranges:\n{}", ranges);
    Ok(ranges)
}

/// Parse one table line, returning a range only for top-level System RAM entries
fn parse_line(line: &str) -> Option<MemRange> {
    if line.starts_with(' ') {
        return None;
    }

    let (addrs, label) = line.split_once(" : ")?;
    if label != SYSTEM_RAM_LABEL {
        return None;
    }

    let Some((start, end)) = addrs.split_once('-') else {
        warn!(line = %line, "invalid range, skipping");
        return None;
    };

    let start = match u64::from_str_radix(start, 16) {
        Ok(v) => v,
        Err(e) => {
            warn!(value = %start, error = %e, "invalid start of range, skipping");
            return None;
        }
    };
    let end = match u64::from_str_radix(end, 16) {
        Ok(v) => v,
        Err(e) => {
            warn!(value = %end, error = %e, "invalid end of range, skipping");
            return None;
        }
    };

    let range = MemRange::new(start, end);
    if !range.is_valid() {
        warn!(start, end, "range start is not below its end, skipping");
        return None;
    }
    Some(range)
}
