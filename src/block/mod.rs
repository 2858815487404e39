//! Address-bounded blocks of physical memory.
//!
//! A [`Block`] pairs a physical range with a deferred opener. Nothing is read
//! (and no stage thread is started) until the composer opens the block, which
//! it only does once the previous block has been drained.

pub mod kcore;
pub mod physical;

use crate::error::{MemrError, Result};
use crate::io::page;
use crate::io::SourceHandle;
use crate::iomem::MemRanges;
use crate::source::MemSource;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::{debug, Dispatch};

/// Reader over the bytes of one block.
pub type BlockReader = Box<dyn Read + Send>;

type Opener = Box<dyn FnOnce() -> io::Result<BlockReader> + Send>;

/// One physical range and the means to read it.
pub struct Block {
    start: u64,
    end: u64,
    kind: &'static str,
    opener: Opener,
}

impl Block {
    /// Block spanning `[start, end)` that opens its reader on demand.
    pub fn new<F>(start: u64, end: u64, kind: &'static str, opener: F) -> Self
    where
        F: FnOnce() -> io::Result<BlockReader> + Send + 'static,
    {
        Self {
            start,
            end,
            kind,
            opener: Box::new(opener),
        }
    }

    /// Block over an already open reader.
    pub fn from_reader<R>(start: u64, end: u64, reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::new(start, end, "reader", move || Ok(Box::new(reader) as BlockReader))
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes the block yields
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Short name of the reader backing the block
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Open the block; a block can only be read once.
    pub fn open(self) -> io::Result<BlockReader> {
        (self.opener)()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start={}; end={} (raw reader: {})",
            self.start, self.end, self.kind
        )
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Indexed listing of blocks for debug output.
pub struct BlockList<'a>(pub &'a [Block]);

impl fmt::Display for BlockList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, blk) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[{:02}] {}", i, blk)?;
        }
        Ok(())
    }
}

/// Settings shared by the extraction strategies.
#[derive(Clone, Default)]
pub struct ExtractOptions {
    /// Page size for page-granular devices (system page size when `None`)
    pub page_size: Option<usize>,
    /// Chunks buffered by each page stage
    pub pipe_capacity: usize,
    /// Images at or below this size are rejected
    pub min_source_size: u64,
    /// Dispatcher for stage worker threads
    pub dispatch: Option<Dispatch>,
}

impl ExtractOptions {
    pub(crate) fn page_size(&self) -> usize {
        self.page_size.unwrap_or_else(page::page_size)
    }
}

/// Build one block per range from `handle`, using the strategy for `source`.
///
/// Fails with [`MemrError::BlockRangeMismatch`] unless every range produced
/// exactly one block.
pub fn extract(
    source: MemSource,
    handle: &Arc<SourceHandle>,
    ranges: &MemRanges,
    opts: &ExtractOptions,
) -> Result<Vec<Block>> {
    let blocks = if source.is_physical() {
        physical::physical_blocks(handle, ranges, source.force_page_reads(), opts)
    } else {
        kcore::kcore_blocks(handle, ranges, opts)?
    };

    debug!(source = %source, count = blocks.len(), "loaded blocks:\n{}", BlockList(&blocks));

    if blocks.len() != ranges.len() {
        return Err(MemrError::BlockRangeMismatch {
            device: source,
            blocks: blocks.len(),
            ranges: ranges.len(),
        });
    }

    Ok(blocks)
}
