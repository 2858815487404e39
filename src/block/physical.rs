//! Blocks over raw physical memory devices (`/dev/mem`, `/dev/crash`).

use super::{Block, BlockReader, ExtractOptions};
use crate::io::page::{page_end, page_stage};
use crate::io::{SectionReader, SourceHandle};
use crate::iomem::MemRanges;
use std::sync::Arc;
use tracing::trace;

/// One section reader per range, addressed by physical offset.
///
/// With `force_pages` the block end is rounded down to a page boundary (the
/// trailing partial page is dropped) and the device is read in whole pages
/// through a pipeline stage.
pub fn physical_blocks(
    handle: &Arc<SourceHandle>,
    ranges: &MemRanges,
    force_pages: bool,
    opts: &ExtractOptions,
) -> Vec<Block> {
    let page_size = opts.page_size();
    let mut blocks = Vec::with_capacity(ranges.len());

    for rng in ranges {
        let start = rng.start;
        let mut end = rng.end;
        if force_pages {
            end = page_end(end, page_size).max(start);
            trace!(start, end = rng.end, aligned = end, page_size, "page-aligned block end");
        }

        let handle = Arc::clone(handle);
        let len = end - start;
        let block = if force_pages {
            let capacity = opts.pipe_capacity;
            let dispatch = opts.dispatch.clone();
            Block::new(start, end, "page", move || {
                let section = SectionReader::new(handle, start, len);
                let stage = page_stage(
                    format!("page-{:#x}", start),
                    section,
                    page_size,
                    capacity,
                    dispatch.as_ref(),
                )?;
                Ok(Box::new(stage) as BlockReader)
            })
        } else {
            Block::new(start, end, "section", move || {
                Ok(Box::new(SectionReader::new(handle, start, len)) as BlockReader)
            })
        };
        blocks.push(block);
    }

    blocks
}
