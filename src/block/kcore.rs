//! Blocks over the `/proc/kcore` ELF image.
//!
//! Each `PT_LOAD` segment whose physical start matches the start of a RAM
//! range becomes one block. Older kernels report `p_paddr` as zero; for those
//! the physical start is recovered from the virtual address using the offset
//! between the first loadable segment and the first RAM range.

use super::{Block, BlockReader, ExtractOptions};
use crate::error::{MemrError, Result};
use crate::formats::elf::{parse_header, ElfError, ElfParser, MAX_EHDR_SIZE};
use crate::io::{ReadAt, SectionReader, SourceHandle};
use crate::iomem::MemRanges;
use crate::source::MemSource;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read the image's program headers and map loadable segments to blocks.
pub fn kcore_blocks(
    handle: &Arc<SourceHandle>,
    ranges: &MemRanges,
    opts: &ExtractOptions,
) -> Result<Vec<Block>> {
    verify_size(handle, opts.min_source_size)?;

    let parser = read_program_headers(handle)?;
    debug!(
        bits = parser.header().ident.class.bits(),
        machine = ?parser.header().machine(),
        segments = parser.segments().count(),
        "parsed kcore program headers"
    );
    for issue in parser.validate() {
        warn!(path = %handle.path().display(), "{}", issue);
    }

    let Some(first) = parser.load_segments().next() else {
        return Ok(Vec::new());
    };
    let Some(first_range) = ranges.first() else {
        return Ok(Vec::new());
    };
    let offset = first.p_vaddr.wrapping_sub(first_range.start);
    debug!(vaddr = first.p_vaddr, offset, "first kcore vaddr");

    let starts = ranges.start_set();
    let mut blocks = Vec::with_capacity(ranges.len());

    for phdr in parser.load_segments() {
        let start = if phdr.p_paddr == 0 {
            debug!(
                vaddr = phdr.p_vaddr,
                "kcore physical address unavailable, resorting to virtual address"
            );
            phdr.p_vaddr.wrapping_sub(offset)
        } else {
            phdr.p_paddr
        };

        if !starts.contains(&start) {
            debug!(start, "kcore address not found in memory ranges");
            continue;
        }

        if phdr.file_end().is_none() {
            return Err(ElfError::InvalidOffset {
                offset: phdr.p_offset,
            }
            .into());
        }

        let handle = Arc::clone(handle);
        let (file_offset, len) = (phdr.p_offset, phdr.p_filesz);
        blocks.push(Block::new(
            start,
            start.saturating_add(len),
            "elf",
            move || Ok(Box::new(SectionReader::new(handle, file_offset, len)) as BlockReader),
        ));
    }

    Ok(blocks)
}

fn verify_size(handle: &SourceHandle, min_size: u64) -> Result<()> {
    if handle.size() <= min_size {
        return Err(MemrError::SourceUnavailable {
            device: MemSource::Kcore,
            reason: format!(
                "{} reports {} bytes, expected more than {}",
                handle.path().display(),
                handle.size(),
                min_size
            ),
        });
    }
    Ok(())
}

/// Decode the ELF header and program header table with positional reads.
fn read_program_headers(handle: &SourceHandle) -> Result<ElfParser> {
    let prefix_len = (MAX_EHDR_SIZE as u64).min(handle.size()) as usize;
    let mut prefix = vec![0u8; prefix_len];
    handle.read_exact_at(&mut prefix, 0)?;
    let header = parse_header(&prefix)?;

    let mut table = vec![0u8; header.ph_table_size()];
    handle
        .read_exact_at(&mut table, header.e_phoff)
        .map_err(|_| ElfError::InvalidOffset {
            offset: header.e_phoff,
        })?;

    Ok(ElfParser::with_table(header, &table)?)
}
