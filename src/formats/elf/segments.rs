//! Program header table management

use crate::formats::elf::types::*;
use crate::formats::elf::utils::EndianRead;

/// Segment table for program header management
#[derive(Debug, Clone, Default)]
pub struct SegmentTable {
    headers: Vec<ProgramHeader>,
}

impl SegmentTable {
    /// Parse a program header table.
    ///
    /// `table` holds exactly the bytes found at `e_phoff`, so entries are
    /// read relative to the start of the slice rather than the file.
    pub fn parse(table: &[u8], header: &ElfHeader) -> Result<Self> {
        let ph_entsize = header.e_phentsize as usize;
        let ph_num = header.e_phnum as usize;

        if ph_num == 0 {
            return Ok(Self::default());
        }

        let total_size = header.ph_table_size();
        if total_size > table.len() {
            return Err(ElfError::Truncated {
                offset: table.len(),
                needed: total_size,
            });
        }

        let mut headers = Vec::with_capacity(ph_num);
        for i in 0..ph_num {
            let ph_header = parse_program_header(
                table,
                i * ph_entsize,
                header.ident.class,
                header.ident.data,
            )?;
            headers.push(ph_header);
        }

        // Source order is not guaranteed; kcore consumers rely on ascending vaddr
        headers.sort_by_key(|h| h.p_vaddr);

        Ok(Self { headers })
    }

    /// All PT_LOAD headers, ascending by virtual address
    pub fn load_segments(&self) -> impl Iterator<Item = &ProgramHeader> + '_ {
        self.headers.iter().filter(|ph| ph.is_load())
    }

    /// Count segments
    pub fn count(&self) -> usize {
        self.headers.len()
    }
}

/// Parse a single program header
pub fn parse_program_header(
    data: &[u8],
    offset: usize,
    class: ElfClass,
    endian: ElfData,
) -> Result<ProgramHeader> {
    let needed = class.phdr_size();
    if offset.saturating_add(needed) > data.len() {
        return Err(ElfError::Truncated { offset, needed });
    }

    match class {
        ElfClass::Elf32 => Ok(ProgramHeader {
            p_type: data.read_u32(offset, endian)?,
            p_offset: data.read_u32(offset + 4, endian)? as u64,
            p_vaddr: data.read_u32(offset + 8, endian)? as u64,
            p_paddr: data.read_u32(offset + 12, endian)? as u64,
            p_filesz: data.read_u32(offset + 16, endian)? as u64,
            p_memsz: data.read_u32(offset + 20, endian)? as u64,
            p_flags: data.read_u32(offset + 24, endian)?,
            p_align: data.read_u32(offset + 28, endian)? as u64,
        }),
        ElfClass::Elf64 => Ok(ProgramHeader {
            p_type: data.read_u32(offset, endian)?,
            p_flags: data.read_u32(offset + 4, endian)?,
            p_offset: data.read_u64(offset + 8, endian)?,
            p_vaddr: data.read_u64(offset + 16, endian)?,
            p_paddr: data.read_u64(offset + 24, endian)?,
            p_filesz: data.read_u64(offset + 32, endian)?,
            p_memsz: data.read_u64(offset + 40, endian)?,
            p_align: data.read_u64(offset + 48, endian)?,
        }),
    }
}
