//! ELF program header parser for kernel core images.
//!
//! Only the file header and the program header table are decoded. Segment
//! contents are never read here; `/proc/kcore` reports a file size in the
//! terabytes, so callers read the header prefix and the table with
//! positional reads and hand the bytes to [`ElfParser`].

pub mod headers;
pub mod segments;
pub mod types;
pub mod utils;

pub use headers::parse_header;
use segments::SegmentTable;
pub use types::*;

/// Main ELF parser
#[derive(Debug, Clone)]
pub struct ElfParser {
    header: ElfHeader,
    segments: SegmentTable,
}

impl ElfParser {
    /// Parse ELF from a buffer holding the whole image
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = parse_header(data)?;
        let start = usize::try_from(header.e_phoff).map_err(|_| ElfError::InvalidOffset {
            offset: header.e_phoff,
        })?;
        let table = data.get(start..).ok_or(ElfError::InvalidOffset {
            offset: header.e_phoff,
        })?;
        Self::with_table(header, table)
    }

    /// Build a parser from an already decoded header and the bytes read at `e_phoff`
    pub fn with_table(header: ElfHeader, table: &[u8]) -> Result<Self> {
        let segments = SegmentTable::parse(table, &header)?;
        Ok(Self { header, segments })
    }

    /// Get ELF header
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// Get segments
    pub fn segments(&self) -> &SegmentTable {
        &self.segments
    }

    /// Loadable segments, ascending by virtual address
    pub fn load_segments(&self) -> impl Iterator<Item = &ProgramHeader> + '_ {
        self.segments.load_segments()
    }

    /// Validate ELF structure for use as a memory image
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.header.file_type() != ElfType::Core {
            errors.push(format!(
                "Unexpected ELF type {:?}, kernel images are ET_CORE",
                self.header.file_type()
            ));
        }

        if self.segments.load_segments().next().is_none() {
            errors.push("Image has no LOAD segments".to_string());
        }

        errors
    }
}
