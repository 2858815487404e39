//! ELF header parsing

use crate::formats::elf::types::*;
use crate::formats::elf::utils::EndianRead;

/// Parse ELF identification bytes
pub fn parse_ident(data: &[u8]) -> Result<ElfIdent> {
    if data.len() < 16 {
        return Err(ElfError::Truncated {
            offset: 0,
            needed: 16,
        });
    }

    // Check magic
    if &data[0..4] != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }

    let class = ElfClass::from_u8(data[4])?;
    let data_encoding = ElfData::from_u8(data[5])?;

    Ok(ElfIdent {
        class,
        data: data_encoding,
        version: data[6],
        osabi: data[7],
    })
}

/// Parse ELF header
pub fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    let ident = parse_ident(data)?;

    let header_size = ident.class.ehdr_size();
    if data.len() < header_size {
        return Err(ElfError::Truncated {
            offset: 0,
            needed: header_size,
        });
    }

    let endian = ident.data;

    let e_type = data.read_u16(16, endian)?;
    let e_machine = data.read_u16(18, endian)?;
    let e_version = data.read_u32(20, endian)?;

    let (e_phoff, e_ehsize, e_phentsize, e_phnum) = match ident.class {
        ElfClass::Elf32 => (
            data.read_u32(28, endian)? as u64,
            data.read_u16(40, endian)?,
            data.read_u16(42, endian)?,
            data.read_u16(44, endian)?,
        ),
        ElfClass::Elf64 => (
            data.read_u64(32, endian)?,
            data.read_u16(52, endian)?,
            data.read_u16(54, endian)?,
            data.read_u16(56, endian)?,
        ),
    };

    if e_ehsize as usize != header_size {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_ehsize: expected {}, got {}",
            header_size, e_ehsize
        )));
    }

    let expected_phentsize = ident.class.phdr_size();
    if e_phnum > 0 && e_phentsize as usize != expected_phentsize {
        return Err(ElfError::MalformedHeader(format!(
            "Invalid e_phentsize: expected {}, got {}",
            expected_phentsize, e_phentsize
        )));
    }

    Ok(ElfHeader {
        ident,
        e_type,
        e_machine,
        e_version,
        e_phoff,
        e_ehsize,
        e_phentsize,
        e_phnum,
    })
}
