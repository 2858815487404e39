//! Core ELF types and constants

use std::fmt;

/// ELF parsing errors
#[derive(Debug, Clone)]
pub enum ElfError {
    InvalidMagic,
    UnsupportedClass(u8),
    UnsupportedData(u8),
    InvalidOffset { offset: u64 },
    Truncated { offset: usize, needed: usize },
    MalformedHeader(String),
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "Invalid ELF magic"),
            Self::UnsupportedClass(c) => write!(f, "Unsupported ELF class: {}", c),
            Self::UnsupportedData(d) => write!(f, "Unsupported ELF data encoding: {}", d),
            Self::InvalidOffset { offset } => write!(f, "Invalid offset: {:#x}", offset),
            Self::Truncated { offset, needed } => {
                write!(f, "Truncated at {:#x}, needed {} bytes", offset, needed)
            }
            Self::MalformedHeader(msg) => write!(f, "Malformed header: {}", msg),
        }
    }
}

impl std::error::Error for ElfError {}

pub type Result<T> = std::result::Result<T, ElfError>;

/// ELF magic number
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Size of the identification block plus the largest (64-bit) file header
pub const MAX_EHDR_SIZE: usize = 64;

/// ELF class (32-bit or 64-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32 = 1,
    Elf64 = 2,
}

impl ElfClass {
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            1 => Ok(ElfClass::Elf32),
            2 => Ok(ElfClass::Elf64),
            _ => Err(ElfError::UnsupportedClass(val)),
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 64,
        }
    }

    /// Size of the file header for this class
    pub fn ehdr_size(&self) -> usize {
        match self {
            ElfClass::Elf32 => 52,
            ElfClass::Elf64 => 64,
        }
    }

    /// Size of one program header entry for this class
    pub fn phdr_size(&self) -> usize {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }
}

/// ELF data encoding (endianness)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfData {
    Little = 1,
    Big = 2,
}

impl ElfData {
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            1 => Ok(ElfData::Little),
            2 => Ok(ElfData::Big),
            _ => Err(ElfError::UnsupportedData(val)),
        }
    }
}

/// ELF file type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    None = 0,
    Relocatable = 1,
    Executable = 2,
    SharedObject = 3,
    Core = 4,
}

impl From<u16> for ElfType {
    fn from(val: u16) -> Self {
        match val {
            1 => ElfType::Relocatable,
            2 => ElfType::Executable,
            3 => ElfType::SharedObject,
            4 => ElfType::Core,
            _ => ElfType::None,
        }
    }
}

/// ELF machine architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMachine {
    None,
    X86,
    PowerPC64,
    S390,
    ARM,
    X86_64,
    AArch64,
    RiscV,
    Other(u16),
}

impl From<u16> for ElfMachine {
    fn from(val: u16) -> Self {
        match val {
            0 => ElfMachine::None,
            3 => ElfMachine::X86,
            21 => ElfMachine::PowerPC64,
            22 => ElfMachine::S390,
            40 => ElfMachine::ARM,
            62 => ElfMachine::X86_64,
            183 => ElfMachine::AArch64,
            243 => ElfMachine::RiscV,
            other => ElfMachine::Other(other),
        }
    }
}

/// ELF identification (first 16 bytes)
#[derive(Debug, Clone, Copy)]
pub struct ElfIdent {
    pub class: ElfClass,
    pub data: ElfData,
    pub version: u8,
    pub osabi: u8,
}

/// ELF header, limited to the fields needed to locate program headers
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    pub ident: ElfIdent,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_phoff: u64,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

impl ElfHeader {
    pub fn file_type(&self) -> ElfType {
        ElfType::from(self.e_type)
    }

    pub fn machine(&self) -> ElfMachine {
        ElfMachine::from(self.e_machine)
    }

    /// Byte length of the whole program header table
    pub fn ph_table_size(&self) -> usize {
        self.e_phnum as usize * self.e_phentsize as usize
    }
}

/// Program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl ProgramHeader {
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// File offset one past the last byte backed by the image
    pub fn file_end(&self) -> Option<u64> {
        self.p_offset.checked_add(self.p_filesz)
    }
}

/// Program header types
pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;
