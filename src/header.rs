//! Per-segment header codec.
//!
//! The layout is the LiME range header:
//!
//! ```text
//! typedef struct {
//!     unsigned int magic;           // 0x4C694D45 (LiME)
//!     unsigned int version;         // always 1
//!     unsigned long long s_addr;    // starting address of physical RAM range
//!     unsigned long long e_addr;    // ending address of physical RAM range (inclusive)
//!     unsigned char reserved[8];    // currently all zeros
//! }
//! ```
//!
//! Byte order is chosen by the caller and applies to every integer field.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// LiME magic ("EMiL" when read as little-endian bytes)
pub const LIME_MAGIC: u32 = 0x4C69_4D45;

/// LiME header version
pub const LIME_VERSION: u32 = 1;

/// Byte order applied to encoded headers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    fn put_u32(self, out: &mut [u8], value: u32) {
        out.copy_from_slice(&match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        });
    }

    fn put_u64(self, out: &mut [u8], value: u64) {
        out.copy_from_slice(&match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        });
    }

    fn get_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    fn get_u64(self, bytes: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        }
    }
}

/// Fixed-size descriptor emitted ahead of each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u32,
    pub start: u64,
    /// Last address covered by the segment
    pub end: u64,
    pub reserved: [u8; 8],
}

impl SegmentHeader {
    /// Encoded size in bytes
    pub const SIZE: usize = 32;

    /// LiME header for a block spanning `[start, end)`.
    ///
    /// The inclusive end wraps for an empty block at address 0 so that
    /// [`data_len`](Self::data_len) still reports zero bytes.
    pub fn lime(start: u64, end: u64) -> Self {
        Self {
            magic: LIME_MAGIC,
            version: LIME_VERSION,
            start,
            end: end.wrapping_sub(1),
            reserved: [0; 8],
        }
    }

    /// Replace the magic, keeping every other field
    pub fn with_magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    /// Number of data bytes that follow this header in a headered image
    pub fn data_len(&self) -> u64 {
        self.end.wrapping_sub(self.start).wrapping_add(1)
    }

    pub fn encode(&self, order: ByteOrder) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        order.put_u32(&mut out[0..4], self.magic);
        order.put_u32(&mut out[4..8], self.version);
        order.put_u64(&mut out[8..16], self.start);
        order.put_u64(&mut out[16..24], self.end);
        out[24..32].copy_from_slice(&self.reserved);
        out
    }

    pub fn decode(bytes: &[u8; Self::SIZE], order: ByteOrder) -> Self {
        let field4 = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        let field8 = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            b
        };
        Self {
            magic: order.get_u32(field4(0)),
            version: order.get_u32(field4(4)),
            start: order.get_u64(field8(8)),
            end: order.get_u64(field8(16)),
            reserved: field8(24),
        }
    }

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W, order: ByteOrder) -> io::Result<()> {
        writer.write_all(&self.encode(order))
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R, order: ByteOrder) -> io::Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;
        Ok(Self::decode(&buf, order))
    }
}

/// Supplies the header emitted ahead of the block spanning `[start, end)`.
pub trait HeaderProvider: Send + Sync {
    fn header(&self, start: u64, end: u64) -> SegmentHeader;
}

impl<F> HeaderProvider for F
where
    F: Fn(u64, u64) -> SegmentHeader + Send + Sync,
{
    fn header(&self, start: u64, end: u64) -> SegmentHeader {
        self(start, end)
    }
}

/// Default provider producing LiME headers
#[derive(Debug, Clone, Copy, Default)]
pub struct LimeHeader;

impl HeaderProvider for LimeHeader {
    fn header(&self, start: u64, end: u64) -> SegmentHeader {
        SegmentHeader::lime(start, end)
    }
}

/// Location of one segment inside a headered image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSegment {
    pub header: SegmentHeader,
    /// Stream offset of the first data byte
    pub data_offset: u64,
}

/// Walks a headered image, yielding each header and skipping its data.
pub struct SegmentWalker<R> {
    inner: R,
    order: ByteOrder,
    offset: u64,
    done: bool,
}

impl<R: Read> SegmentWalker<R> {
    pub fn new(inner: R, order: ByteOrder) -> Self {
        Self {
            inner,
            order,
            offset: 0,
            done: false,
        }
    }

    fn next_segment(&mut self) -> io::Result<Option<ImageSegment>> {
        let mut buf = [0u8; SegmentHeader::SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => return Ok(None),
            SegmentHeader::SIZE => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("truncated segment header at offset {}", self.offset),
                ))
            }
        }

        let header = SegmentHeader::decode(&buf, self.order);
        self.offset += SegmentHeader::SIZE as u64;
        let data_offset = self.offset;

        let want = header.data_len();
        let skipped = io::copy(&mut (&mut self.inner).take(want), &mut io::sink())?;
        if skipped != want {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "segment at offset {} truncated: expected {} bytes, found {}",
                    data_offset, want, skipped
                ),
            ));
        }
        self.offset += want;

        Ok(Some(ImageSegment {
            header,
            data_offset,
        }))
    }
}

impl<R: Read> Iterator for SegmentWalker<R> {
    type Item = io::Result<ImageSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_segment() {
            Ok(Some(seg)) => Some(Ok(seg)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
