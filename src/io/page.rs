//! Page-granular access for devices that reject partial-page reads.

use crate::pipeline::{self, StageReader};
use std::io::{self, Read, Write};
use tracing::{trace, Dispatch};

/// Fallback when the OS does not report a page size
pub const FALLBACK_PAGE_SIZE: usize = 4096;

/// System page size as reported by `sysconf(_SC_PAGESIZE)`.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions and only reads system configuration
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

/// Round `end` down to a page boundary, dropping a trailing partial page.
pub fn page_end(end: u64, page_size: usize) -> u64 {
    let page = page_size as u64;
    if page == 0 {
        return end;
    }
    end - end % page
}

/// Republish `inner` through a stage that pulls it in whole pages.
///
/// Every read issued against `inner` asks for exactly `page_size` bytes
/// except possibly the last one, when `inner` is not a page multiple long.
pub fn page_stage<R>(
    name: impl Into<String>,
    mut inner: R,
    page_size: usize,
    capacity: usize,
    dispatch: Option<&Dispatch>,
) -> io::Result<StageReader>
where
    R: Read + Send + 'static,
{
    let page_size = page_size.max(1);
    pipeline::spawn(name, capacity, dispatch, move |mut out| {
        let mut page = vec![0u8; page_size];
        let mut pages = 0u64;
        loop {
            let filled = fill_page(&mut inner, &mut page)?;
            if filled == 0 {
                break;
            }
            out.write_all(&page[..filled])?;
            pages += 1;
            if filled < page_size {
                break;
            }
        }
        trace!(pages, page_size, "page reader drained");
        Ok(())
    })
}

/// Read until `page` is full or `inner` ends; returns the bytes filled.
fn fill_page<R: Read>(inner: &mut R, page: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < page.len() {
        match inner.read(&mut page[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
