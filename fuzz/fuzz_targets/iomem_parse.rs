#![no_main]
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if let Ok(ranges) = memr::iomem::ranges_from_reader(Cursor::new(data)) {
        assert!(ranges.iter().all(|r| r.start < r.end));
    }
});
