#![no_main]
use libfuzzer_sys::fuzz_target;
use memr::{ByteOrder, SegmentWalker};

fuzz_target!(|data: &[u8]| {
    for order in [ByteOrder::Little, ByteOrder::Big] {
        for segment in SegmentWalker::new(data, order) {
            if segment.is_err() {
                break;
            }
        }
    }
});
