#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(elf) = memr::formats::elf::ElfParser::parse(data) {
        let _ = elf.validate();
        let vaddrs: Vec<u64> = elf.load_segments().map(|ph| ph.p_vaddr).collect();
        assert!(vaddrs.windows(2).all(|w| w[0] <= w[1]));
    }
});
