//! Acquisitions from raw physical memory devices.

use memr::{
    AcquisitionSession, ByteOrder, MemSource, MemrError, SegmentHeader, SegmentWalker,
};
use std::io::{self, Read};

use crate::common::{expected_raw, pattern, Fixture};

const RANGES: [(u64, u64); 2] = [(0x1000, 0x2fff), (0x4000, 0x6fff)];

fn mem_fixture() -> (Fixture, Vec<u8>) {
    let fixture = Fixture::new();
    fixture.write_iomem(&RANGES);
    let device = pattern(0x8000);
    fixture.write_source(MemSource::Mem, &device);
    (fixture, device)
}

#[test]
fn test_raw_image_matches_device() {
    let (fixture, device) = mem_fixture();
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .without_headers()
        .open(MemSource::Mem)
        .unwrap();

    let expected = expected_raw(&device, &RANGES);
    assert_eq!(session.size(), expected.len() as u64);

    let mut out = Vec::new();
    let copied = session.copy_to(&mut out).unwrap();
    assert_eq!(copied, session.size());
    assert_eq!(out, expected);
    assert_eq!(session.bytes_read(), copied);
    session.close().unwrap();
}

#[test]
fn test_lime_headers_precede_blocks() {
    let (fixture, device) = mem_fixture();
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .open(MemSource::Mem)
        .unwrap();

    let mut out = Vec::new();
    session.read_to_end(&mut out).unwrap();
    assert_eq!(out.len() as u64, session.size());

    let segments: Vec<_> = SegmentWalker::new(&out[..], ByteOrder::Little)
        .collect::<io::Result<_>>()
        .unwrap();
    assert_eq!(segments.len(), RANGES.len());

    for (seg, &(start, end)) in segments.iter().zip(RANGES.iter()) {
        assert_eq!(seg.header.magic, memr::header::LIME_MAGIC);
        assert_eq!(seg.header.version, 1);
        assert_eq!(seg.header.start, start);
        assert_eq!(seg.header.end, end - 1);

        let off = seg.data_offset as usize;
        let len = seg.header.data_len() as usize;
        assert_eq!(&out[off..off + len], &device[start as usize..end as usize]);
    }
}

#[test]
fn test_big_endian_custom_magic() {
    let (fixture, _) = mem_fixture();
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .with_byte_order(ByteOrder::Big)
        .with_header_provider(|start: u64, end: u64| {
            SegmentHeader::lime(start, end).with_magic(0x4d45_4d52)
        })
        .open(MemSource::Mem)
        .unwrap();

    let first = SegmentHeader::read_from(&mut session, ByteOrder::Big).unwrap();
    assert_eq!(first.magic, 0x4d45_4d52);
    assert_eq!(first.start, 0x1000);
    assert_eq!(first.end, 0x2ffe);
}

#[test]
fn test_crash_truncates_partial_page() {
    let fixture = Fixture::new();
    fixture.write_iomem(&RANGES);
    let device = pattern(0x8000);
    fixture.write_source(MemSource::Crash, &device);

    let mut config = fixture.config.clone();
    config.pipeline.page_size = Some(4096);

    let mut session = AcquisitionSession::builder()
        .with_config(config)
        .without_headers()
        .open(MemSource::Crash)
        .unwrap();

    // 0x2fff -> 0x2000 and 0x6fff -> 0x6000
    let aligned = [(0x1000, 0x2000), (0x4000, 0x6000)];
    assert_eq!(session.size(), 0x1000 + 0x2000);

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();
    assert_eq!(out, expected_raw(&device, &aligned));
}

#[test]
fn test_crash_headers_use_aligned_end() {
    let fixture = Fixture::new();
    fixture.write_iomem(&[(0x1000, 0x2fff)]);
    fixture.write_source(MemSource::Crash, &pattern(0x4000));

    let mut config = fixture.config.clone();
    config.pipeline.page_size = Some(4096);

    let mut session = AcquisitionSession::builder()
        .with_config(config)
        .open(MemSource::Crash)
        .unwrap();
    let header = SegmentHeader::read_from(&mut session, ByteOrder::Little).unwrap();
    assert_eq!(header.start, 0x1000);
    assert_eq!(header.end, 0x1fff);
}

#[test]
fn test_crash_empty_block_keeps_headers_in_sync() {
    let fixture = Fixture::new();
    // the first range is shorter than a page and collapses to nothing
    fixture.write_iomem(&[(0, 0xfff), (0x1000, 0x2fff)]);
    let device = pattern(0x3000);
    fixture.write_source(MemSource::Crash, &device);

    let mut config = fixture.config.clone();
    config.pipeline.page_size = Some(4096);

    let mut session = AcquisitionSession::builder()
        .with_config(config)
        .open(MemSource::Crash)
        .unwrap();
    assert_eq!(session.size(), 2 * SegmentHeader::SIZE as u64 + 0x1000);

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();

    let segments: Vec<_> = SegmentWalker::new(&out[..], ByteOrder::Little)
        .collect::<io::Result<_>>()
        .unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].header.start, 0);
    assert_eq!(segments[0].header.data_len(), 0);
    assert_eq!(segments[1].header.start, 0x1000);
    assert_eq!(segments[1].header.end, 0x1fff);

    let off = segments[1].data_offset as usize;
    assert_eq!(&out[off..], &device[0x1000..0x2000]);
}

#[test]
fn test_short_device_fails_mid_stream() {
    let fixture = Fixture::new();
    fixture.write_iomem(&RANGES);
    fixture.write_source(MemSource::Mem, &pattern(0x5000));

    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .without_headers()
        .open(MemSource::Mem)
        .unwrap();

    let mut out = Vec::new();
    let err = session.copy_to(&mut out).unwrap_err();
    match &err {
        MemrError::Aborted {
            expected,
            read,
            source,
        } => {
            assert_eq!(*expected, session.size());
            assert_eq!(*read, session.bytes_read());
            assert_eq!(*read, out.len() as u64);
            // the first range is intact, the second runs off the device
            assert!(*read >= 0x1fff && *read < *expected);
            assert!(matches!(**source, MemrError::Pipeline { .. }), "got {source:?}");
        }
        other => panic!("expected Aborted, got {other:?}"),
    }
    assert_eq!(err.progress(), Some((session.bytes_read(), session.size())));

    // the stream refuses to continue after a failure
    let mut buf = [0u8; 16];
    assert!(session.read(&mut buf).is_err());
}
