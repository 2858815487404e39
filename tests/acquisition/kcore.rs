//! Acquisitions from a kernel core ELF image.

use memr::{AcquisitionSession, ByteOrder, MemSource, MemrError, SegmentWalker};
use std::io;

use crate::common::{pattern, Fixture, KcoreSegment};

const DIRECT_MAP: u64 = 0xffff_8880_0000_0000;
const RANGES: [(u64, u64); 2] = [(0x1000, 0x9_ffff), (0x10_0000, 0x1ff_ffff)];

fn segments() -> Vec<KcoreSegment> {
    vec![
        KcoreSegment::new(DIRECT_MAP + 0x10_0000, 0x10_0000, pattern(0x1800)),
        KcoreSegment::new(DIRECT_MAP + 0x1000, 0x1000, vec![0x5a; 0x800]),
    ]
}

fn kcore_fixture(segments: &[KcoreSegment]) -> Fixture {
    let fixture = Fixture::new();
    fixture.write_iomem(&RANGES);
    fixture.write_kcore(segments);
    fixture
}

#[test]
fn test_segments_in_address_order() {
    let fixture = kcore_fixture(&segments());
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .without_headers()
        .open(MemSource::Kcore)
        .unwrap();

    assert_eq!(session.source(), MemSource::Kcore);
    assert_eq!(session.size(), 0x800 + 0x1800);

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();
    assert_eq!(&out[..0x800], &[0x5a; 0x800][..]);
    assert_eq!(&out[0x800..], &pattern(0x1800)[..]);
}

#[test]
fn test_headers_cover_segment_extent() {
    let fixture = kcore_fixture(&segments());
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .open(MemSource::Kcore)
        .unwrap();

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();

    let headers: Vec<_> = SegmentWalker::new(&out[..], ByteOrder::Little)
        .map(|seg| seg.map(|s| (s.header.start, s.header.end)))
        .collect::<io::Result<_>>()
        .unwrap();
    assert_eq!(headers, vec![(0x1000, 0x17ff), (0x10_0000, 0x10_17ff)]);
}

#[test]
fn test_zero_paddr_recovered_from_vaddr() {
    let segs = vec![
        KcoreSegment::new(DIRECT_MAP + 0x1000, 0, vec![1; 0x100]),
        KcoreSegment::new(DIRECT_MAP + 0x10_0000, 0, vec![2; 0x200]),
    ];
    let fixture = kcore_fixture(&segs);
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .without_headers()
        .open(MemSource::Kcore)
        .unwrap();

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();
    assert_eq!(out.len(), 0x300);
    assert!(out[..0x100].iter().all(|&b| b == 1));
    assert!(out[0x100..].iter().all(|&b| b == 2));
}

#[test]
fn test_unmatched_segment_is_a_mismatch() {
    let segs = vec![
        KcoreSegment::new(DIRECT_MAP + 0x1000, 0x1000, vec![1; 0x100]),
        // not the start of any RAM range
        KcoreSegment::new(DIRECT_MAP + 0x20_0000, 0x20_0000, vec![2; 0x100]),
    ];
    let fixture = kcore_fixture(&segs);
    let err = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .open(MemSource::Kcore)
        .unwrap_err();

    assert!(matches!(
        err,
        MemrError::BlockRangeMismatch {
            device: MemSource::Kcore,
            blocks: 1,
            ranges: 2,
        }
    ));
}

#[test]
fn test_tiny_image_unavailable() {
    let fixture = Fixture::new();
    fixture.write_iomem(&RANGES);
    fixture.write_source(MemSource::Kcore, &[0u8; 4096]);

    let err = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .open(MemSource::Kcore)
        .unwrap_err();
    assert!(matches!(
        err,
        MemrError::SourceUnavailable {
            device: MemSource::Kcore,
            ..
        }
    ));
}

#[test]
fn test_garbage_image_is_elf_error() {
    let fixture = Fixture::new();
    fixture.write_iomem(&RANGES);
    fixture.write_source(MemSource::Kcore, &pattern(8192));

    let err = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .open(MemSource::Kcore)
        .unwrap_err();
    assert!(matches!(err, MemrError::Elf(_)), "got {err:?}");
}
