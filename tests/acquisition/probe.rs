//! Source probing.

use memr::{AcquisitionSession, MemRange, MemRanges, MemSource, MemrError};

use crate::common::{pattern, Fixture, KcoreSegment};

const RANGES: [(u64, u64); 1] = [(0x1000, 0x2fff)];

fn fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.write_iomem(&RANGES);
    fixture
}

#[test]
fn test_kcore_preferred() {
    let fixture = fixture();
    fixture.write_kcore(&[KcoreSegment::new(
        0xffff_8880_0000_1000,
        0x1000,
        pattern(0x400),
    )]);
    fixture.write_source(MemSource::Mem, &pattern(0x4000));

    let session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .probe()
        .unwrap();
    assert_eq!(session.source(), MemSource::Kcore);
    assert_eq!(session.path(), fixture.path(MemSource::Kcore));
}

#[test]
fn test_falls_back_in_order() {
    let fixture = fixture();
    // too small to be a kernel image
    fixture.write_source(MemSource::Kcore, b"not an image");
    fixture.write_source(MemSource::Crash, &pattern(0x4000));
    fixture.write_source(MemSource::Mem, &pattern(0x4000));

    let session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .probe()
        .unwrap();
    assert_eq!(session.source(), MemSource::Crash);

    std::fs::remove_file(fixture.path(MemSource::Crash)).unwrap();
    let session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .probe()
        .unwrap();
    assert_eq!(session.source(), MemSource::Mem);
}

#[test]
fn test_every_failure_reported() {
    let fixture = fixture();
    let err = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .probe()
        .unwrap_err();

    match err {
        MemrError::NoSourceAvailable { failures } => {
            let order: Vec<MemSource> = failures.iter().map(|(source, _)| *source).collect();
            assert_eq!(order, MemSource::ALL.to_vec());
        }
        other => panic!("expected NoSourceAvailable, got {other:?}"),
    }
}

#[test]
fn test_missing_range_table_is_fatal() {
    let fixture = Fixture::new();
    fixture.write_source(MemSource::Mem, &pattern(0x4000));

    let err = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .probe()
        .unwrap_err();
    assert!(matches!(err, MemrError::NoRangesFound { .. }));
}

#[test]
fn test_supplied_ranges_skip_range_table() {
    let fixture = Fixture::new();
    fixture.write_source(MemSource::Mem, &pattern(0x4000));
    let ranges = MemRanges::new(vec![MemRange::new(0x1000, 0x2000)]).unwrap();

    let session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .without_headers()
        .with_ranges(ranges.clone())
        .probe()
        .unwrap();
    assert_eq!(session.source(), MemSource::Mem);
    assert_eq!(session.size(), 0x1000);
    assert_eq!(session.ranges(), Some(&ranges));
}
