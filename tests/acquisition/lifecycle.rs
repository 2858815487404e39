//! Session lifecycle, hooks and configuration.

use memr::{
    AcquisitionConfig, AcquisitionSession, FinishWrite, FlushOnFinish, HeaderMode, LogContext,
    LogLevel, MemSource, MemrError, ProgressObserver, SessionState,
};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::{expected_raw, pattern, Fixture};

const RANGES: [(u64, u64); 3] = [(0x1000, 0x1fff), (0x3000, 0x4fff), (0x8000, 0x8fff)];

fn mem_fixture() -> (Fixture, Vec<u8>) {
    let fixture = Fixture::new();
    fixture.write_iomem(&RANGES);
    let device = pattern(0x9000);
    fixture.write_source(MemSource::Mem, &device);
    (fixture, device)
}

#[derive(Default)]
struct Recorder {
    total: AtomicU64,
    done: AtomicU64,
    finished: AtomicUsize,
}

impl ProgressObserver for Recorder {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn advance(&self, n: u64) {
        self.done.fetch_add(n, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Run-length encodes each block as (count, byte) pairs.
struct RunLength {
    sink: Box<dyn Write + Send>,
    run: Option<(u8, u8)>,
}

impl RunLength {
    fn flush_run(&mut self) -> io::Result<()> {
        if let Some((byte, count)) = self.run.take() {
            self.sink.write_all(&[count, byte])?;
        }
        Ok(())
    }
}

impl Write for RunLength {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            let current = self.run;
            self.run = match current {
                Some((byte, count)) if byte == b && count < u8::MAX => Some((byte, count + 1)),
                _ => {
                    self.flush_run()?;
                    Some((b, 1))
                }
            };
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl FinishWrite for RunLength {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush_run()?;
        self.sink.flush()
    }
}

fn run_length_decode(encoded: &[u8]) -> Vec<u8> {
    encoded
        .chunks(2)
        .flat_map(|pair| std::iter::repeat(pair[1]).take(pair[0] as usize))
        .collect()
}

#[test]
fn test_close_after_partial_read() {
    let (fixture, _) = mem_fixture();
    let recorder = Arc::new(Recorder::default());
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .with_progress_observer(recorder.clone())
        .open(MemSource::Mem)
        .unwrap();

    let mut buf = vec![0u8; 100];
    session.read_exact(&mut buf).unwrap();
    assert_eq!(recorder.total.load(Ordering::SeqCst), session.size());

    session.close().unwrap();
    session.close().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);

    let err = session.read(&mut buf).unwrap_err();
    assert!(matches!(MemrError::from_io(err), MemrError::InvalidState(_)));
}

#[test]
fn test_reset_restarts_stream() {
    let (fixture, device) = mem_fixture();
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .without_headers()
        .open(MemSource::Mem)
        .unwrap();

    let mut head = vec![0u8; 64];
    session.read_exact(&mut head).unwrap();
    session.reset().unwrap();
    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(session.bytes_read(), 0);

    // ranges are cached: a vanished table does not matter any more
    std::fs::remove_file(&fixture.config.iomem_path).unwrap();
    session.reset().unwrap();

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();
    assert_eq!(out, expected_raw(&device, &RANGES));
}

#[test]
fn test_progress_reaches_declared_size() {
    let (fixture, _) = mem_fixture();
    let recorder = Arc::new(Recorder::default());
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .with_progress_observer(recorder.clone())
        .open(MemSource::Mem)
        .unwrap();

    session.copy_to(&mut io::sink()).unwrap();
    session.close().unwrap();
    assert_eq!(recorder.done.load(Ordering::SeqCst), session.size());
}

#[test]
fn test_progress_disabled() {
    let (fixture, _) = mem_fixture();
    let recorder = Arc::new(Recorder::default());
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .with_progress_observer(recorder.clone())
        .with_progress(false)
        .open(MemSource::Mem)
        .unwrap();

    session.copy_to(&mut io::sink()).unwrap();
    assert_eq!(recorder.done.load(Ordering::SeqCst), 0);
}

#[test]
fn test_transform_applied_per_block() {
    let (fixture, device) = mem_fixture();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .without_headers()
        .with_transform(
            move |sink: Box<dyn Write + Send>| -> io::Result<Box<dyn FinishWrite>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(RunLength { sink, run: None }))
            },
        )
        .open(MemSource::Mem)
        .unwrap();

    let declared = session.size();
    let mut encoded = Vec::new();
    // size-changing transform: no size check
    session.copy_to(&mut encoded).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), RANGES.len());
    assert_eq!(declared, expected_raw(&device, &RANGES).len() as u64);
    assert_eq!(run_length_decode(&encoded), expected_raw(&device, &RANGES));
}

#[test]
fn test_flush_only_transform_is_identity() {
    let (fixture, device) = mem_fixture();
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .without_headers()
        .with_transform(
            |sink: Box<dyn Write + Send>| -> io::Result<Box<dyn FinishWrite>> {
                Ok(Box::new(FlushOnFinish(sink)))
            },
        )
        .open(MemSource::Mem)
        .unwrap();

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();
    assert_eq!(out, expected_raw(&device, &RANGES));
}

#[test]
fn test_digest_of_headered_stream() {
    let (fixture, _) = mem_fixture();
    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .with_digest(true)
        .open(MemSource::Mem)
        .unwrap();

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();
    let digest = session.digest().unwrap();
    assert_eq!(digest.bytes, out.len() as u64);
    assert_eq!(digest.sha256, memr::hashing::sha256_digest(&out));
    assert_eq!(digest.blake3, memr::hashing::blake3_digest(&out));
}

#[test]
fn test_config_file_drives_session() {
    let (fixture, device) = mem_fixture();
    let mut config = fixture.config.clone();
    config.headers = HeaderMode::None;
    let path = fixture.dir.path().join("memr.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = AcquisitionConfig::from_json_file(&path).unwrap();
    let mut session = AcquisitionSession::builder()
        .with_config(loaded)
        .open(MemSource::Mem)
        .unwrap();

    let mut out = Vec::new();
    session.copy_to(&mut out).unwrap();
    assert_eq!(out, expected_raw(&device, &RANGES));
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_logging_scoped_to_session() {
    let (fixture, _) = mem_fixture();
    let captured = Captured::default();
    let sink = captured.clone();
    let dispatch = LogContext::new(LogLevel::Debug).dispatch_with_writer(move || sink.clone());

    let mut session = AcquisitionSession::builder()
        .with_config(fixture.config.clone())
        .with_dispatch(dispatch)
        .open(MemSource::Mem)
        .unwrap();
    session.copy_to(&mut io::sink()).unwrap();
    session.close().unwrap();

    let logs = String::from_utf8_lossy(&captured.0.lock().unwrap()).into_owned();
    assert!(logs.contains("loaded ranges"));
    assert!(logs.contains("session closed"));
}
