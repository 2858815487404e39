//! Composition of blocks into one ordered stream.
//!
//! The composed stream is `(header)(block bytes)` for every block in
//! ascending address order. Parts are instantiated lazily: the header stage,
//! block reader and transform stage for block N+1 are only created after
//! block N has been read to EOF.

use crate::block::{Block, BlockReader};
use crate::error::MemrError;
use crate::header::{ByteOrder, HeaderProvider, SegmentHeader};
use crate::pipeline;
use crate::progress::ProgressObserver;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::{debug, trace, Dispatch};

/// Sink returned by a transform; `finish` flushes any trailing output.
pub trait FinishWrite: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Per-block transform, e.g. compression.
///
/// `wrap` receives the stage sink and returns the writer block bytes are
/// copied into. It is called once per block.
pub trait BlockTransform: Send + Sync {
    fn wrap(&self, sink: Box<dyn Write + Send>) -> io::Result<Box<dyn FinishWrite>>;
}

impl<F> BlockTransform for F
where
    F: Fn(Box<dyn Write + Send>) -> io::Result<Box<dyn FinishWrite>> + Send + Sync,
{
    fn wrap(&self, sink: Box<dyn Write + Send>) -> io::Result<Box<dyn FinishWrite>> {
        self(sink)
    }
}

/// Adapter for writers whose only finishing step is a flush.
pub struct FlushOnFinish<W>(pub W);

impl<W: Write> Write for FlushOnFinish<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> FinishWrite for FlushOnFinish<W> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

/// Hooks and sizing used while composing.
#[derive(Clone)]
pub struct ComposeOptions {
    pub header: Option<Arc<dyn HeaderProvider>>,
    pub byte_order: ByteOrder,
    pub transform: Option<Arc<dyn BlockTransform>>,
    pub progress: Option<Arc<dyn ProgressObserver>>,
    pub pipe_capacity: usize,
    pub chunk_size: usize,
    pub dispatch: Option<Dispatch>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            header: None,
            byte_order: ByteOrder::Little,
            transform: None,
            progress: None,
            pipe_capacity: crate::config::DEFAULT_PIPE_CAPACITY,
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            dispatch: None,
        }
    }
}

impl fmt::Debug for ComposeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposeOptions")
            .field("header", &self.header.is_some())
            .field("byte_order", &self.byte_order)
            .field("transform", &self.transform.is_some())
            .field("progress", &self.progress.is_some())
            .field("pipe_capacity", &self.pipe_capacity)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

enum Part {
    Header(SegmentHeader),
    Block(Block),
}

/// Stream over every composed part, in order.
pub struct ComposedStream {
    parts: VecDeque<Part>,
    current: Option<(String, Box<dyn Read + Send>)>,
    opts: ComposeOptions,
    total: u64,
    emitted: u64,
    failed: bool,
}

/// Lay out headers and blocks and compute the declared total.
///
/// The total counts header bytes and untransformed block bytes.
pub fn compose(blocks: Vec<Block>, opts: ComposeOptions) -> ComposedStream {
    let mut parts = VecDeque::with_capacity(blocks.len() * 2);
    let mut total = 0u64;

    for blk in blocks {
        if let Some(provider) = &opts.header {
            parts.push_back(Part::Header(provider.header(blk.start(), blk.end())));
            total += SegmentHeader::SIZE as u64;
        }
        total += blk.size();
        parts.push_back(Part::Block(blk));
    }

    debug!(total, parts = parts.len(), "total size to be read");

    ComposedStream {
        parts,
        current: None,
        opts,
        total,
        emitted: 0,
        failed: false,
    }
}

impl ComposedStream {
    /// Declared size of the stream before any transform
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes returned to the caller so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Whether a part failed; the stream yields nothing further
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn open_next(&mut self) -> io::Result<bool> {
        let Some(part) = self.parts.pop_front() else {
            return Ok(false);
        };

        let opts = &self.opts;
        let (label, reader): (String, Box<dyn Read + Send>) = match part {
            Part::Header(header) => {
                let label = format!("header-{:#x}", header.start);
                let order = opts.byte_order;
                let stage = pipeline::spawn(
                    label.clone(),
                    opts.pipe_capacity,
                    opts.dispatch.as_ref(),
                    move |mut w| header.write_to(&mut w, order),
                )?;
                (label, counted(Box::new(stage), opts.progress.clone()))
            }
            Part::Block(blk) => {
                let start = blk.start();
                let label = format!("block-{:#x}", start);
                trace!(block = %blk, "opening block");
                let opened = blk.open().map_err(|e| as_pipeline_error(&label, e))?;
                let reader = counted(opened, opts.progress.clone());
                match &opts.transform {
                    Some(transform) => {
                        let label = format!("transform-{:#x}", start);
                        let stage = transform_stage(label.clone(), reader, transform, opts)?;
                        (label, Box::new(stage))
                    }
                    None => (label, reader),
                }
            }
        };

        self.current = Some((label, reader));
        Ok(true)
    }
}

impl Read for ComposedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.failed {
            return Err(
                MemrError::pipeline("compose", "stream aborted after an earlier failure").into(),
            );
        }
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.current.is_none() {
                match self.open_next() {
                    Ok(true) => {}
                    Ok(false) => return Ok(0),
                    Err(e) => {
                        self.failed = true;
                        return Err(as_pipeline_error("open", e));
                    }
                }
            }

            let Some((label, reader)) = self.current.as_mut() else {
                return Ok(0);
            };
            match reader.read(buf) {
                Ok(0) => {
                    trace!(part = %label, "part drained");
                    self.current = None;
                }
                Ok(n) => {
                    self.emitted += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let err = as_pipeline_error(label, e);
                    debug!(part = %label, error = %err, emitted = self.emitted, "part failed");
                    self.failed = true;
                    self.current = None;
                    return Err(err);
                }
            }
        }
    }
}

/// Wrap a part error as a pipeline failure unless it already is one.
fn as_pipeline_error(stage: &str, err: io::Error) -> io::Error {
    let already = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<MemrError>())
        .is_some();
    if already {
        err
    } else {
        MemrError::pipeline(stage, err).into()
    }
}

/// Reports every byte read to the observer.
struct Counted {
    inner: Box<dyn Read + Send>,
    progress: Arc<dyn ProgressObserver>,
}

impl Read for Counted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.progress.advance(n as u64);
        }
        Ok(n)
    }
}

fn counted(
    reader: Box<dyn Read + Send>,
    progress: Option<Arc<dyn ProgressObserver>>,
) -> Box<dyn Read + Send> {
    match progress {
        Some(progress) => Box::new(Counted {
            inner: reader,
            progress,
        }),
        None => reader,
    }
}

/// Copy `reader` through the transform on a stage thread.
fn transform_stage(
    name: String,
    mut reader: BlockReader,
    transform: &Arc<dyn BlockTransform>,
    opts: &ComposeOptions,
) -> io::Result<pipeline::StageReader> {
    let transform = Arc::clone(transform);
    let chunk_size = opts.chunk_size.max(1);

    pipeline::spawn(name, opts.pipe_capacity, opts.dispatch.as_ref(), move |w| {
        let mut sink = transform.wrap(Box::new(w))?;
        let mut chunk = vec![0u8; chunk_size];
        let mut copied = 0u64;
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            sink.write_all(&chunk[..n])?;
            copied += n as u64;
        }
        sink.finish()?;
        trace!(copied, "transform drained");
        Ok(())
    })
}
