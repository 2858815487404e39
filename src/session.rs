//! Acquisition sessions.
//!
//! An [`AcquisitionSession`] ties the pieces together: it reads the RAM
//! ranges, opens one memory source, extracts a block per range and exposes
//! the composed stream through [`Read`]. Sessions are built with
//! [`AcquisitionSession::builder`]:
//!
//! ```no_run
//! use memr::{AcquisitionSession, MemSource};
//!
//! let mut session = AcquisitionSession::builder()
//!     .without_headers()
//!     .open(MemSource::Mem)?;
//! let mut out = std::fs::File::create("mem.raw")?;
//! session.copy_to(&mut out)?;
//! session.close()?;
//! # Ok::<(), memr::MemrError>(())
//! ```

use crate::block::{self, ExtractOptions};
use crate::config::{AcquisitionConfig, HeaderMode};
use crate::error::{MemrError, Result};
use crate::hashing::{DigestState, StreamDigest};
use crate::header::{ByteOrder, HeaderProvider, LimeHeader};
use crate::io::SourceHandle;
use crate::iomem::{self, MemRanges};
use crate::logging::LogContext;
use crate::progress::{LogProgress, ProgressObserver};
use crate::source::MemSource;
use crate::stream::{compose, BlockTransform, ComposeOptions, ComposedStream};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn, Dispatch};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stream built (construction in progress or a failed reset)
    Unconfigured,
    /// Stream built, nothing read yet
    Initialized,
    /// At least one read issued
    Reading,
    /// Source released
    Closed,
}

#[derive(Clone)]
enum HeaderChoice {
    FromConfig,
    Custom(Arc<dyn HeaderProvider>),
    Disabled,
}

/// Builder for [`AcquisitionSession`].
#[derive(Clone)]
pub struct SessionBuilder {
    config: AcquisitionConfig,
    header: HeaderChoice,
    transform: Option<Arc<dyn BlockTransform>>,
    progress: Option<Arc<dyn ProgressObserver>>,
    log: Option<LogContext>,
    dispatch: Option<Dispatch>,
    ranges: Option<MemRanges>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            config: AcquisitionConfig::default(),
            header: HeaderChoice::FromConfig,
            transform: None,
            progress: None,
            log: None,
            dispatch: None,
            ranges: None,
        }
    }
}

impl SessionBuilder {
    pub fn with_config(mut self, config: AcquisitionConfig) -> Self {
        self.config = config;
        self
    }

    /// Emit headers from `provider` ahead of every block.
    pub fn with_header_provider<H>(mut self, provider: H) -> Self
    where
        H: HeaderProvider + 'static,
    {
        self.header = HeaderChoice::Custom(Arc::new(provider));
        self
    }

    /// Produce a raw image with no headers.
    pub fn without_headers(mut self) -> Self {
        self.header = HeaderChoice::Disabled;
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.config.byte_order = order;
        self
    }

    /// Route each block through `transform`.
    pub fn with_transform<T>(mut self, transform: T) -> Self
    where
        T: BlockTransform + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.config.with_progress = enabled;
        self
    }

    /// Report progress to `observer` instead of the log.
    pub fn with_progress_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self.config.with_progress = true;
        self
    }

    pub fn with_digest(mut self, enabled: bool) -> Self {
        self.config.with_digest = enabled;
        self
    }

    /// Scope the session's logging to `context`.
    pub fn with_log_context(mut self, context: LogContext) -> Self {
        self.log = Some(context);
        self
    }

    /// Scope the session's logging to an existing dispatcher.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Use these ranges instead of reading the range table.
    pub fn with_ranges(mut self, ranges: MemRanges) -> Self {
        self.ranges = Some(ranges);
        self
    }

    fn resolve_dispatch(&self) -> Option<Dispatch> {
        self.dispatch
            .clone()
            .or_else(|| self.log.map(|ctx| ctx.dispatch()))
    }

    fn resolve_header(&self) -> Option<Arc<dyn HeaderProvider>> {
        match &self.header {
            HeaderChoice::FromConfig => match self.config.headers {
                HeaderMode::Lime => Some(Arc::new(LimeHeader)),
                HeaderMode::None => None,
            },
            HeaderChoice::Custom(provider) => Some(Arc::clone(provider)),
            HeaderChoice::Disabled => None,
        }
    }

    /// Open `source` and build its stream; failures are returned as-is.
    pub fn open(self, source: MemSource) -> Result<AcquisitionSession> {
        self.config.validate()?;
        let dispatch = self.resolve_dispatch();
        self.open_with(source, dispatch)
    }

    fn open_with(self, source: MemSource, dispatch: Option<Dispatch>) -> Result<AcquisitionSession> {
        let header = self.resolve_header();
        let progress = if self.config.with_progress {
            Some(
                self.progress
                    .unwrap_or_else(|| Arc::new(LogProgress::new()) as Arc<dyn ProgressObserver>),
            )
        } else {
            None
        };

        let mut session = AcquisitionSession {
            source,
            config: self.config,
            header,
            transform: self.transform,
            progress,
            dispatch,
            ranges: self.ranges,
            handle: None,
            stream: None,
            size: 0,
            bytes_read: 0,
            state: SessionState::Unconfigured,
            digest: None,
            finished_digest: None,
        };
        session.reset()?;
        Ok(session)
    }

    /// Try every source in probe order and keep the first that opens.
    pub fn probe(mut self) -> Result<AcquisitionSession> {
        self.config.validate()?;
        let dispatch = self.resolve_dispatch();
        let _guard = dispatch.as_ref().map(tracing::dispatcher::set_default);

        if self.ranges.is_none() {
            self.ranges = Some(iomem::read_ranges_from(&self.config.iomem_path)?);
        }

        let mut failures = Vec::new();
        for source in MemSource::ALL {
            match self.clone().open_with(source, dispatch.clone()) {
                Ok(session) => {
                    info!(source = %session.source(), size = session.size(), "memory source selected");
                    return Ok(session);
                }
                Err(e) if e.is_recoverable() => {
                    debug!(source = %source, error = %e, "failed to open reader");
                    failures.push((source, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        Err(MemrError::NoSourceAvailable { failures })
    }
}

/// One forward-only acquisition of physical memory.
pub struct AcquisitionSession {
    source: MemSource,
    config: AcquisitionConfig,
    header: Option<Arc<dyn HeaderProvider>>,
    transform: Option<Arc<dyn BlockTransform>>,
    progress: Option<Arc<dyn ProgressObserver>>,
    dispatch: Option<Dispatch>,
    ranges: Option<MemRanges>,
    handle: Option<Arc<SourceHandle>>,
    stream: Option<ComposedStream>,
    size: u64,
    bytes_read: u64,
    state: SessionState,
    digest: Option<DigestState>,
    finished_digest: Option<StreamDigest>,
}

impl AcquisitionSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Open `source` with default settings.
    pub fn open(source: MemSource) -> Result<Self> {
        Self::builder().open(source)
    }

    /// Probe `/proc/kcore`, `/dev/crash` and `/dev/mem` in turn with default settings.
    pub fn probe() -> Result<Self> {
        Self::builder().probe()
    }

    /// Rebuild the stream from the start.
    ///
    /// Ranges read earlier are reused. The previous source handle, if any,
    /// is released and the source reopened, so a closed session can be reset.
    pub fn reset(&mut self) -> Result<()> {
        let _guard = self.dispatch.as_ref().map(tracing::dispatcher::set_default);

        self.release();
        self.state = SessionState::Unconfigured;
        self.size = 0;
        self.bytes_read = 0;
        self.finished_digest = None;
        self.digest = self.config.with_digest.then(DigestState::new);

        let ranges = match self.ranges.take() {
            Some(ranges) => ranges,
            None => iomem::read_ranges_from(&self.config.iomem_path)?,
        };
        let ranges = &*self.ranges.insert(ranges);

        debug!(source = %self.source, ranges = ranges.len(), "initializing reader");

        let path = self.config.sources.path_for(self.source);
        let handle = SourceHandle::open(path).map_err(|e| MemrError::SourceUnavailable {
            device: self.source,
            reason: format!("{}: {}", path.display(), e),
        })?;

        let extract_opts = ExtractOptions {
            page_size: self.config.pipeline.page_size,
            pipe_capacity: self.config.pipeline.pipe_capacity,
            min_source_size: self.config.min_source_size,
            dispatch: self.dispatch.clone(),
        };
        let blocks = match block::extract(self.source, &handle, ranges, &extract_opts) {
            Ok(blocks) => blocks,
            Err(e) => {
                handle.close();
                return Err(e);
            }
        };

        let stream = compose(
            blocks,
            ComposeOptions {
                header: self.header.clone(),
                byte_order: self.config.byte_order,
                transform: self.transform.clone(),
                progress: self.progress.clone(),
                pipe_capacity: self.config.pipeline.pipe_capacity,
                chunk_size: self.config.pipeline.chunk_size,
                dispatch: self.dispatch.clone(),
            },
        );

        self.size = stream.total();
        self.stream = Some(stream);
        self.handle = Some(handle);
        self.state = SessionState::Initialized;

        debug!(source = %self.source, size = self.size, "reader ready");
        Ok(())
    }

    /// Release the source. Further reads fail until the session is reset.
    ///
    /// Closing an already closed session does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let _guard = self.dispatch.as_ref().map(tracing::dispatcher::set_default);

        if self.state == SessionState::Reading {
            if let Some(progress) = &self.progress {
                progress.finish();
            }
        }
        self.release();
        self.state = SessionState::Closed;

        debug!(source = %self.source, bytes_read = self.bytes_read, "session closed");
        Ok(())
    }

    /// Drop the stream (stopping its stages) and close the handle once.
    fn release(&mut self) {
        self.stream = None;
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
    }

    /// Copy the whole stream into `out`, returning the bytes copied.
    ///
    /// Without a transform the byte count must equal [`size`](Self::size),
    /// otherwise the copy fails with [`MemrError::Incomplete`]. A failure
    /// mid-stream is reported as [`MemrError::Aborted`] carrying the bytes
    /// consumed so far.
    pub fn copy_to<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<u64> {
        let copied = match io::copy(self, out) {
            Ok(copied) => copied,
            Err(err) => {
                return Err(match MemrError::from_io(err) {
                    state @ MemrError::InvalidState(_) => state,
                    cause => {
                        warn!(
                            read = self.bytes_read,
                            expected = self.size,
                            error = %cause,
                            "acquisition aborted"
                        );
                        MemrError::Aborted {
                            expected: self.size,
                            read: self.bytes_read,
                            source: Box::new(cause),
                        }
                    }
                })
            }
        };

        if self.transform.is_none() && copied != self.size {
            return Err(MemrError::Incomplete {
                expected: self.size,
                read: copied,
            });
        }
        Ok(copied)
    }

    pub fn source(&self) -> MemSource {
        self.source
    }

    /// Path the source was opened from
    pub fn path(&self) -> &Path {
        self.config.sources.path_for(self.source)
    }

    /// Declared stream size, before any transform
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes returned to the caller since the last reset
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ranges(&self) -> Option<&MemRanges> {
        self.ranges.as_ref()
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Digest of everything read, available once the stream hit EOF
    pub fn digest(&self) -> Option<StreamDigest> {
        self.finished_digest.clone()
    }
}

impl Read for AcquisitionSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let _guard = self.dispatch.as_ref().map(tracing::dispatcher::set_default);

        match self.state {
            SessionState::Closed => {
                return Err(MemrError::InvalidState("read after close".into()).into())
            }
            SessionState::Unconfigured => {
                return Err(MemrError::InvalidState("session is not initialized".into()).into())
            }
            SessionState::Initialized => {
                self.state = SessionState::Reading;
                if let Some(progress) = &self.progress {
                    progress.start(self.size);
                }
            }
            SessionState::Reading => {}
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(MemrError::InvalidState("no stream".into())))?;
        let n = stream.read(buf)?;
        self.bytes_read += n as u64;

        if n > 0 {
            if let Some(digest) = self.digest.as_mut() {
                digest.update(&buf[..n]);
            }
        } else if !buf.is_empty() {
            if let Some(digest) = self.digest.take() {
                let finished = digest.finalize();
                debug!(digest = %finished, "stream digest");
                self.finished_digest = Some(finished);
            }
        }

        Ok(n)
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for AcquisitionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionSession")
            .field("source", &self.source)
            .field("state", &self.state)
            .field("size", &self.size)
            .field("bytes_read", &self.bytes_read)
            .field("headers", &self.header.is_some())
            .field("transform", &self.transform.is_some())
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}
