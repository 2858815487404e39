//! Producer/consumer pipeline stages.
//!
//! A stage runs producer logic on a dedicated worker thread and hands its
//! output to the consuming side through a bounded channel of [`Bytes`]
//! chunks. The consumer sees an ordinary [`Read`]. The producer blocks once
//! `capacity` chunks are queued, so memory held by a stage is bounded no
//! matter how much data flows through it.
//!
//! Producer errors are forwarded to the reader and reported as
//! [`MemrError::Pipeline`]. A producer that panics is reported the same way
//! instead of looking like a clean end of stream.

use crate::error::MemrError;
use bytes::{Buf, Bytes};
use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, Dispatch};

type Message = io::Result<Bytes>;

/// Write side of a stage, owned by the producer.
pub struct StageWriter {
    tx: SyncSender<Message>,
}

impl Write for StageWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stage reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read side of a stage.
pub struct StageReader {
    name: String,
    rx: Receiver<Message>,
    current: Bytes,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

impl StageReader {
    /// Reap the worker once the channel is closed; a panic becomes an error.
    fn reap(&mut self) -> io::Result<()> {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(MemrError::pipeline(&self.name, "producer panicked").into());
            }
        }
        Ok(())
    }
}

impl Read for StageReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if !self.current.is_empty() {
                let n = buf.len().min(self.current.len());
                buf[..n].copy_from_slice(&self.current[..n]);
                self.current.advance(n);
                return Ok(n);
            }

            if self.finished {
                return Ok(0);
            }

            match self.rx.recv() {
                Ok(Ok(chunk)) => self.current = chunk,
                Ok(Err(e)) => {
                    self.finished = true;
                    let _ = self.reap();
                    return Err(MemrError::pipeline(&self.name, e).into());
                }
                Err(_) => {
                    // every sender is gone: clean end of stream, or a panic
                    self.finished = true;
                    self.reap()?;
                    trace!(stage = %self.name, "stage drained");
                    return Ok(0);
                }
            }
        }
    }
}

/// Spawn a stage running `producer` on its own thread.
///
/// The producer receives the write side by value, so it may wrap it (a
/// transform taking ownership of its sink, for example). Returning `Err`
/// delivers that error to the reader after any chunks already queued.
/// When `dispatch` is set the worker logs through it rather than through
/// whatever subscriber happens to be global.
pub fn spawn<F>(
    name: impl Into<String>,
    capacity: usize,
    dispatch: Option<&Dispatch>,
    producer: F,
) -> io::Result<StageReader>
where
    F: FnOnce(StageWriter) -> io::Result<()> + Send + 'static,
{
    let name = name.into();
    let (tx, rx) = sync_channel::<Message>(capacity.max(1));
    let err_tx = tx.clone();
    let writer = StageWriter { tx };
    let dispatch = dispatch.cloned();
    let stage = name.clone();

    let handle = thread::Builder::new()
        .name(format!("memr-{}", name))
        .spawn(move || {
            let _guard = dispatch.as_ref().map(tracing::dispatcher::set_default);
            if let Err(e) = producer(writer) {
                debug!(stage = %stage, error = %e, "stage producer failed");
                // reader may already be gone; nothing else to tell
                let _ = err_tx.send(Err(e));
            }
        })?;

    Ok(StageReader {
        name,
        rx,
        current: Bytes::new(),
        handle: Some(handle),
        finished: false,
    })
}
