//! Error types for memory acquisition.
//!
//! Initialization failures (range discovery, source selection, block
//! extraction) are returned synchronously from session construction and
//! `reset`. Failures inside a pipeline stage surface through `Read` as an
//! `io::Error` wrapping [`MemrError::Pipeline`].

use crate::formats::elf::ElfError;
use crate::source::MemSource;
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for memr operations.
#[derive(Debug, Error)]
pub enum MemrError {
    /// The range table could not be read, or held no "System RAM" lines
    #[error("no valid memory ranges found in {path}: {reason}")]
    NoRangesFound { path: String, reason: String },

    /// A memory source is missing, too small or could not be opened
    #[error("{device} unavailable: {reason}")]
    SourceUnavailable { device: MemSource, reason: String },

    /// Extracted block count does not match the discovered range count
    #[error("unable to load necessary reader(s) for {device}: {blocks} blocks for {ranges} ranges")]
    BlockRangeMismatch {
        device: MemSource,
        blocks: usize,
        ranges: usize,
    },

    /// Every candidate source failed during probing
    #[error("failed to open reader for any memory device ({})", ProbeFailures(.failures))]
    NoSourceAvailable { failures: Vec<(MemSource, String)> },

    /// A header, page or transform stage failed mid-stream
    #[error("{stage} stage failed: {reason}")]
    Pipeline { stage: String, reason: String },

    /// A mid-stream failure, with how far the stream got
    #[error("acquisition aborted after {read} of {expected} bytes: {source}")]
    Aborted {
        expected: u64,
        read: u64,
        source: Box<MemrError>,
    },

    /// The composed stream ended before (or after) the declared size
    #[error("failed to read all data. expected={expected}; read={read}")]
    Incomplete { expected: u64, read: u64 },

    /// Operation not valid in the session's current lifecycle state
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// Kernel image parsing errors
    #[error("ELF error: {0}")]
    Elf(#[from] ElfError),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for memr operations
pub type Result<T> = std::result::Result<T, MemrError>;

impl MemrError {
    /// Build a pipeline error for the named stage.
    pub fn pipeline(stage: impl Into<String>, reason: impl fmt::Display) -> Self {
        MemrError::Pipeline {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    /// Recover a `MemrError` that travelled through an `io::Error`.
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<MemrError>()) {
            return MemrError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<MemrError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => MemrError::Io(io::Error::other(other)),
            None => MemrError::Io(io::Error::other("error payload missing")),
        }
    }

    /// Byte counts of an aborted stream as `(read, expected)`.
    pub fn progress(&self) -> Option<(u64, u64)> {
        match self {
            MemrError::Aborted { read, expected, .. }
            | MemrError::Incomplete { read, expected } => Some((*read, *expected)),
            _ => None,
        }
    }

    /// Whether probing may move on to the next candidate after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MemrError::SourceUnavailable { .. }
                | MemrError::BlockRangeMismatch { .. }
                | MemrError::Elf(_)
                | MemrError::Io(_)
        )
    }
}

impl From<MemrError> for io::Error {
    fn from(err: MemrError) -> io::Error {
        match err {
            MemrError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

struct ProbeFailures<'a>(&'a [(MemSource, String)]);

impl fmt::Display for ProbeFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (source, reason)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", source, reason)?;
        }
        Ok(())
    }
}
