//! Acquisition of physical memory on Linux.
//!
//! `memr` reads every "System RAM" range listed in `/proc/iomem` from one of
//! `/proc/kcore`, `/dev/crash` or `/dev/mem` and returns it as a single
//! ordered stream, optionally preceded per range by a LiME header and
//! optionally passed through a per-block transform.

pub mod block;
pub mod config;
pub mod error;
pub mod formats;
pub mod hashing;
pub mod header;
pub mod io;
pub mod iomem;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod source;
pub mod stream;

pub use config::{AcquisitionConfig, HeaderMode, PipelineConfig, SourcePaths};
pub use error::{MemrError, Result};
pub use hashing::StreamDigest;
pub use header::{ByteOrder, HeaderProvider, LimeHeader, SegmentHeader, SegmentWalker};
pub use iomem::{MemRange, MemRanges};
pub use logging::{LogContext, LogLevel};
pub use progress::{LogProgress, ProgressObserver};
pub use session::{AcquisitionSession, SessionBuilder, SessionState};
pub use source::MemSource;
pub use stream::{BlockTransform, FinishWrite, FlushOnFinish};
