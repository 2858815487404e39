//! Configuration for memory acquisition.
//!
//! Provides centralized configuration for the acquisition session with
//! sensible defaults. Everything here is plain data and can be loaded from
//! JSON; behavioural hooks (header providers, transforms, progress observers)
//! are supplied to the session builder instead.

use crate::error::{MemrError, Result};
use crate::header::ByteOrder;
use crate::iomem::IOMEM_PATH;
use crate::source::MemSource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Images at or below this size cannot hold a usable program header table
pub const MIN_SOURCE_SIZE: u64 = 4096;

/// Default chunk size used when copying block bytes through a stage (32 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Default number of chunks buffered between a stage and its reader
pub const DEFAULT_PIPE_CAPACITY: usize = 4;

/// Master configuration for an acquisition session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Paths backing each source kind.
    pub sources: SourcePaths,
    /// Range table location (default: /proc/iomem).
    pub iomem_path: PathBuf,
    /// Which headers precede each block.
    pub headers: HeaderMode,
    /// Byte order of encoded headers (default: little).
    pub byte_order: ByteOrder,
    /// Report progress while reading (default: true).
    pub with_progress: bool,
    /// Hash every byte returned to the caller (default: false).
    pub with_digest: bool,
    /// Minimum plausible kernel image size (default: 4096).
    pub min_source_size: u64,
    /// Pipeline sizing.
    pub pipeline: PipelineConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sources: SourcePaths::default(),
            iomem_path: PathBuf::from(IOMEM_PATH),
            headers: HeaderMode::Lime,
            byte_order: ByteOrder::Little,
            with_progress: true,
            with_digest: false,
            min_source_size: MIN_SOURCE_SIZE,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MemrError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MemrError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.pipe_capacity == 0 {
            return Err(MemrError::Config("pipe_capacity must be at least 1".into()));
        }
        if self.pipeline.chunk_size == 0 {
            return Err(MemrError::Config("chunk_size must be at least 1".into()));
        }
        if self.pipeline.page_size == Some(0) {
            return Err(MemrError::Config("page_size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Paths used for each source kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePaths {
    pub kcore: PathBuf,
    pub crash: PathBuf,
    pub mem: PathBuf,
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            kcore: PathBuf::from(MemSource::Kcore.default_path()),
            crash: PathBuf::from(MemSource::Crash.default_path()),
            mem: PathBuf::from(MemSource::Mem.default_path()),
        }
    }
}

impl SourcePaths {
    pub fn path_for(&self, source: MemSource) -> &Path {
        match source {
            MemSource::Kcore => &self.kcore,
            MemSource::Crash => &self.crash,
            MemSource::Mem => &self.mem,
        }
    }
}

/// Header emitted ahead of each block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    /// LiME range headers
    #[default]
    Lime,
    /// Raw image, no headers
    None,
}

/// Sizing of the producer/consumer stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Override of the system page size for page-granular devices.
    pub page_size: Option<usize>,
    /// Chunks buffered between a stage and its consumer (default: 4).
    pub pipe_capacity: usize,
    /// Copy chunk size for transform stages (default: 32768).
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: None,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
