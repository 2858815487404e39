//! Memory source kinds and their probe order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kernel interface exposing physical memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemSource {
    /// `/proc/kcore`, an ELF core view of kernel and physical memory
    Kcore,
    /// `/dev/crash`, a raw device that only tolerates page-sized reads
    Crash,
    /// `/dev/mem`, a raw physical memory device
    Mem,
}

impl MemSource {
    /// Every source, in probe order
    pub const ALL: [MemSource; 3] = [MemSource::Kcore, MemSource::Crash, MemSource::Mem];

    /// Conventional device path
    pub fn default_path(&self) -> &'static str {
        match self {
            MemSource::Kcore => "/proc/kcore",
            MemSource::Crash => "/dev/crash",
            MemSource::Mem => "/dev/mem",
        }
    }

    /// Raw devices are read by physical offset; kcore is an ELF image
    pub fn is_physical(&self) -> bool {
        !matches!(self, MemSource::Kcore)
    }

    /// Whether reads must be issued in whole pages
    pub fn force_page_reads(&self) -> bool {
        matches!(self, MemSource::Crash)
    }
}

impl fmt::Display for MemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_path())
    }
}

impl FromStr for MemSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kcore" | "/proc/kcore" => Ok(MemSource::Kcore),
            "crash" | "/dev/crash" => Ok(MemSource::Crash),
            "mem" | "/dev/mem" => Ok(MemSource::Mem),
            other => Err(format!(
                "unknown memory source {:?}; expected one of: /proc/kcore, /dev/crash, /dev/mem",
                other
            )),
        }
    }
}
