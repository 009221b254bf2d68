//! Offline reconstruction of a CephFS tree from its RADOS objects
//!
//! When the MDS cannot serve a filesystem, its directory fragments and
//! file data are still sitting in the metadata and data pools. This crate
//! decodes directory entries straight from the metadata objects' omaps,
//! walks the tree while skipping subtrees whose objects cannot be reached,
//! and stitches file contents back together from their 4 MiB segments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod filter;
pub mod output;
pub mod probe;
pub mod reassemble;
pub mod record;
pub mod resolve;
pub mod skiplog;
pub mod store;
pub mod walk;

pub use config::ExtractConfig;
pub use error::{Result, SalvageError};
pub use filter::{accept, Decision, FilterRules, SizePolarity, SizeRule};
pub use output::{LooseFiles, OutputSink, TarGzArchive};
pub use probe::is_unreachable;
pub use reassemble::{reassemble, ReassemblyStats};
pub use record::DirectoryEntry;
pub use resolve::{list_entries, resolve, ListedEntry, Resolution, UnresolvedPath};
pub use skiplog::{SkipLog, SkipLogFormat, SkipReason, SkipRecord};
pub use store::{Cluster, DumpCluster, MemoryCluster, StoreError};
pub use walk::{ExtractionProgress, TreeWalker};

/// Fixed object size files are striped into
pub const SEGMENT_SIZE: u64 = 4 * 1024 * 1024;

/// Suffix of the omap key of a live (non-snapshot) dentry
pub const HEAD_SUFFIX: &str = "_head";

/// Inode of the filesystem root
pub const ROOT_INODE: InodeId = InodeId(1);

/// Numeric id of a RADOS pool
pub type PoolId = u32;

/// Inode number, rendered as lowercase hex in object names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeId(u64);

impl InodeId {
    pub const fn new(ino: u64) -> Self {
        Self(ino)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Object holding this directory's entries
    pub fn metadata_object(&self) -> String {
        self.data_object(0)
    }

    /// Object holding segment `index` of this file's data
    pub fn data_object(&self, index: u64) -> String {
        format!("{:x}.{:08x}", self.0, index)
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for InodeId {
    type Err = SalvageError;

    /// Parses hex, with or without a `0x` prefix
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        u64::from_str_radix(digits, 16)
            .map(InodeId)
            .map_err(|_| SalvageError::InvalidIdentifier(s.to_string()))
    }
}

impl Serialize for InodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where an extraction starts
#[derive(Debug, Clone)]
pub enum StartPoint {
    Path(PathBuf),
    Inode(InodeId),
}

/// A file written to the output sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub identifier: InodeId,
    pub pool_id: PoolId,
    pub size: u64,
    #[serde(flatten)]
    pub stats: ReassemblyStats,
}

/// An entry or subtree that could not be processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryFailure {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<InodeId>,
    pub error: String,
}

/// Outcome of one extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub run_id: Uuid,
    pub root: InodeId,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub directories: usize,
    pub files: Vec<ExtractedFile>,
    pub skipped: Vec<SkipRecord>,
    pub failures: Vec<EntryFailure>,
    pub total_bytes: u64,
    pub zero_filled_bytes: u64,
}

impl ExtractionReport {
    pub fn new(root: InodeId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            root,
            started_at: Utc::now(),
            finished_at: None,
            directories: 0,
            files: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            total_bytes: 0,
            zero_filled_bytes: 0,
        }
    }

    /// Share of written bytes that came from the cluster rather than
    /// zero-fill, 1.0 when nothing was written
    pub fn recovered_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.total_bytes - self.zero_filled_bytes) as f64 / self.total_bytes as f64
    }
}

/// Turn a start point into an inode, resolving paths through the tree
pub fn locate(
    cluster: &dyn Cluster,
    config: &ExtractConfig,
    start: &StartPoint,
) -> Result<Resolution> {
    match start {
        StartPoint::Inode(id) => Ok(Resolution::Resolved(*id)),
        StartPoint::Path(path) => resolve(cluster, config, path),
    }
}

/// Walk the tree under `root`, writing every accepted file to `sink`
pub fn extract_tree(
    cluster: &dyn Cluster,
    config: &ExtractConfig,
    root: InodeId,
    sink: &mut dyn OutputSink,
    skip_log: Option<SkipLog>,
) -> Result<ExtractionReport> {
    let mut walker = TreeWalker::new(cluster, config);
    if let Some(log) = skip_log {
        walker = walker.with_skip_log(log);
    }
    let report = walker.run(root, sink)?;
    sink.finish()?;
    Ok(report)
}
