//! Error types for the salvage core

use thiserror::Error;

use crate::store::StoreError;
use crate::InodeId;

/// Errors raised while decoding metadata or reconstructing files
#[derive(Debug, Error)]
pub enum SalvageError {
    /// A directory-entry value is too short to hold the fields we decode
    #[error("malformed directory record {key:?}: {len} bytes, need at least {needed}")]
    MalformedRecord {
        key: String,
        len: usize,
        needed: usize,
    },

    /// A path component has no head entry in its parent directory
    #[error("no entry named {name:?} in directory {parent}")]
    NoSuchEntry { parent: InodeId, name: String },

    /// A dentry name that cannot be used as a single path component
    #[error("unusable entry name {name:?} (key {key:?})")]
    InvalidEntryName { key: String, name: String },

    /// A directory entry pointing back at a directory on the current path
    #[error("directory {child} is already being walked, not descending again")]
    DirectoryCycle { child: InodeId },

    #[error("invalid inode identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid size filter {0:?}: expected (+|-)<number>[KMGT]")]
    InvalidSizeRule(String),

    #[error("invalid name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Cluster-side failure (listing, lookup or data read)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local output failure (loose files or archive)
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

impl SalvageError {
    /// Whether the failure belongs to a single entry or subtree and can be
    /// contained by the walker.
    pub fn is_contained(&self) -> bool {
        !matches!(self, SalvageError::Output(_))
    }
}

pub type Result<T, E = SalvageError> = std::result::Result<T, E>;
