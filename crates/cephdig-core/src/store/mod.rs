//! Object-store seam
//!
//! The salvage core never holds a long-lived connection. Every cluster
//! interaction connects a fresh [`Session`], opens one [`PoolContext`],
//! performs its operation and releases both when they are dropped. The
//! [`with_pool`] helper scopes that sequence around a closure so release
//! happens on every exit path.

use std::time::Duration;

use thiserror::Error;

use crate::PoolId;

pub mod dump;
pub mod memory;

pub use dump::DumpCluster;
pub use memory::{synthesize_record, MemoryCluster};

/// Failures reported by a cluster backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(String),

    #[error("{op} timed out after {timeout:?}")]
    TimedOut { op: String, timeout: Duration },

    #[error("pool {0:?} does not exist")]
    NoSuchPool(String),

    #[error("no pool with id {0}")]
    UnknownPoolId(PoolId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Per-session tuning handed to [`Cluster::connect`]
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Bound on both session negotiation and each operation. `None`
    /// means calls may block indefinitely.
    pub op_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn bounded(timeout: Duration) -> Self {
        Self {
            op_timeout: Some(timeout),
        }
    }
}

/// Result of a stat call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    /// Logical object size as reported by the store
    pub size: u64,
}

/// One page of an omap listing
#[derive(Debug, Clone, Default)]
pub struct OmapPage {
    pub entries: Vec<(String, Vec<u8>)>,
    /// Set when the store has entries after the last one returned
    pub more: bool,
}

/// Entry point to a storage cluster
pub trait Cluster {
    fn connect(&self, options: &SessionOptions) -> Result<Box<dyn Session + '_>, StoreError>;
}

/// A connected session. Dropping it shuts the session down.
pub trait Session {
    /// Map a numeric pool id to its name
    fn pool_reverse_lookup(&self, pool_id: PoolId) -> Result<String, StoreError>;

    fn open_pool(&self, pool: &str) -> Result<Box<dyn PoolContext + '_>, StoreError>;
}

/// I/O context bound to one pool. Dropping it closes the context.
pub trait PoolContext {
    fn stat(&self, object: &str) -> Result<ObjectStat, StoreError>;

    /// Read up to `len` bytes starting at `offset`. Sparse objects may
    /// return fewer bytes than requested.
    fn read(&self, object: &str, offset: u64, len: u64) -> Result<Vec<u8>, StoreError>;

    /// Fetch one omap value, `None` when the key is absent
    fn omap_get(&self, object: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// List omap entries with keys strictly after `start_after`, in key
    /// order, at most `max` of them
    fn omap_page(&self, object: &str, start_after: &str, max: usize)
        -> Result<OmapPage, StoreError>;
}

/// Which pool a scoped call should open
#[derive(Debug, Clone, Copy)]
pub enum PoolRef<'a> {
    Name(&'a str),
    /// Resolved by reverse lookup inside the same session, never cached
    Id(PoolId),
}

/// Connect, open the pool, run `op`, release both
pub fn with_pool<T>(
    cluster: &dyn Cluster,
    options: &SessionOptions,
    pool: PoolRef<'_>,
    op: impl FnOnce(&dyn PoolContext) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let session = cluster.connect(options)?;
    let pool_name = match pool {
        PoolRef::Name(name) => name.to_string(),
        PoolRef::Id(id) => session.pool_reverse_lookup(id)?,
    };
    let ioctx = session.open_pool(&pool_name)?;
    op(ioctx.as_ref())
}

/// Collect every omap entry of `object`, following the continuation
/// cursor until the store reports no more pages.
pub fn list_omap(
    ioctx: &dyn PoolContext,
    object: &str,
    page_size: usize,
) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
    let page_size = page_size.max(1);
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    let mut cursor = String::new();

    loop {
        let page = ioctx.omap_page(object, &cursor, page_size)?;
        let last_key = match page.entries.last() {
            Some((key, _)) => key.clone(),
            None => break,
        };

        // A backend that does not advance would loop forever
        if !cursor.is_empty() && last_key <= cursor {
            tracing::warn!(
                "Omap listing of {} did not advance past {:?}, stopping",
                object,
                cursor
            );
            break;
        }

        entries.extend(page.entries);
        if !page.more {
            break;
        }
        cursor = last_key;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_omap_follows_cursor() {
        let cluster = MemoryCluster::new();
        cluster.create_pool(1, "metadata");
        for i in 0..25 {
            cluster.set_omap("metadata", "1.00000000", &format!("f{:02}_head", i), vec![0; 4]);
        }

        let keys = with_pool(
            &cluster,
            &SessionOptions::default(),
            PoolRef::Name("metadata"),
            |ioctx| list_omap(ioctx, "1.00000000", 4),
        )
        .unwrap();

        assert_eq!(keys.len(), 25);
        assert_eq!(keys[0].0, "f00_head");
        assert_eq!(keys[24].0, "f24_head");
    }

    #[test]
    fn test_with_pool_releases_session_on_error() {
        let cluster = MemoryCluster::new();
        cluster.create_pool(1, "metadata");

        let result = with_pool(
            &cluster,
            &SessionOptions::default(),
            PoolRef::Name("metadata"),
            |ioctx| ioctx.stat("missing.00000000"),
        );

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(cluster.open_sessions(), 0);
        assert_eq!(cluster.sessions_opened(), 1);
    }

    #[test]
    fn test_with_pool_unknown_pool_id() {
        let cluster = MemoryCluster::new();
        let result = with_pool(&cluster, &SessionOptions::default(), PoolRef::Id(9), |_| Ok(()));
        assert!(matches!(result, Err(StoreError::UnknownPoolId(9))));
        assert_eq!(cluster.open_sessions(), 0);
    }
}
