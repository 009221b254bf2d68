//! In-memory cluster
//!
//! Holds pools, objects and omaps in process memory. Besides serving as a
//! fixture for tests it supports fault injection (unreachable objects,
//! sparse objects, missing segments) and keeps count of sessions and
//! operations so callers can check that every session is released.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};

use byteorder::{ByteOrder, LittleEndian};

use super::{Cluster, ObjectStat, OmapPage, PoolContext, Session, SessionOptions, StoreError};
use crate::record::{
    CHILD_ID_HIGH_OFFSET, CHILD_ID_LOW_OFFSET, POOL_ID_OFFSET, RECORD_MIN_LEN, SIZE_HIGH_OFFSET,
    SIZE_LOW_OFFSET,
};
use crate::{InodeId, PoolId, HEAD_SUFFIX};

/// Build a directory-entry value with the given fields at the offsets the
/// record codec reads them from. All other bytes are zero.
pub fn synthesize_record(child_id: InodeId, pool_id: PoolId, size: u64) -> Vec<u8> {
    let mut buf = vec![0u8; RECORD_MIN_LEN];
    let child = child_id.as_u64();
    LittleEndian::write_u32(&mut buf[CHILD_ID_LOW_OFFSET..], child as u32);
    LittleEndian::write_u32(&mut buf[CHILD_ID_HIGH_OFFSET..], (child >> 32) as u32);
    LittleEndian::write_u32(&mut buf[POOL_ID_OFFSET..], pool_id);
    LittleEndian::write_u32(&mut buf[SIZE_LOW_OFFSET..], size as u32);
    LittleEndian::write_u32(&mut buf[SIZE_HIGH_OFFSET..], (size >> 32) as u32);
    buf
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    /// Size reported by stat; larger than `data` for sparse objects
    logical_size: u64,
}

#[derive(Debug, Default)]
struct ClusterState {
    pools: BTreeMap<PoolId, String>,
    objects: HashMap<(String, String), StoredObject>,
    omaps: HashMap<(String, String), BTreeMap<String, Vec<u8>>>,
    unreachable: HashSet<String>,
}

/// Cluster backed by process memory
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: RefCell<ClusterState>,
    sessions_opened: Cell<usize>,
    open_sessions: Cell<usize>,
    calls: Cell<usize>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_pool(&self, id: PoolId, name: &str) {
        self.state.borrow_mut().pools.insert(id, name.to_string());
    }

    pub fn put_object(&self, pool: &str, object: &str, data: Vec<u8>) {
        let logical_size = data.len() as u64;
        self.put_sparse_object(pool, object, data, logical_size);
    }

    /// Store an object whose stat size is `logical_size` but of which only
    /// `data` is physically present
    pub fn put_sparse_object(&self, pool: &str, object: &str, data: Vec<u8>, logical_size: u64) {
        self.state.borrow_mut().objects.insert(
            (pool.to_string(), object.to_string()),
            StoredObject { data, logical_size },
        );
    }

    pub fn remove_object(&self, pool: &str, object: &str) {
        let mut state = self.state.borrow_mut();
        let key = (pool.to_string(), object.to_string());
        state.objects.remove(&key);
        state.omaps.remove(&key);
    }

    /// Set one omap key, creating the (empty) object if needed
    pub fn set_omap(&self, pool: &str, object: &str, key: &str, value: Vec<u8>) {
        let mut state = self.state.borrow_mut();
        let id = (pool.to_string(), object.to_string());
        state.objects.entry(id.clone()).or_insert(StoredObject {
            data: Vec::new(),
            logical_size: 0,
        });
        state
            .omaps
            .entry(id)
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Create the metadata object of a directory with no entries
    pub fn create_directory(&self, pool: &str, dir: InodeId) {
        let mut state = self.state.borrow_mut();
        let id = (pool.to_string(), dir.metadata_object());
        state.objects.entry(id.clone()).or_insert(StoredObject {
            data: Vec::new(),
            logical_size: 0,
        });
        state.omaps.entry(id).or_default();
    }

    /// Add a head dentry named `name` to `parent`. Directory entries
    /// (`pool_id == 0`) also get an empty metadata object of their own.
    pub fn add_entry(
        &self,
        metadata_pool: &str,
        parent: InodeId,
        name: &str,
        child: InodeId,
        pool_id: PoolId,
        size: u64,
    ) {
        self.set_omap(
            metadata_pool,
            &parent.metadata_object(),
            &format!("{}{}", name, HEAD_SUFFIX),
            synthesize_record(child, pool_id, size),
        );
        if pool_id == 0 {
            self.create_directory(metadata_pool, child);
        }
    }

    /// Make every operation on `object` fail as if its OSDs were down
    pub fn set_unreachable(&self, object: &str) {
        self.state.borrow_mut().unreachable.insert(object.to_string());
    }

    /// Total number of pool lookups and object operations served
    pub fn call_count(&self) -> usize {
        self.calls.get()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.get()
    }

    /// Sessions connected and not yet dropped
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.get()
    }

    fn count_call(&self) {
        self.calls.set(self.calls.get() + 1);
    }
}

impl Cluster for MemoryCluster {
    fn connect(&self, options: &SessionOptions) -> Result<Box<dyn Session + '_>, StoreError> {
        self.sessions_opened.set(self.sessions_opened.get() + 1);
        self.open_sessions.set(self.open_sessions.get() + 1);
        Ok(Box::new(MemorySession {
            cluster: self,
            options: options.clone(),
        }))
    }
}

struct MemorySession<'a> {
    cluster: &'a MemoryCluster,
    options: SessionOptions,
}

impl Drop for MemorySession<'_> {
    fn drop(&mut self) {
        let open = self.cluster.open_sessions.get();
        self.cluster.open_sessions.set(open.saturating_sub(1));
    }
}

impl Session for MemorySession<'_> {
    fn pool_reverse_lookup(&self, pool_id: PoolId) -> Result<String, StoreError> {
        self.cluster.count_call();
        self.cluster
            .state
            .borrow()
            .pools
            .get(&pool_id)
            .cloned()
            .ok_or(StoreError::UnknownPoolId(pool_id))
    }

    fn open_pool(&self, pool: &str) -> Result<Box<dyn PoolContext + '_>, StoreError> {
        let known = self.cluster.state.borrow().pools.values().any(|p| p == pool);
        if !known {
            return Err(StoreError::NoSuchPool(pool.to_string()));
        }
        Ok(Box::new(MemoryPool {
            session: self,
            pool: pool.to_string(),
        }))
    }
}

struct MemoryPool<'a> {
    session: &'a MemorySession<'a>,
    pool: String,
}

impl MemoryPool<'_> {
    fn check_reachable(&self, op: &str, object: &str) -> Result<(), StoreError> {
        let cluster = self.session.cluster;
        cluster.count_call();
        if !cluster.state.borrow().unreachable.contains(object) {
            return Ok(());
        }
        match self.session.options.op_timeout {
            Some(timeout) => Err(StoreError::TimedOut {
                op: format!("{} {}", op, object),
                timeout,
            }),
            None => Err(StoreError::Transport(format!("{} {}: no OSD answered", op, object))),
        }
    }

    fn key(&self, object: &str) -> (String, String) {
        (self.pool.clone(), object.to_string())
    }
}

impl PoolContext for MemoryPool<'_> {
    fn stat(&self, object: &str) -> Result<ObjectStat, StoreError> {
        self.check_reachable("stat", object)?;
        let state = self.session.cluster.state.borrow();
        state
            .objects
            .get(&self.key(object))
            .map(|o| ObjectStat {
                size: o.logical_size,
            })
            .ok_or_else(|| StoreError::NotFound(object.to_string()))
    }

    fn read(&self, object: &str, offset: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        self.check_reachable("read", object)?;
        let state = self.session.cluster.state.borrow();
        let stored = state
            .objects
            .get(&self.key(object))
            .ok_or_else(|| StoreError::NotFound(object.to_string()))?;
        let start = (offset as usize).min(stored.data.len());
        let end = (offset.saturating_add(len) as usize).min(stored.data.len());
        Ok(stored.data[start..end].to_vec())
    }

    fn omap_get(&self, object: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_reachable("omap_get", object)?;
        let state = self.session.cluster.state.borrow();
        let omap = state
            .omaps
            .get(&self.key(object))
            .ok_or_else(|| StoreError::NotFound(object.to_string()))?;
        Ok(omap.get(key).cloned())
    }

    fn omap_page(
        &self,
        object: &str,
        start_after: &str,
        max: usize,
    ) -> Result<OmapPage, StoreError> {
        self.check_reachable("omap_list", object)?;
        let state = self.session.cluster.state.borrow();
        let omap = state
            .omaps
            .get(&self.key(object))
            .ok_or_else(|| StoreError::NotFound(object.to_string()))?;

        let mut remaining = omap
            .iter()
            .filter(|(k, _)| start_after.is_empty() || k.as_str() > start_after);
        let entries: Vec<(String, Vec<u8>)> = remaining
            .by_ref()
            .take(max)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let more = remaining.next().is_some();

        Ok(OmapPage { entries, more })
    }
}
