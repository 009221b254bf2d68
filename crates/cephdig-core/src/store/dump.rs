//! On-disk object dump
//!
//! Serves objects exported from a cluster into a plain directory tree:
//!
//! ```text
//! <root>/pools.json                      {"pools": [{"id": 1, "name": "metadata"}, ...]}
//! <root>/<pool>/<object>                 object bytes
//! <root>/<pool>/.omap/<object>.json      {"<key>": [<byte>, ...], ...}
//! ```
//!
//! Sessions created with an operation timeout run every filesystem call
//! on a helper thread and give up waiting once the timeout expires, which
//! keeps a probe against a stalled network mount bounded.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Cluster, ObjectStat, OmapPage, PoolContext, Session, SessionOptions, StoreError};
use crate::PoolId;

const POOL_TABLE: &str = "pools.json";
const OMAP_DIR: &str = ".omap";

type Omap = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub id: PoolId,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PoolTable {
    pools: Vec<PoolEntry>,
}

/// Cluster served from an exported directory tree
#[derive(Debug, Clone)]
pub struct DumpCluster {
    root: PathBuf,
}

impl DumpCluster {
    /// Open an existing dump
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let table = root.join(POOL_TABLE);
        if !table.is_file() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is missing", table.display()),
            )));
        }
        Ok(Self { root })
    }

    /// Create an empty dump with the given pools
    pub fn create(root: impl AsRef<Path>, pools: &[(PoolId, &str)]) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let table = PoolTable {
            pools: pools
                .iter()
                .map(|(id, name)| PoolEntry {
                    id: *id,
                    name: name.to_string(),
                })
                .collect(),
        };
        for entry in &table.pools {
            fs::create_dir_all(root.join(&entry.name).join(OMAP_DIR))?;
        }
        let json = serde_json::to_string_pretty(&table)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(root.join(POOL_TABLE), json)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn put_object(&self, pool: &str, object: &str, data: &[u8]) -> Result<(), StoreError> {
        fs::write(self.root.join(pool).join(object), data)?;
        Ok(())
    }

    /// Write the omap of `object`, creating an empty object if none exists
    pub fn put_omap(&self, pool: &str, object: &str, omap: &Omap) -> Result<(), StoreError> {
        let pool_dir = self.root.join(pool);
        let object_path = pool_dir.join(object);
        if !object_path.exists() {
            File::create(&object_path)?;
        }
        let json = serde_json::to_string(omap)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(omap_path(&pool_dir, object), json)?;
        Ok(())
    }
}

impl Cluster for DumpCluster {
    fn connect(&self, options: &SessionOptions) -> Result<Box<dyn Session + '_>, StoreError> {
        let table_path = self.root.join(POOL_TABLE);
        let timeout = options.op_timeout;
        let table = bounded(timeout, "connect".to_string(), move || {
            let raw = fs::read(&table_path)?;
            serde_json::from_slice::<PoolTable>(&raw)
                .map_err(|e| StoreError::Transport(format!("unreadable pool table: {}", e)))
        })?;

        Ok(Box::new(DumpSession {
            root: self.root.clone(),
            pools: table.pools,
            timeout,
        }))
    }
}

struct DumpSession {
    root: PathBuf,
    pools: Vec<PoolEntry>,
    timeout: Option<Duration>,
}

impl Session for DumpSession {
    fn pool_reverse_lookup(&self, pool_id: PoolId) -> Result<String, StoreError> {
        self.pools
            .iter()
            .find(|p| p.id == pool_id)
            .map(|p| p.name.clone())
            .ok_or(StoreError::UnknownPoolId(pool_id))
    }

    fn open_pool(&self, pool: &str) -> Result<Box<dyn PoolContext + '_>, StoreError> {
        if !self.pools.iter().any(|p| p.name == pool) {
            return Err(StoreError::NoSuchPool(pool.to_string()));
        }
        Ok(Box::new(DumpPool {
            dir: self.root.join(pool),
            timeout: self.timeout,
        }))
    }
}

struct DumpPool {
    dir: PathBuf,
    timeout: Option<Duration>,
}

impl DumpPool {
    fn load_omap(&self, op: &str, object: &str) -> Result<Omap, StoreError> {
        let object_path = self.dir.join(object);
        let omap_file = omap_path(&self.dir, object);
        let name = object.to_string();
        bounded(self.timeout, format!("{} {}", op, object), move || {
            match fs::read(&omap_file) {
                Ok(raw) => serde_json::from_slice::<Omap>(&raw)
                    .map_err(|e| StoreError::Transport(format!("corrupt omap of {}: {}", name, e))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // An object without omap data has an empty omap
                    fs::metadata(&object_path).map_err(|e| io_error(&name, e))?;
                    Ok(Omap::new())
                }
                Err(e) => Err(io_error(&name, e)),
            }
        })
    }
}

impl PoolContext for DumpPool {
    fn stat(&self, object: &str) -> Result<ObjectStat, StoreError> {
        let path = self.dir.join(object);
        let name = object.to_string();
        bounded(self.timeout, format!("stat {}", object), move || {
            let meta = fs::metadata(&path).map_err(|e| io_error(&name, e))?;
            Ok(ObjectStat { size: meta.len() })
        })
    }

    fn read(&self, object: &str, offset: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        let path = self.dir.join(object);
        let name = object.to_string();
        bounded(self.timeout, format!("read {}", object), move || {
            let mut file = File::open(&path).map_err(|e| io_error(&name, e))?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = Vec::new();
            file.take(len).read_to_end(&mut buf)?;
            Ok(buf)
        })
    }

    fn omap_get(&self, object: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut omap = self.load_omap("omap_get", object)?;
        Ok(omap.remove(key))
    }

    fn omap_page(
        &self,
        object: &str,
        start_after: &str,
        max: usize,
    ) -> Result<OmapPage, StoreError> {
        let omap = self.load_omap("omap_list", object)?;
        let mut remaining = omap
            .into_iter()
            .filter(|(k, _)| start_after.is_empty() || k.as_str() > start_after);
        let entries: Vec<(String, Vec<u8>)> = remaining.by_ref().take(max).collect();
        let more = remaining.next().is_some();
        Ok(OmapPage { entries, more })
    }
}

fn omap_path(pool_dir: &Path, object: &str) -> PathBuf {
    pool_dir.join(OMAP_DIR).join(format!("{}.json", object))
}

fn io_error(object: &str, e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(object.to_string())
    } else {
        StoreError::Io(e)
    }
}

/// Run `op`, waiting at most `timeout` for it. A timed-out worker is left
/// to finish on its own; its result is discarded.
fn bounded<T, F>(timeout: Option<Duration>, op: String, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    let Some(timeout) = timeout else {
        return f();
    };

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("cephdig-bounded-op".to_string())
        .spawn(move || {
            let _ = tx.send(f());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(StoreError::TimedOut { op, timeout }),
        Err(RecvTimeoutError::Disconnected) => {
            Err(StoreError::Transport(format!("{}: worker exited without a result", op)))
        }
    }
}
