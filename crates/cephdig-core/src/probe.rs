//! Reachability probe for directory metadata

use std::time::Duration;

use crate::store::{with_pool, Cluster, PoolRef, SessionOptions};
use crate::InodeId;

/// Stat the metadata object of `id` through a fresh session bounded by
/// `timeout`. Any failure, whatever its cause, counts as unreachable.
pub fn is_unreachable(
    cluster: &dyn Cluster,
    metadata_pool: &str,
    id: InodeId,
    timeout: Duration,
) -> bool {
    let object = id.metadata_object();
    let options = SessionOptions::bounded(timeout);

    match with_pool(cluster, &options, PoolRef::Name(metadata_pool), |ioctx| {
        ioctx.stat(&object)
    }) {
        Ok(_) => false,
        Err(e) => {
            tracing::debug!("Probe of {} failed: {}", object, e);
            true
        }
    }
}
