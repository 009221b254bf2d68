//! File reassembly from data segments
//!
//! A file of `size` bytes is stored as objects `<ino>.00000000`,
//! `<ino>.00000001`, ... of `SEGMENT_SIZE` bytes each, the last one
//! holding the remainder. Objects may be sparse (trailing zeros are not
//! stored) or missing entirely; both are filled with zeros so the output
//! always has exactly `size` bytes with every segment at its offset.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;

use crate::error::Result;
use crate::store::{with_pool, Cluster, PoolRef, SessionOptions, StoreError};
use crate::{InodeId, PoolId, SEGMENT_SIZE};

/// How much of a reassembled file came from the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassemblyStats {
    pub bytes_written: u64,
    /// Bytes synthesized for sparse or missing segments
    pub zero_filled_bytes: u64,
    pub missing_segments: u64,
    pub sparse_segments: u64,
    /// SHA-256 of the bytes written, hex encoded
    pub sha256: String,
}

impl ReassemblyStats {
    pub fn is_complete(&self) -> bool {
        self.missing_segments == 0 && self.zero_filled_bytes == 0
    }
}

/// Write the `size` bytes of file `id` from pool `pool_id` to `sink`.
///
/// Every segment read uses its own session, and the pool name is looked
/// up from `pool_id` each time.
pub fn reassemble(
    cluster: &dyn Cluster,
    id: InodeId,
    pool_id: PoolId,
    size: u64,
    sink: &mut dyn Write,
) -> Result<ReassemblyStats> {
    let segment_count = size / SEGMENT_SIZE;
    let mut remaining = size;
    let mut stats = ReassemblyStats::default();
    let mut hasher = Sha256::new();

    for segment in 0..=segment_count {
        // Sizes that are an exact multiple of the segment size end here
        // instead of reading an empty trailing segment
        if remaining == 0 {
            break;
        }
        let expected = remaining.min(SEGMENT_SIZE);
        let object = id.data_object(segment);

        let mut contents = match read_segment(cluster, pool_id, &object, expected)? {
            Some(contents) => contents,
            None => {
                tracing::warn!(
                    "Object {} not found, filling {} bytes with zeros",
                    object,
                    expected
                );
                stats.missing_segments += 1;
                Vec::new()
            }
        };

        let stored = contents.len() as u64;
        if stored < expected {
            if stored > 0 {
                tracing::debug!("Object {} is sparse: {} of {} bytes", object, stored, expected);
                stats.sparse_segments += 1;
            }
            contents.resize(expected as usize, 0);
            stats.zero_filled_bytes += expected - stored;
        }

        sink.write_all(&contents)?;
        hasher.update(&contents);
        stats.bytes_written += expected;
        remaining -= expected;
    }

    stats.sha256 = format!("{:x}", hasher.finalize());
    Ok(stats)
}

/// Stat then read up to `expected` bytes of one segment. `None` when the
/// object does not exist.
fn read_segment(
    cluster: &dyn Cluster,
    pool_id: PoolId,
    object: &str,
    expected: u64,
) -> Result<Option<Vec<u8>>, StoreError> {
    with_pool(
        cluster,
        &SessionOptions::default(),
        PoolRef::Id(pool_id),
        |ioctx| {
            let stored_size = match ioctx.stat(object) {
                Ok(stat) => stat.size,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            };

            let to_read = stored_size.min(expected);
            if to_read == 0 {
                return Ok(Some(Vec::new()));
            }

            match ioctx.read(object, 0, to_read) {
                Ok(mut data) => {
                    data.truncate(expected as usize);
                    Ok(Some(data))
                }
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCluster;
    use crate::SalvageError;

    const FILE: InodeId = InodeId::new(0x10000000000);

    fn cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster.create_pool(2, "data");
        cluster
    }

    /// Store `size` bytes of a recognizable pattern as full segments
    fn store_file(cluster: &MemoryCluster, size: u64) -> Vec<u8> {
        let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8 + 1).collect();
        for (index, chunk) in content.chunks(SEGMENT_SIZE as usize).enumerate() {
            cluster.put_object("data", &FILE.data_object(index as u64), chunk.to_vec());
        }
        content
    }

    #[test]
    fn test_output_length_matches_declared_size() {
        for size in [
            0,
            1,
            SEGMENT_SIZE - 1,
            SEGMENT_SIZE,
            SEGMENT_SIZE + 1,
            3 * SEGMENT_SIZE,
        ] {
            let cluster = cluster();
            let content = store_file(&cluster, size);

            let mut out = Vec::new();
            let stats = reassemble(&cluster, FILE, 2, size, &mut out).unwrap();

            assert_eq!(out.len() as u64, size, "size {}", size);
            assert_eq!(out, content);
            assert_eq!(stats.bytes_written, size);
            assert!(stats.is_complete());
            assert_eq!(cluster.open_sessions(), 0);
        }
    }

    #[test]
    fn test_exact_multiple_does_not_read_extra_segment() {
        let cluster = cluster();
        store_file(&cluster, 2 * SEGMENT_SIZE);
        // an object past the end must not be touched
        cluster.put_object("data", &FILE.data_object(2), vec![0xff; 10]);

        let mut out = Vec::new();
        reassemble(&cluster, FILE, 2, 2 * SEGMENT_SIZE, &mut out).unwrap();
        assert_eq!(out.len() as u64, 2 * SEGMENT_SIZE);
        assert_eq!(cluster.sessions_opened(), 2);
    }

    #[test]
    fn test_zero_size_reads_nothing() {
        let cluster = cluster();
        let mut out = Vec::new();
        let stats = reassemble(&cluster, FILE, 2, 0, &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(cluster.call_count(), 0);
        // SHA-256 of the empty string
        assert_eq!(
            stats.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sparse_segment_is_zero_padded_in_place() {
        let cluster = cluster();
        let size = SEGMENT_SIZE + 100;
        cluster.put_sparse_object("data", &FILE.data_object(0), vec![7; 1000], SEGMENT_SIZE);
        cluster.put_object("data", &FILE.data_object(1), vec![9; 100]);

        let mut out = Vec::new();
        let stats = reassemble(&cluster, FILE, 2, size, &mut out).unwrap();

        assert_eq!(out.len() as u64, size);
        assert!(out[..1000].iter().all(|&b| b == 7));
        assert!(out[1000..SEGMENT_SIZE as usize].iter().all(|&b| b == 0));
        assert!(out[SEGMENT_SIZE as usize..].iter().all(|&b| b == 9));
        assert_eq!(stats.sparse_segments, 1);
        assert_eq!(stats.zero_filled_bytes, SEGMENT_SIZE - 1000);
    }

    #[test]
    fn test_missing_segment_is_zero_filled() {
        let cluster = cluster();
        let size = 3 * SEGMENT_SIZE;
        store_file(&cluster, size);
        cluster.remove_object("data", &FILE.data_object(1));

        let mut out = Vec::new();
        let stats = reassemble(&cluster, FILE, 2, size, &mut out).unwrap();

        assert_eq!(out.len() as u64, size);
        let middle = &out[SEGMENT_SIZE as usize..2 * SEGMENT_SIZE as usize];
        assert!(middle.iter().all(|&b| b == 0));
        assert_ne!(out[0], 0);
        assert_ne!(out[2 * SEGMENT_SIZE as usize], 0);
        assert_eq!(stats.missing_segments, 1);
        assert_eq!(stats.zero_filled_bytes, SEGMENT_SIZE);
    }

    #[test]
    fn test_oversized_object_is_truncated() {
        let cluster = cluster();
        cluster.put_object("data", &FILE.data_object(0), vec![3; 500]);

        let mut out = Vec::new();
        reassemble(&cluster, FILE, 2, 200, &mut out).unwrap();
        assert_eq!(out, vec![3; 200]);
    }

    #[test]
    fn test_unknown_pool_is_a_store_error() {
        let cluster = cluster();
        let mut out = Vec::new();
        let err = reassemble(&cluster, FILE, 7, 10, &mut out).unwrap_err();
        assert!(matches!(err, SalvageError::Store(StoreError::UnknownPoolId(7))));
    }
}
