//! Directory-entry record codec
//!
//! A directory's entries live as omap key/value pairs on its metadata
//! object. The key is the child name plus a snapshot suffix (`_head` for
//! the live entry). The value is an encoded inode that we only partially
//! understand, so we read the handful of fields we need from fixed
//! offsets and ignore the rest:
//!
//! ```text
//!  0..8    first snapid
//!  8       dentry type byte ('I' for a primary link)
//!  9..15   inode encoding header (version, compat, length)
//! 15..23   inode number, two little-endian u32 words
//! 84..88   data pool id of the file layout (0 = directory)
//! 88..96   file size, two little-endian u32 words
//! ```

use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Result, SalvageError};
use crate::{InodeId, PoolId, HEAD_SUFFIX};

/// Low word of the inode number
pub const CHILD_ID_LOW_OFFSET: usize = 15;
/// High word of the inode number
pub const CHILD_ID_HIGH_OFFSET: usize = CHILD_ID_LOW_OFFSET + 4;
/// Directories carry no data layout, so their pool id reads as zero
pub const POOL_ID_OFFSET: usize = 84;
/// Size follows the pool id directly
pub const SIZE_LOW_OFFSET: usize = 88;
pub const SIZE_HIGH_OFFSET: usize = SIZE_LOW_OFFSET + 4;
/// End of the last field we read
pub const RECORD_MIN_LEN: usize = 96;

/// One decoded directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Display name with the snapshot suffix removed
    pub name: String,
    /// Inode the entry points to
    pub child_id: InodeId,
    /// Data pool of a file, 0 for a directory
    pub pool_id: PoolId,
    /// Byte length of a file; meaningless for directories
    pub size: u64,
}

impl DirectoryEntry {
    /// Decode an omap key/value pair
    pub fn decode(key: &str, blob: &[u8]) -> Result<Self> {
        if blob.len() < RECORD_MIN_LEN {
            return Err(SalvageError::MalformedRecord {
                key: key.to_string(),
                len: blob.len(),
                needed: RECORD_MIN_LEN,
            });
        }

        let malformed = |_: io::Error| SalvageError::MalformedRecord {
            key: key.to_string(),
            len: blob.len(),
            needed: RECORD_MIN_LEN,
        };
        let (child_id, pool_id, size) = read_fields(blob).map_err(malformed)?;

        Ok(Self {
            name: head_name(key).unwrap_or(key).to_string(),
            child_id: InodeId::new(child_id),
            pool_id,
            size,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.pool_id == 0
    }
}

fn read_fields(blob: &[u8]) -> io::Result<(u64, PoolId, u64)> {
    let mut cursor = Cursor::new(blob);
    let child_id = read_split_u64(&mut cursor, CHILD_ID_LOW_OFFSET)?;

    cursor.set_position(POOL_ID_OFFSET as u64);
    let pool_id = cursor.read_u32::<LittleEndian>()?;

    let size = read_split_u64(&mut cursor, SIZE_LOW_OFFSET)?;
    Ok((child_id, pool_id, size))
}

/// Two little-endian u32 words combined as `low | high << 32`
fn read_split_u64(cursor: &mut Cursor<&[u8]>, offset: usize) -> io::Result<u64> {
    cursor.set_position(offset as u64);
    let low = cursor.read_u32::<LittleEndian>()? as u64;
    let high = cursor.read_u32::<LittleEndian>()? as u64;
    Ok(low | (high << 32))
}

/// Display name of a live (head) entry key, `None` for snapshot entries
pub fn head_name(key: &str) -> Option<&str> {
    key.strip_suffix(HEAD_SUFFIX)
}

/// Omap key under which `name` is stored in its parent
pub fn head_key(name: &str) -> String {
    format!("{}{}", name, HEAD_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::synthesize_record;

    #[test]
    fn test_decode_file_entry() {
        let blob = synthesize_record(InodeId::new(0x1000_0000_0a2b), 2, 5_000_000);
        let entry = DirectoryEntry::decode("bar.txt_head", &blob).unwrap();

        assert_eq!(entry.name, "bar.txt");
        assert_eq!(entry.child_id, InodeId::new(0x1000_0000_0a2b));
        assert_eq!(entry.pool_id, 2);
        assert_eq!(entry.size, 5_000_000);
        assert!(!entry.is_directory());
    }

    #[test]
    fn test_decode_directory_entry() {
        let blob = synthesize_record(InodeId::new(0x10), 0, 0);
        let entry = DirectoryEntry::decode("foo_head", &blob).unwrap();
        assert!(entry.is_directory());
        assert_eq!(entry.child_id.to_string(), "10");
    }

    #[test]
    fn test_decode_high_words() {
        let mut blob = vec![0u8; 120];
        blob[15..23].copy_from_slice(&[0x78, 0x56, 0x34, 0x12, 0x01, 0x00, 0x00, 0x00]);
        blob[84..88].copy_from_slice(&[0x05, 0x00, 0x00, 0x00]);
        blob[88..96].copy_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);

        let entry = DirectoryEntry::decode("x_head", &blob).unwrap();
        assert_eq!(entry.child_id.as_u64(), 0x1_1234_5678);
        assert_eq!(entry.pool_id, 5);
        assert_eq!(entry.size, 2 << 32);
    }

    #[test]
    fn test_decode_short_blob_is_malformed() {
        let blob = vec![0u8; RECORD_MIN_LEN - 1];
        match DirectoryEntry::decode("short_head", &blob) {
            Err(SalvageError::MalformedRecord { key, len, needed }) => {
                assert_eq!(key, "short_head");
                assert_eq!(len, 95);
                assert_eq!(needed, 96);
            }
            other => panic!("expected MalformedRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_is_pure() {
        let blob = synthesize_record(InodeId::new(0xdead_beef), 7, 12345);
        let a = DirectoryEntry::decode("f_head", &blob).unwrap();
        let b = DirectoryEntry::decode("f_head", &blob).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_head_name() {
        assert_eq!(head_name("foo_head"), Some("foo"));
        assert_eq!(head_name("foo_2a"), None);
        assert_eq!(head_key("foo"), "foo_head");
    }
}
