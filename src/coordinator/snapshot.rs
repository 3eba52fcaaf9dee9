//! Coordinator snapshots
//!
//! The full coordinator state is written after every mutating call and read
//! back only at startup. File format:
//!
//! ```text
//! [MAGIC "DSMSNAP1"][VERSION u32][CRC32 u32][LEN u64][bincode(PersistedSnapshot)]
//! ```
//!
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! target, so a crash mid-write leaves the previous snapshot intact.

use crate::common::{Error, ObjectId, Result};
use crate::coordinator::record::ObjectRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_MAGIC: &[u8; 8] = b"DSMSNAP1";
const SNAPSHOT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 8;

/// Everything needed to rebuild the coordinator's record table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub next_id: ObjectId,
    pub names: BTreeMap<String, ObjectId>,
    pub records: BTreeMap<ObjectId, ObjectRecord>,
}

impl PersistedSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(SNAPSHOT_MAGIC);
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Corrupted("snapshot too short".into()));
        }
        if &data[0..8] != SNAPSHOT_MAGIC {
            return Err(Error::Corrupted("Invalid snapshot magic".into()));
        }

        let version = u32::from_le_bytes(read_array(&data[8..12]));
        if version != SNAPSHOT_VERSION {
            return Err(Error::Corrupted(format!(
                "unsupported snapshot version {}",
                version
            )));
        }

        let expected_crc = u32::from_le_bytes(read_array(&data[12..16]));
        let len = u64::from_le_bytes(read_array(&data[16..24])) as usize;
        let body = &data[HEADER_LEN..];
        if body.len() != len {
            return Err(Error::Corrupted(format!(
                "snapshot length mismatch: header says {}, found {}",
                len,
                body.len()
            )));
        }

        let actual_crc = crc32fast::hash(body);
        if actual_crc != expected_crc {
            return Err(Error::Corrupted(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                expected_crc, actual_crc
            )));
        }

        Ok(bincode::deserialize(body)?)
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// On-disk home of the coordinator snapshot
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomically replace the snapshot file.
    pub fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&snapshot.encode()?)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Read the snapshot back. `None` when no snapshot was ever written.
    pub fn load(&self) -> Result<Option<PersistedSnapshot>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        BufReader::new(file).read_to_end(&mut data)?;
        PersistedSnapshot::decode(&data).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ServerId;
    use tempfile::tempdir;

    fn sample() -> PersistedSnapshot {
        let mut record = ObjectRecord::new(1, "hello".into(), ServerId::new("s1"));
        record.writer = Some(ServerId::new("s1"));
        record.next_grant(&ServerId::new("s1"));
        PersistedSnapshot {
            next_id: 4,
            names: BTreeMap::from([("chat".to_string(), 1)]),
            records: BTreeMap::from([(1, record)]),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested").join("status.snap"));
        assert!(store.load().unwrap().is_none());

        store.save(&sample()).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), Some(sample()));

        // overwrite keeps only the latest state
        let mut next = sample();
        next.next_id = 9;
        store.save(&next).unwrap();
        assert_eq!(store.load().unwrap().unwrap().next_id, 9);
    }

    #[test]
    fn test_detects_corruption() {
        let mut bytes = sample().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            PersistedSnapshot::decode(&bytes),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        let bytes = sample().encode().unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(PersistedSnapshot::decode(&bad_magic).is_err());

        assert!(PersistedSnapshot::decode(&bytes[..bytes.len() - 3]).is_err());
        assert!(PersistedSnapshot::decode(&bytes[..10]).is_err());
    }
}
