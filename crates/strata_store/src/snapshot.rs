//! A durable store persisted as a single validated snapshot file.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::StoreError;
use crate::store::BackingStore;

/// Magic bytes identifying a Strata snapshot file.
const SNAPSHOT_MAGIC: [u8; 4] = *b"STRA";

/// Current snapshot format version. Increment on breaking changes to
/// the header or payload format.
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every snapshot for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotHeader {
    /// Magic bytes: must be `b"STRA"`.
    magic: [u8; 4],

    /// Snapshot format version.
    format_version: u32,

    /// Checksum of the payload that follows the header.
    checksum: Checksum,
}

/// A [`BackingStore`] persisted as one snapshot file.
///
/// The whole map is loaded at [`open`](Self::open) and rewritten at
/// [`close`](BackingStore::close); mutations in between live only in
/// memory. Suited to maps that are small relative to the cost of the work
/// they memoize, such as per-file metadata of an incremental build.
///
/// Unlike a derived-artifact cache, a store is authoritative for its data,
/// so validation failures at open are reported as
/// [`StoreError::Corrupt`] instead of being masked as an empty store.
#[derive(Debug)]
pub struct SnapshotStore<K, V> {
    /// Snapshot file path.
    path: PathBuf,

    /// Current contents, loaded at open and flushed at close.
    entries: HashMap<K, V>,
}

impl<K, V> SnapshotStore<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Opens the store, loading the snapshot at `path` if one exists.
    ///
    /// A missing file yields an empty store; a file that fails validation
    /// (magic, version, checksum, decode) is a [`StoreError::Corrupt`].
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    path: path.to_path_buf(),
                    entries: HashMap::new(),
                })
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let corrupt = |reason: &str| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        // Layout: 4-byte header length (little-endian) + header + payload
        if raw.len() < 4 {
            return Err(corrupt("file too short for header length"));
        }
        let header_len =
            u32::from_le_bytes(raw[..4].try_into().expect("slice is 4 bytes")) as usize;
        if raw.len() < 4 + header_len {
            return Err(corrupt("truncated header"));
        }

        let header: SnapshotHeader =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .map_err(|e| corrupt(&format!("undecodable header: {e}")))?
                .0;

        if header.magic != SNAPSHOT_MAGIC {
            return Err(corrupt("bad magic bytes"));
        }
        if header.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(corrupt(&format!(
                "unsupported format version {}",
                header.format_version
            )));
        }

        let payload = &raw[4 + header_len..];
        if Checksum::of(payload) != header.checksum {
            return Err(corrupt("payload checksum mismatch"));
        }

        let pairs: Vec<(K, V)> =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| corrupt(&format!("undecodable payload: {e}")))?
                .0;

        Ok(Self {
            path: path.to_path_buf(),
            entries: pairs.into_iter().collect(),
        })
    }

    /// Writes the current contents back to the snapshot file.
    fn save(&self) -> Result<(), StoreError> {
        let pairs: Vec<(&K, &V)> = self.entries.iter().collect();
        let payload = bincode::serde::encode_to_vec(&pairs, bincode::config::standard())
            .map_err(|e| StoreError::Serialization {
                reason: e.to_string(),
            })?;

        let header = SnapshotHeader {
            magic: SNAPSHOT_MAGIC,
            format_version: SNAPSHOT_FORMAT_VERSION,
            checksum: Checksum::of(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| StoreError::Serialization {
                reason: e.to_string(),
            })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(&self.path, &output).map_err(|e| StoreError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl<K, V> BackingStore<K, V> for SnapshotStore<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    fn contains(&self, key: &K) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(key))
    }

    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: K, value: V) -> Result<(), StoreError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &K) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<HashSet<K>, StoreError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn close(self) -> Result<(), StoreError> {
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: SnapshotStore<String, u32> =
            SnapshotStore::open(&dir.path().join("data.snap")).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn close_then_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.snap");

        let mut store: SnapshotStore<String, u32> = SnapshotStore::open(&path).unwrap();
        store.set("a".to_string(), 1).unwrap();
        store.set("b".to_string(), 2).unwrap();
        store.remove(&"a".to_string()).unwrap();
        store.close().unwrap();

        let store: SnapshotStore<String, u32> = SnapshotStore::open(&path).unwrap();
        assert_eq!(store.get(&"a".to_string()).unwrap(), None);
        assert_eq!(store.get(&"b".to_string()).unwrap(), Some(2));
        assert_eq!(store.keys().unwrap().len(), 1);
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.snap");
        std::fs::write(&path, b"not a snapshot").unwrap();

        let err = SnapshotStore::<String, u32>::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.snap");
        std::fs::write(&path, b"AB").unwrap();

        let err = SnapshotStore::<String, u32>::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn tampered_payload_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.snap");

        let mut store: SnapshotStore<String, u32> = SnapshotStore::open(&path).unwrap();
        store.set("a".to_string(), 1).unwrap();
        store.close().unwrap();

        // Flip the last payload byte
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, &raw).unwrap();

        let err = SnapshotStore::<String, u32>::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref reason, .. } if reason.contains("checksum")));
    }

    #[test]
    fn empty_store_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.snap");

        let store: SnapshotStore<String, u32> = SnapshotStore::open(&path).unwrap();
        store.close().unwrap();

        let store: SnapshotStore<String, u32> = SnapshotStore::open(&path).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }
}
