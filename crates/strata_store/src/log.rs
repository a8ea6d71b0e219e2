//! A durable, log-structured store for collection values.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::hash::Hash;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::StoreError;
use crate::store::{AppendableBackingStore, BackingStore};

/// Magic bytes prefixing every log record.
const RECORD_MAGIC: [u8; 4] = *b"SLOG";

/// Record header size: magic + payload length.
const RECORD_HEADER_SIZE: usize = 8;

/// One durable mutation.
///
/// `Append` holds only the new elements, never the full collection; that is
/// what keeps appends cheap. Merging happens in memory and at replay.
#[derive(Debug, Serialize, Deserialize)]
enum LogRecord<K, V> {
    Set(K, V),
    Remove(K),
    Append(K, V),
}

/// Why a record failed to parse.
enum RecordError {
    /// Fewer bytes remain than the record claims. At the end of the file
    /// this is a torn write from a crash, not corruption.
    Truncated,
    /// The bytes are structurally wrong.
    Invalid(String),
}

/// An [`AppendableBackingStore`] backed by an append-only record log.
///
/// Every mutation is written as one framed, checksummed record:
///
/// ```text
/// +-------+--------+---------+----------+
/// | Magic | Length | Payload | Checksum |
/// | 4B    | 4B LE  | bincode | 16B      |
/// +-------+--------+---------+----------+
/// ```
///
/// [`open`](Self::open) replays the log into memory, tolerating a torn
/// trailing record by truncating the file at the last valid one.
/// [`close`](BackingStore::close) compacts the log down to one `Set`
/// record per live key.
///
/// Values are collections of elements; [`append`](AppendableBackingStore::append)
/// logs only the appended elements, so appending to a large stored
/// collection costs I/O proportional to the new elements alone.
#[derive(Debug)]
pub struct LogStore<K, V> {
    /// Log file path.
    path: PathBuf,

    /// Write handle, positioned at the end of the last valid record.
    file: File,

    /// Replayed contents.
    entries: HashMap<K, V>,
}

/// Parses one record from the front of `raw`, returning it and the number
/// of bytes consumed.
fn parse_record<K, V>(raw: &[u8]) -> Result<(LogRecord<K, V>, usize), RecordError>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    if raw.len() < RECORD_HEADER_SIZE {
        return Err(RecordError::Truncated);
    }
    if raw[..4] != RECORD_MAGIC {
        return Err(RecordError::Invalid("bad record magic".to_string()));
    }
    let payload_len =
        u32::from_le_bytes(raw[4..8].try_into().expect("slice is 4 bytes")) as usize;
    let total = RECORD_HEADER_SIZE + payload_len + Checksum::SIZE;
    if raw.len() < total {
        return Err(RecordError::Truncated);
    }

    let payload = &raw[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + payload_len];
    let stored: [u8; 16] = raw[RECORD_HEADER_SIZE + payload_len..total]
        .try_into()
        .expect("slice is 16 bytes");
    if Checksum::of(payload) != Checksum::from_raw(stored) {
        return Err(RecordError::Invalid("record checksum mismatch".to_string()));
    }

    let record = bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| RecordError::Invalid(format!("undecodable record: {e}")))?
        .0;
    Ok((record, total))
}

/// Frames a record for writing: magic + length + payload + checksum.
fn encode_record<K, V>(record: &LogRecord<&K, &V>) -> Result<Vec<u8>, StoreError>
where
    K: Serialize,
    V: Serialize,
{
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard()).map_err(
        |e| StoreError::Serialization {
            reason: e.to_string(),
        },
    )?;
    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len() + Checksum::SIZE);
    buf.extend_from_slice(&RECORD_MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(Checksum::of(&payload).as_bytes());
    Ok(buf)
}

impl<K, E, V> LogStore<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned + Extend<E> + IntoIterator<Item = E>,
{
    /// Opens the store, replaying the log at `path` if one exists.
    ///
    /// A torn trailing record is discarded by truncating the file at the
    /// last valid record; any earlier validation failure is
    /// [`StoreError::Corrupt`].
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let io_err = |e: std::io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        };

        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_err(e)),
        };

        let mut entries: HashMap<K, V> = HashMap::new();
        let mut offset = 0;
        while offset < raw.len() {
            match parse_record::<K, V>(&raw[offset..]) {
                Ok((record, consumed)) => {
                    apply_record(&mut entries, record);
                    offset += consumed;
                }
                Err(RecordError::Truncated) => break,
                Err(RecordError::Invalid(reason)) => {
                    return Err(StoreError::Corrupt {
                        path: path.to_path_buf(),
                        reason,
                    })
                }
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(io_err)?;
        if offset < raw.len() {
            // Drop the torn tail so later appends start on a record boundary.
            file.set_len(offset as u64).map_err(io_err)?;
        }
        file.seek(SeekFrom::End(0)).map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
        })
    }

    /// Appends one framed record to the log file.
    fn write_record(&mut self, record: &LogRecord<&K, &V>) -> Result<(), StoreError> {
        let buf = encode_record(record)?;
        self.file.write_all(&buf).map_err(|e| StoreError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// Folds one replayed record into the in-memory map.
fn apply_record<K, E, V>(entries: &mut HashMap<K, V>, record: LogRecord<K, V>)
where
    K: Eq + Hash,
    V: Extend<E> + IntoIterator<Item = E>,
{
    match record {
        LogRecord::Set(key, value) => {
            entries.insert(key, value);
        }
        LogRecord::Remove(key) => {
            entries.remove(&key);
        }
        LogRecord::Append(key, elements) => match entries.entry(key) {
            Entry::Occupied(mut occupied) => occupied.get_mut().extend(elements),
            Entry::Vacant(vacant) => {
                vacant.insert(elements);
            }
        },
    }
}

impl<K, E, V> BackingStore<K, V> for LogStore<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned + Extend<E> + IntoIterator<Item = E>,
{
    fn contains(&self, key: &K) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(key))
    }

    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: K, value: V) -> Result<(), StoreError> {
        self.write_record(&LogRecord::Set(&key, &value))?;
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &K) -> Result<(), StoreError> {
        if !self.entries.contains_key(key) {
            return Ok(());
        }
        self.write_record(&LogRecord::Remove(key))?;
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<HashSet<K>, StoreError> {
        Ok(self.entries.keys().cloned().collect())
    }

    /// Compacts the log to one `Set` record per live key.
    fn close(self) -> Result<(), StoreError> {
        let Self {
            path,
            file,
            entries,
        } = self;

        let tmp = path.with_extension("compact");
        let mut buf = Vec::new();
        for (key, value) in &entries {
            buf.extend_from_slice(&encode_record(&LogRecord::Set(key, value))?);
        }
        std::fs::write(&tmp, &buf).map_err(|e| StoreError::Io {
            path: tmp.clone(),
            source: e,
        })?;

        drop(file);
        std::fs::rename(&tmp, &path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e,
        })
    }
}

impl<K, E, V> AppendableBackingStore<K, V> for LogStore<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned + Extend<E> + IntoIterator<Item = E>,
{
    fn append(&mut self, key: K, elements: V) -> Result<(), StoreError> {
        self.write_record(&LogRecord::Append(&key, &elements))?;
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => occupied.get_mut().extend(elements),
            Entry::Vacant(vacant) => {
                vacant.insert(elements);
            }
        }
        Ok(())
    }
}
