//! Error types for storage operations.

use std::path::PathBuf;

/// Errors that can occur while talking to a durable store.
///
/// Absence of a key is never an error: lookups report it as `Ok(None)` or
/// `Ok(false)`. Errors are reserved for persistence failures and for files
/// that fail validation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O error occurred while reading or writing store files.
    ///
    /// Layers above a store (such as a write-back overlay) propagate this
    /// unmodified; no retry is applied anywhere in the stack.
    #[error("store I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A store file failed validation.
    ///
    /// Bad magic bytes, an unsupported format version, a truncated record,
    /// or a checksum mismatch. A durable store must not silently drop data,
    /// so this is a hard error rather than an empty-store fallback.
    #[error("corrupt store file {path}: {reason}")]
    Corrupt {
        /// The offending file path.
        path: PathBuf,
        /// Description of the validation failure.
        reason: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = StoreError::Io {
            path: PathBuf::from("/tmp/strata/data.log"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("store I/O error"));
        assert!(msg.contains("data.log"));
    }

    #[test]
    fn corrupt_display() {
        let err = StoreError::Corrupt {
            path: PathBuf::from("bad.snap"),
            reason: "checksum mismatch".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("corrupt store file"));
        assert!(msg.contains("checksum mismatch"));
    }

    #[test]
    fn serialization_display() {
        let err = StoreError::Serialization {
            reason: "invalid bincode data".to_string(),
        };
        assert!(err.to_string().contains("invalid bincode data"));
    }
}
