//! Payload checksums for durable store files.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit XXH3 checksum guarding a serialized payload.
///
/// Stored in snapshot headers and after every log record so that corruption
/// is detected at open time instead of surfacing as garbage values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum([u8; 16]);

impl Checksum {
    /// Size of a checksum in bytes.
    pub const SIZE: usize = 16;

    /// Computes the checksum of a byte slice using XXH3-128.
    pub fn of(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Reconstructs a checksum from its stored byte representation.
    pub fn from_raw(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the stored byte representation.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}
