//! Write-back overlay caches for durable key-value stores.
//!
//! A [`WriteBackCache`] fronts a [`BackingStore`](strata_store::BackingStore)
//! and buffers every mutation in memory until an explicit
//! [`apply_changes`](WriteBackCache::apply_changes) commits the batch or
//! [`clear_changes`](WriteBackCache::clear_changes) rolls it back. Reads see
//! the buffered state layered over the store. The
//! [`AppendableWriteBackCache`] specialization adds deferred appends for
//! collection values, so repeatedly extending a large stored collection
//! never forces the full value into memory.

#![warn(missing_docs)]

pub mod appendable;
pub mod bucket;
pub mod cache;

#[cfg(test)]
mod test_stores;

pub use appendable::AppendableWriteBackCache;
pub use bucket::Bucket;
pub use cache::WriteBackCache;
