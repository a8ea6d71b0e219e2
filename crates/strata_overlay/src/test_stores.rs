//! Instrumented in-memory stores for cache tests.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use strata_store::{AppendableBackingStore, BackingStore, StoreError};

#[derive(Debug)]
struct StubInner<K, V> {
    map: HashMap<K, V>,
    fail_reads: bool,
    fail_gets: bool,
    write_quota: usize,
    get_calls: usize,
    set_calls: usize,
    append_calls: usize,
    closed: bool,
}

/// A shared, instrumented in-memory store.
///
/// Clone-style handles (via [`handle`](Self::handle)) let a test keep
/// inspecting the map after the cache has taken ownership of the store.
/// Reads can be made to fail outright and writes can be limited to a
/// quota, which is how partial-flush behavior gets exercised.
#[derive(Debug)]
pub(crate) struct StubStore<K, V> {
    inner: Arc<Mutex<StubInner<K, V>>>,
}

fn injected(op: &str) -> StoreError {
    StoreError::Io {
        path: PathBuf::from("stub"),
        source: std::io::Error::new(std::io::ErrorKind::Other, format!("injected {op} failure")),
    }
}

impl<K, V> StubStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn from_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StubInner {
                map: entries.into_iter().collect(),
                fail_reads: false,
                fail_gets: false,
                write_quota: usize::MAX,
                get_calls: 0,
                set_calls: 0,
                append_calls: 0,
                closed: false,
            })),
        }
    }

    /// Another handle onto the same underlying map.
    pub(crate) fn handle(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Snapshot of the current contents.
    pub(crate) fn map(&self) -> HashMap<K, V> {
        self.inner.lock().unwrap().map.clone()
    }

    /// Makes every subsequent read (`get`, `contains`, `keys`) fail.
    pub(crate) fn fail_reads(&self, fail: bool) {
        self.inner.lock().unwrap().fail_reads = fail;
    }

    /// Makes every subsequent `get` fail while key-existence checks keep
    /// working. Proves a code path never reads a full stored value.
    pub(crate) fn fail_gets(&self, fail: bool) {
        self.inner.lock().unwrap().fail_gets = fail;
    }

    /// Allows only `quota` further successful writes; the next one errors.
    pub(crate) fn set_write_quota(&self, quota: usize) {
        self.inner.lock().unwrap().write_quota = quota;
    }

    /// Number of `get` calls attempted so far.
    pub(crate) fn get_calls(&self) -> usize {
        self.inner.lock().unwrap().get_calls
    }

    /// Number of `set` calls attempted so far, including failed ones.
    pub(crate) fn set_calls(&self) -> usize {
        self.inner.lock().unwrap().set_calls
    }

    /// Number of `append` calls attempted so far.
    pub(crate) fn append_calls(&self) -> usize {
        self.inner.lock().unwrap().append_calls
    }

    /// `true` once `close` has run.
    pub(crate) fn closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl<K, V> StubInner<K, V> {
    fn take_write_permit(&mut self) -> Result<(), StoreError> {
        if self.write_quota == 0 {
            return Err(injected("write"));
        }
        self.write_quota = self.write_quota.saturating_sub(1);
        Ok(())
    }
}

impl<K, V> BackingStore<K, V> for StubStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn contains(&self, key: &K) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_reads {
            return Err(injected("contains"));
        }
        Ok(inner.map.contains_key(key))
    }

    fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.get_calls += 1;
        if inner.fail_reads || inner.fail_gets {
            return Err(injected("get"));
        }
        Ok(inner.map.get(key).cloned())
    }

    fn set(&mut self, key: K, value: V) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.set_calls += 1;
        inner.take_write_permit()?;
        inner.map.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &K) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_write_permit()?;
        inner.map.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<HashSet<K>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_reads {
            return Err(injected("keys"));
        }
        Ok(inner.map.keys().cloned().collect())
    }

    fn close(self) -> Result<(), StoreError> {
        self.inner.lock().unwrap().closed = true;
        Ok(())
    }
}

impl<K, E, V> AppendableBackingStore<K, V> for StubStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Extend<E> + IntoIterator<Item = E>,
{
    fn append(&mut self, key: K, elements: V) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.append_calls += 1;
        inner.take_write_permit()?;
        match inner.map.entry(key) {
            Entry::Occupied(mut occupied) => occupied.get_mut().extend(elements),
            Entry::Vacant(vacant) => {
                vacant.insert(elements);
            }
        }
        Ok(())
    }
}
