//! In-memory multi-version store.
//!
//! Each committed write is stamped with a store-wide version. A transaction
//! reads at the version current when it opened, buffers its writes, and at
//! commit checks every key it touched (and every prefix it scanned) for a
//! newer committed version. Commits are serialized under the write lock, so
//! the conflict check and the version bump are atomic.

use crate::error::{KvError, Result};
use crate::{KvIter, KvStore, Transaction};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

#[derive(Clone, Debug)]
struct Versioned {
    version: u64,
    value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    version: u64,
    values: BTreeMap<Vec<u8>, Vec<Versioned>>,
    /// Read versions of open transactions, with their open count.
    active: BTreeMap<u64, usize>,
}

impl Inner {
    fn visible(&self, key: &[u8], at: u64) -> Option<&Vec<u8>> {
        self.values
            .get(key)?
            .iter()
            .rev()
            .find(|v| v.version <= at)?
            .value
            .as_ref()
    }

    fn latest_version(&self, key: &[u8]) -> Option<u64> {
        self.values.get(key)?.last().map(|v| v.version)
    }

    fn prefix_changed_since(&self, prefix: &[u8], at: u64) -> bool {
        self.values
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .any(|(_, versions)| versions.last().is_some_and(|v| v.version > at))
    }

    fn release(&mut self, version: u64) {
        if let Some(count) = self.active.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                self.active.remove(&version);
            }
        }
    }

    /// Oldest version an open transaction other than `own` may still read.
    fn horizon_excluding(&self, own: u64) -> u64 {
        self.active
            .iter()
            .find(|(version, count)| !(**version == own && **count == 1))
            .map(|(version, _)| *version)
            .unwrap_or(self.version)
    }

    /// Drop versions no open transaction can still observe.
    fn prune(&mut self, key: &[u8], horizon: u64) {
        if let Some(versions) = self.values.get_mut(key) {
            let keep_from = versions
                .iter()
                .rposition(|v| v.version <= horizon)
                .unwrap_or(0);
            versions.drain(..keep_from);
            if versions.len() == 1 && versions[0].value.is_none() && versions[0].version <= horizon {
                self.values.remove(key);
            }
        }
    }
}

/// Shared handle to an in-memory store. Cloning shares the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest committed version.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Number of live keys at the latest version.
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner
            .values
            .values()
            .filter(|versions| versions.last().is_some_and(|v| v.value.is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    type Txn = MemoryTxn;

    fn new_txn(&self, read_only: bool) -> Result<MemoryTxn> {
        let read_version = {
            let mut inner = self.inner.write();
            let version = inner.version;
            *inner.active.entry(version).or_insert(0) += 1;
            version
        };
        Ok(MemoryTxn {
            inner: Arc::clone(&self.inner),
            read_version,
            read_only,
            pending: BTreeMap::new(),
            reads: BTreeSet::new(),
            scans: Vec::new(),
        })
    }
}

/// Transaction over a [`MemoryStore`].
pub struct MemoryTxn {
    inner: Arc<RwLock<Inner>>,
    read_version: u64,
    read_only: bool,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    reads: BTreeSet<Vec<u8>>,
    scans: Vec<Vec<u8>>,
}

impl MemoryTxn {
    pub fn read_version(&self) -> u64 {
        self.read_version
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(KvError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn has_conflict(&self, inner: &Inner) -> bool {
        let touched = self.reads.iter().chain(self.pending.keys());
        for key in touched {
            if inner.latest_version(key).is_some_and(|v| v > self.read_version) {
                return true;
            }
        }
        self.scans
            .iter()
            .any(|prefix| inner.prefix_changed_since(prefix, self.read_version))
    }
}

impl Transaction for MemoryTxn {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        if !self.read_only {
            self.reads.insert(key.to_vec());
        }
        Ok(self.inner.read().visible(key, self.read_version).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn iterate(&mut self, prefix: &[u8]) -> Result<KvIter> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = {
            let inner = self.inner.read();
            inner
                .values
                .range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .filter_map(|(k, _)| inner.visible(k, self.read_version).map(|v| (k.clone(), v.clone())))
                .collect()
        };

        for (key, value) in self
            .pending
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        if !self.read_only {
            self.scans.push(prefix.to_vec());
        }
        Ok(merged.into_iter().collect::<Vec<_>>().into_iter())
    }

    fn commit(self) -> Result<()> {
        if self.read_only || self.pending.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write();
        if self.has_conflict(&inner) {
            trace!(read_version = self.read_version, "memory txn conflict");
            return Err(KvError::Conflict);
        }

        inner.version += 1;
        let version = inner.version;
        for (key, value) in &self.pending {
            inner
                .values
                .entry(key.clone())
                .or_default()
                .push(Versioned {
                    version,
                    value: value.clone(),
                });
        }
        let horizon = inner.horizon_excluding(self.read_version);
        for key in self.pending.keys() {
            inner.prune(key, horizon);
        }
        trace!(version, writes = self.pending.len(), "memory txn committed");
        Ok(())
    }

    fn discard(self) {}
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        self.inner.write().release(self.read_version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_isolation() {
        let store = MemoryStore::new();
        let mut seed = store.new_txn(false).unwrap();
        seed.set(b"k", b"v1").unwrap();
        seed.commit().unwrap();

        let mut reader = store.new_txn(true).unwrap();

        let mut writer = store.new_txn(false).unwrap();
        writer.set(b"k", b"v2").unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.get(b"k").unwrap(), Some(b"v1".to_vec()));
        let mut fresh = store.new_txn(true).unwrap();
        assert_eq!(fresh.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_read_write_conflict() {
        let store = MemoryStore::new();
        let mut a = store.new_txn(false).unwrap();
        let mut b = store.new_txn(false).unwrap();

        assert_eq!(a.get(b"heads").unwrap(), None);
        assert_eq!(b.get(b"heads").unwrap(), None);
        a.set(b"heads", b"a").unwrap();
        b.set(b"heads", b"b").unwrap();

        a.commit().unwrap();
        assert_eq!(b.commit(), Err(KvError::Conflict));

        let mut check = store.new_txn(true).unwrap();
        assert_eq!(check.get(b"heads").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn test_disjoint_keys_do_not_conflict() {
        let store = MemoryStore::new();
        let mut a = store.new_txn(false).unwrap();
        let mut b = store.new_txn(false).unwrap();
        a.set(b"/doc/1", b"x").unwrap();
        b.set(b"/doc/2", b"y").unwrap();
        a.commit().unwrap();
        b.commit().unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_scan_conflict() {
        let store = MemoryStore::new();
        let mut scanner = store.new_txn(false).unwrap();
        assert_eq!(scanner.iterate(b"/h/").unwrap().count(), 0);
        scanner.set(b"/other", b"1").unwrap();

        let mut writer = store.new_txn(false).unwrap();
        writer.set(b"/h/new", b"1").unwrap();
        writer.commit().unwrap();

        assert!(scanner.commit().unwrap_err().is_conflict());
    }

    #[test]
    fn test_iterate_is_ordered_and_sees_own_writes() {
        let store = MemoryStore::new();
        let mut seed = store.new_txn(false).unwrap();
        seed.set(b"/p/b", b"2").unwrap();
        seed.set(b"/p/a", b"1").unwrap();
        seed.set(b"/q/a", b"x").unwrap();
        seed.commit().unwrap();

        let mut txn = store.new_txn(false).unwrap();
        txn.set(b"/p/c", b"3").unwrap();
        txn.delete(b"/p/a").unwrap();
        let keys: Vec<_> = txn.iterate(b"/p/").unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"/p/b".to_vec(), b"/p/c".to_vec()]);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let store = MemoryStore::new();
        let mut txn = store.new_txn(true).unwrap();
        assert_eq!(txn.set(b"k", b"v"), Err(KvError::ReadOnly));
        assert_eq!(txn.delete(b"k"), Err(KvError::ReadOnly));
    }

    #[test]
    fn test_discard_leaves_store_untouched() {
        let store = MemoryStore::new();
        let mut txn = store.new_txn(false).unwrap();
        txn.set(b"k", b"v").unwrap();
        txn.discard();
        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_old_versions_pruned() {
        let store = MemoryStore::new();
        for i in 0..10u8 {
            let mut txn = store.new_txn(false).unwrap();
            txn.set(b"k", &[i]).unwrap();
            txn.commit().unwrap();
        }
        let inner = store.inner.read();
        assert_eq!(inner.values.get(b"k".as_slice()).map(|v| v.len()), Some(1));
        assert!(inner.active.is_empty());
    }
}
