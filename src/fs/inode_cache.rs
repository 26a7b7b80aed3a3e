//! in-memory representatives of on-disk inodes.
//!
//! There is at most one [CachedInode] per inode number. Everyone asking for the
//! same number gets a clone of the same [Arc], so attribute changes made
//! through one handle are seen by all of them.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use super::{FileKind, FsError, FsResult, Inode, InodeId};

/// the single cached representative of one inode
#[derive(Debug)]
pub struct CachedInode {
    id: InodeId,
    record: RwLock<Inode>,
    /// attributes changed since the record was last written
    dirty: AtomicBool,
    /// serializes find/add/remove on this inode's directory entries
    namespace: Mutex<()>,
}

impl CachedInode {
    fn new(record: Inode) -> Self {
        CachedInode {
            id: record.inode_number,
            record: RwLock::new(record),
            dirty: AtomicBool::new(false),
            namespace: Mutex::new(()),
        }
    }

    pub fn id(&self) -> InodeId {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Inode> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Inode> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// a consistent copy of the current attributes
    pub fn snapshot(&self) -> Inode {
        self.read().clone()
    }

    pub fn kind(&self) -> FileKind {
        self.read().file_kind
    }

    pub fn hard_links(&self) -> u32 {
        self.read().hard_links
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub(crate) fn lock_namespace(&self) -> MutexGuard<'_, ()> {
        self.namespace.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// inode number keyed store of [CachedInode]s
#[derive(Debug, Default)]
pub struct InodeCache {
    entries: Mutex<HashMap<InodeId, Arc<CachedInode>>>,
}

impl InodeCache {
    fn entries(&self) -> MutexGuard<'_, HashMap<InodeId, Arc<CachedInode>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// the representative of `id`, built with `load` on first access.
    ///
    /// `load` runs with the cache locked, so racing callers can't
    /// end up with two different representatives.
    pub fn get_or_load<F>(&self, id: InodeId, load: F) -> FsResult<Arc<CachedInode>>
    where
        F: FnOnce(InodeId) -> FsResult<Inode>,
    {
        let mut entries = self.entries();
        if let Some(cached) = entries.get(&id) {
            return Ok(Arc::clone(cached));
        }
        let record = load(id)?;
        if record.inode_number != id {
            return Err(FsError::corrupt(format!(
                "inode slot {id} holds a record of inode {}",
                record.inode_number
            )));
        }
        debug!("inode {id} loaded into the cache");
        let cached = Arc::new(CachedInode::new(record));
        entries.insert(id, Arc::clone(&cached));
        Ok(cached)
    }

    /// register a freshly allocated inode.
    ///
    /// `build` writes its record and runs with the cache locked,
    /// so nobody loads the inode half written. it doesn't run when
    /// `id` is already cached
    pub fn insert_new<F>(&self, id: InodeId, build: F) -> FsResult<Arc<CachedInode>>
    where
        F: FnOnce() -> FsResult<Inode>,
    {
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            return Err(FsError::corrupt(format!(
                "freshly allocated inode {id} is already cached"
            )));
        }
        let record = build()?;
        if record.inode_number != id {
            return Err(FsError::corrupt(format!(
                "inode {id} was built as inode {}",
                record.inode_number
            )));
        }
        let cached = Arc::new(CachedInode::new(record));
        entries.insert(id, Arc::clone(&cached));
        Ok(cached)
    }

    pub fn contains(&self, id: InodeId) -> bool {
        self.entries().contains_key(&id)
    }

    fn represents(entries: &HashMap<InodeId, Arc<CachedInode>>, cached: &CachedInode) -> bool {
        entries
            .get(&cached.id)
            .map_or(false, |entry| std::ptr::eq(entry.as_ref(), cached))
    }

    /// whether `cached` is still the representative of its id,
    /// a released inode never becomes one again
    pub fn is_current(&self, cached: &CachedInode) -> bool {
        Self::represents(&self.entries(), cached)
    }

    /// run `release` with the cache locked, then forget `cached`.
    ///
    /// nobody can load the id again until its slot is really free.
    /// returns false, without running `release`, when `cached` isn't
    /// the representative of its id any more. handles still held
    /// elsewhere stay valid but detached
    pub fn evict_with<F>(&self, cached: &CachedInode, release: F) -> FsResult<bool>
    where
        F: FnOnce() -> FsResult<()>,
    {
        let mut entries = self.entries();
        if !Self::represents(&entries, cached) {
            return Ok(false);
        }
        release()?;
        entries.remove(&cached.id);
        Ok(true)
    }

    /// every cached representative, for write back
    pub fn resident(&self) -> Vec<Arc<CachedInode>> {
        self.entries().values().cloned().collect()
    }

    /// drop clean entries that nobody outside the cache refers to,
    /// returns how many were dropped
    pub fn prune(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, cached| Arc::strong_count(cached) > 1 || cached.is_dirty());
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn record(id: InodeId) -> Inode {
        Inode::new(id, libc::S_IFREG | 0o644, 512)
    }

    fn insert(cache: &InodeCache, id: InodeId) -> FsResult<Arc<CachedInode>> {
        cache.insert_new(id, || Ok(record(id)))
    }

    #[test]
    fn test_single_representative() {
        let cache = InodeCache::default();
        let a = cache.get_or_load(4, |id| Ok(record(id))).unwrap();
        let b = cache
            .get_or_load(4, |_| panic!("already cached, must not load again"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.write().file_size = 99;
        assert_eq!(b.read().file_size, 99);
    }

    #[test]
    fn test_racing_loads_converge() {
        let cache = Arc::new(InodeCache::default());
        let loads = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                thread::spawn(move || {
                    cache
                        .get_or_load(11, |id| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            Ok(record(id))
                        })
                        .unwrap()
                })
            })
            .collect();
        let inodes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(inodes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_load_failure_caches_nothing() {
        let cache = InodeCache::default();
        let err = cache
            .get_or_load(5, |_| Err(FsError::corrupt("bad digest")))
            .unwrap_err();
        assert!(matches!(err, FsError::Corrupt(_)));
        assert!(!cache.contains(5));
    }

    #[test]
    fn test_mismatched_record_is_corrupt() {
        let cache = InodeCache::default();
        let err = cache.get_or_load(5, |_| Ok(record(6))).unwrap_err();
        assert!(matches!(err, FsError::Corrupt(_)));
    }

    #[test]
    fn test_evict_runs_release_once() {
        let cache = InodeCache::default();
        let held = insert(&cache, 7).unwrap();
        let failed = cache.evict_with(&held, || Err(FsError::NoSpace));
        assert!(matches!(failed, Err(FsError::NoSpace)));
        // a failed release keeps the representative
        assert!(cache.contains(7));

        assert!(cache.evict_with(&held, || Ok(())).unwrap());
        assert!(!cache.contains(7));
        let again = cache
            .evict_with(&held, || panic!("released twice"))
            .unwrap();
        assert!(!again);

        // a detached handle can't evict the id's next representative
        let next = insert(&cache, 7).unwrap();
        assert!(!cache.is_current(&held));
        assert!(cache.is_current(&next));
        assert!(!cache.evict_with(&held, || Ok(())).unwrap());
        assert!(cache.contains(next.id()));
    }

    #[test]
    fn test_prune_keeps_referenced_and_dirty() {
        let cache = InodeCache::default();
        let held = insert(&cache, 2).unwrap();
        insert(&cache, 3).unwrap().mark_dirty();
        insert(&cache, 4).unwrap();
        assert!(insert(&cache, 4).is_err());

        assert_eq!(cache.prune(), 1);
        assert!(cache.contains(2));
        assert!(cache.contains(3));
        assert!(!cache.contains(4));
        drop(held);
    }
}
