// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use byteview::ByteView;
use quick_cache::{sync::Cache as QuickCache, UnitWeighter, Weighter};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock, Weak,
    },
};

/// Hint for how a value file should be brought into memory
///
/// Implementations may ignore it; the current one maps `PreferRead` to the
/// file-descriptor path and everything else to a whole-file read.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum AccessPreference {
    /// Map large files, copy small ones
    #[default]
    MmapLarge,

    /// Prefer mapping regardless of size
    PreferMmap,

    /// Prefer buffered descriptor reads
    PreferRead,
}

/// Callback releasing cached resources under memory pressure
///
/// Partitions register one with the [`FileManager`]; when the manager runs
/// out of budget it invokes every cleaner, which in turn unloads indexes
/// and optionally drops RIDs if a soft write lock can be acquired.
pub trait Cleaner: Send + Sync {
    /// Attempts to release resources, returning `true` if anything was freed.
    fn try_evict(&self) -> bool;
}

#[derive(Clone)]
struct BufferWeighter;

impl Weighter<PathBuf, ByteView> for BufferWeighter {
    fn weight(&self, _: &PathBuf, buffer: &ByteView) -> u64 {
        buffer.len() as u64
    }
}

/// Process-wide file service
///
/// Owns every in-memory copy of a value file and a bounded table of open
/// read-only descriptors, enforcing a shared budget across all partitions.
/// Buffers are handed out as cheaply-cloneable [`ByteView`]s, so a reader
/// holding one keeps it alive even after cache eviction.
pub struct FileManager {
    buffers: QuickCache<PathBuf, ByteView, BufferWeighter, rustc_hash::FxBuildHasher>,
    descriptors: QuickCache<PathBuf, Arc<File>, UnitWeighter, rustc_hash::FxBuildHasher>,
    cleaners: Mutex<Vec<Weak<dyn Cleaner>>>,
    bytes_read: AtomicU64,
    capacity: u64,
}

static PROCESS_WIDE: OnceLock<Arc<FileManager>> = OnceLock::new();

impl FileManager {
    /// Creates a manager with roughly `bytes` of buffer capacity.
    #[must_use]
    pub fn with_capacity_bytes(bytes: u64) -> Self {
        use quick_cache::sync::DefaultLifecycle;

        // NOTE: Nothing we can do if it fails
        #[allow(clippy::expect_used)]
        let opts = quick_cache::OptionsBuilder::new()
            .weight_capacity(bytes)
            .hot_allocation(0.9)
            .estimated_items_capacity(10_000)
            .build()
            .expect("cache options should be valid");

        #[allow(clippy::default_trait_access)]
        let buffers = QuickCache::with_options(
            opts,
            BufferWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        #[allow(clippy::default_trait_access)]
        let descriptors = QuickCache::with(
            1_000,
            256,
            UnitWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        Self {
            buffers,
            descriptors,
            cleaners: Mutex::new(vec![]),
            bytes_read: AtomicU64::new(0),
            capacity: bytes,
        }
    }

    /// Returns the lazily-created process-wide instance (1 GiB budget).
    #[must_use]
    pub fn process_wide() -> Arc<Self> {
        PROCESS_WIDE
            .get_or_init(|| Arc::new(Self::with_capacity_bytes(1_024 * 1_024 * 1_024)))
            .clone()
    }

    /// Buffer capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Currently cached buffer bytes.
    #[must_use]
    pub fn buffer_size(&self) -> u64 {
        self.buffers.weight()
    }

    /// Fetches a whole file as a shared read-only buffer.
    ///
    /// Returns `None` when the file is too large for the in-memory budget
    /// or the hint asks for descriptor reads; callers then fall back to
    /// [`FileManager::fetch_descriptor`].
    pub fn fetch_array(
        &self,
        path: &Path,
        hint: AccessPreference,
    ) -> crate::Result<Option<ByteView>> {
        if hint == AccessPreference::PreferRead {
            return Ok(None);
        }

        if let Some(buffer) = self.buffers.get(path) {
            return Ok(Some(buffer));
        }

        let len = std::fs::metadata(path)?.len();

        // too large to keep resident
        if len > self.capacity / 4 {
            return Ok(None);
        }

        let mut file = File::open(path)?;
        let buffer = ByteView::from_reader(&mut file, len as usize)?;

        self.bytes_read.fetch_add(len, Ordering::Relaxed);
        self.buffers.insert(path.to_path_buf(), buffer.clone());

        Ok(Some(buffer))
    }

    /// Fetches a cached read-only descriptor.
    pub fn fetch_descriptor(&self, path: &Path) -> crate::Result<Arc<File>> {
        if let Some(fd) = self.descriptors.get(path) {
            return Ok(fd);
        }

        let fd = Arc::new(File::open(path)?);
        self.descriptors.insert(path.to_path_buf(), fd.clone());

        Ok(fd)
    }

    /// Records bytes read by a scan so cache accounting stays honest.
    pub fn record_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Total bytes read through this manager.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Registers a cleaner; dead references are pruned on each sweep.
    pub fn register_cleaner(&self, cleaner: Weak<dyn Cleaner>) {
        self.cleaners
            .lock()
            .expect("lock is poisoned")
            .push(cleaner);
    }

    /// Invokes every live cleaner, returning how many released something.
    ///
    /// Called when an array fetch cannot be satisfied; a scan retries on
    /// the descriptor path afterwards.
    pub fn run_cleaners(&self) -> usize {
        let mut cleaners = self.cleaners.lock().expect("lock is poisoned");

        cleaners.retain(|c| c.strong_count() > 0);

        cleaners
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.try_evict())
            .count()
    }

    /// Drops any cached state for `path`.
    pub fn evict(&self, path: &Path) {
        self.buffers.remove(path);
        self.descriptors.remove(path);
    }

    /// Drops all cached buffers and descriptors.
    pub fn clear(&self) {
        self.buffers.clear();
        self.descriptors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn array_fetch_caches() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("col");
        std::fs::write(&path, vec![7u8; 4_096])?;

        let fm = FileManager::with_capacity_bytes(1_024 * 1_024);

        let a = fm.fetch_array(&path, AccessPreference::default())?.ok_or(
            crate::Error::UnknownColumn("col".into()),
        )?;
        assert_eq!(4_096, a.len());
        assert_eq!(4_096, fm.bytes_read());

        // second fetch is served from cache
        let _b = fm.fetch_array(&path, AccessPreference::default())?;
        assert_eq!(4_096, fm.bytes_read());

        Ok(())
    }

    #[test]
    fn oversized_file_falls_back() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("col");
        std::fs::write(&path, vec![0u8; 1_000])?;

        let fm = FileManager::with_capacity_bytes(100);

        assert!(fm
            .fetch_array(&path, AccessPreference::default())?
            .is_none());
        assert!(fm
            .fetch_array(&path, AccessPreference::PreferRead)?
            .is_none());

        let fd = fm.fetch_descriptor(&path)?;
        assert_eq!(1_000, fd.metadata()?.len());

        Ok(())
    }

    #[test]
    fn cleaners_run_and_prune() {
        struct Evictable;

        impl Cleaner for Evictable {
            fn try_evict(&self) -> bool {
                true
            }
        }

        let fm = FileManager::with_capacity_bytes(100);

        let alive: Arc<dyn Cleaner> = Arc::new(Evictable);
        fm.register_cleaner(Arc::downgrade(&alive));

        {
            let dead: Arc<dyn Cleaner> = Arc::new(Evictable);
            fm.register_cleaner(Arc::downgrade(&dead));
        }

        assert_eq!(1, fm.run_cleaners());
    }
}
