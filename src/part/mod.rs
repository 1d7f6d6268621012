// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The data partition: a directory-backed columnar dataset.
//!
//! Locking discipline: a partition carries (a) a non-recursive mutex for
//! internal bookkeeping (name, switch time, the RID map and its sort) and
//! (b) a read/write lock over the queryable data. Every query takes the
//! read side; structural operations (index purge, metadata rewrite,
//! closing) take the write side. A *soft* write attempt backs off
//! immediately when the lock is contended, making best-effort persistence
//! optional. Lock order is always `data` before `bookkeeping`.

pub(crate) mod queries;
pub(crate) mod selftest;

use crate::{
    column::Column,
    file::{self, MASK_FILE, RIDS_FILE, SORTED_RIDS_FILE},
    file_manager::{AccessPreference, Cleaner, FileManager},
    index::{ColumnIndex, IndexOptions, IndexSpec},
    metadata::{ColumnSpec, MeshShape, MetaTag, PartitionHeader},
    path::absolute_path,
    resource::ResourceStore,
    rids::RidMap,
    state::PartitionState,
    types::ColumnType,
    Bitvector, Error, HashMap,
};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, OnceLock, RwLock, Weak,
    },
    thread::JoinHandle,
};

const MAX_RENAME_ATTEMPTS: usize = 32;

/// Partition configuration and open entry point
pub struct Config {
    path: PathBuf,
    backup_path: Option<PathBuf>,
    resources: ResourceStore,
    fm: Arc<FileManager>,
    access: AccessPreference,
}

impl Config {
    /// Configures a partition rooted at `path`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: absolute_path(path),
            backup_path: None,
            resources: ResourceStore::new(),
            fm: FileManager::process_wide(),
            access: AccessPreference::default(),
        }
    }

    /// Uses a dedicated file manager instead of the process-wide one.
    #[must_use]
    pub fn use_file_manager(mut self, fm: Arc<FileManager>) -> Self {
        self.fm = fm;
        self
    }

    /// Supplies a resource store for directory and test switches.
    #[must_use]
    pub fn use_resources(mut self, resources: ResourceStore) -> Self {
        self.resources = resources;
        self
    }

    /// Pairs the partition with a backup directory.
    #[must_use]
    pub fn use_backup_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.backup_path = Some(absolute_path(path));
        self
    }

    /// Sets the access-preference hint for value files.
    #[must_use]
    pub fn access_preference(mut self, access: AccessPreference) -> Self {
        self.access = access;
        self
    }

    /// Opens the partition.
    pub fn open(self) -> crate::Result<Partition> {
        let dir = self.path;

        if !dir.try_exists()? {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("partition directory {dir:?} does not exist"),
            )));
        }

        let header = PartitionHeader::read_from_dir(&dir)?;
        let nrows = header.nrows as usize;

        let default_spec = header.index_spec.as_deref().map(IndexSpec::parse);

        let mut columns = Vec::with_capacity(header.columns.len());
        let mut lookup = HashMap::default();

        for spec in &header.columns {
            let index_spec = spec
                .index_spec
                .as_deref()
                .map(IndexSpec::parse)
                .or_else(|| default_spec.clone())
                .unwrap_or_default();

            let mut col = Column::new(spec.name.clone(), spec.kind, index_spec);
            col.bounds = spec.minimum.zip(spec.maximum);
            col.load_null_mask(&dir, nrows);

            if spec.kind == ColumnType::Category {
                if let Err(e) = col.load_dictionary(&dir) {
                    log::warn!("cannot load dictionary of column {:?}: {e}", col.name());
                }
            }

            verify_column_file(&dir, &col, nrows);

            lookup.insert(col.name().to_owned(), columns.len());
            columns.push(col);
        }

        let mask = load_mask(&dir, nrows);

        let name = register_unique(&header.name, header.switch_time)?;
        if name != header.name {
            log::warn!(
                "partition name {:?} already taken in this process, using {name:?}",
                header.name,
            );
        }

        let state = if header.state == PartitionState::Unknown {
            PartitionState::Stable
        } else {
            header.state
        };

        let backup_dir = self.backup_path.or_else(|| {
            if self.resources.get_bool_scoped(&name, "useBackupDir") {
                self.resources
                    .get_scoped(&name, "ShadowDir")
                    .map(PathBuf::from)
                    .or_else(|| self.resources.get_dir(&["backupDir"]))
            } else {
                header.alternative_directory.clone()
            }
        });

        let inner = Arc::new(PartitionInner {
            active_dir: dir,
            backup_dir,
            fm: self.fm.clone(),
            resources: self.resources,
            access: self.access,
            bookkeeping: Mutex::new(Bookkeeping {
                name,
                switch_time: header.switch_time,
                rids: None,
            }),
            data: RwLock::new(PartData {
                description: header.description,
                nrows,
                state,
                mask,
                columns,
                lookup,
                meta_tags: header.meta_tags,
                shape: header.shape,
                header_dirty: false,
            }),
            copier: Mutex::new(None),
        });

        let cleaner = Arc::new(PartitionCleaner {
            inner: Arc::downgrade(&inner),
        });
        self.fm
            .register_cleaner(Arc::downgrade(&cleaner) as Weak<dyn Cleaner>);

        let part = Partition {
            inner,
            _cleaner: cleaner,
        };

        part.pair_backup();

        Ok(part)
    }
}

pub(crate) struct Bookkeeping {
    pub name: String,
    pub switch_time: u64,

    /// RID map, loaded on demand; its sort is guarded by this mutex
    pub rids: Option<RidMap>,
}

pub(crate) struct PartData {
    pub description: String,
    pub nrows: usize,
    pub state: PartitionState,
    pub mask: Bitvector,
    pub columns: Vec<Column>,
    pub lookup: HashMap<String, usize>,
    pub meta_tags: Vec<MetaTag>,
    pub shape: Option<MeshShape>,

    /// Set when tags grew, bounds were recomputed or the index
    /// specification changed; cleared by a successful header rewrite
    pub header_dirty: bool,
}

impl PartData {
    /// Resolves a column by name; a leading `_` is a hex-digit positional
    /// index.
    pub fn column(&self, name: &str) -> Option<&Column> {
        if let Some(&i) = self.lookup.get(name) {
            return self.columns.get(i);
        }

        name.strip_prefix('_')
            .and_then(|hex| usize::from_str_radix(hex, 16).ok())
            .and_then(|i| self.columns.get(i))
    }

    /// Active rows visible to a scan over `col` (partition mask joined
    /// with the column's null mask).
    pub fn candidates(&self, col: &Column) -> Bitvector {
        match &col.null_mask {
            Some(nulls) => self.mask.and(nulls),
            None => self.mask.clone(),
        }
    }
}

pub(crate) struct PartitionInner {
    pub active_dir: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub fm: Arc<FileManager>,
    pub resources: ResourceStore,
    pub access: AccessPreference,
    pub bookkeeping: Mutex<Bookkeeping>,
    pub data: RwLock<PartData>,
    copier: Mutex<Option<JoinHandle<()>>>,
}

struct PartitionCleaner {
    inner: Weak<PartitionInner>,
}

impl Cleaner for PartitionCleaner {
    fn try_evict(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };

        let mut freed = false;

        if let Ok(mut data) = inner.data.try_write() {
            for col in &mut data.columns {
                if col.has_index() {
                    col.unload_index();
                    freed = true;
                }
            }
        }

        if let Ok(mut bk) = inner.bookkeeping.try_lock() {
            if bk.rids.take().is_some() {
                freed = true;
            }
        }

        if freed {
            log::debug!("partition cleaner released cached resources");
        }

        freed
    }
}

/// A named directory-backed columnar dataset with a schema, row count,
/// active-row mask and optional bitmap indexes
///
/// See [`Config`] for opening one and [`crate::PartitionWriter`] for
/// creating one.
pub struct Partition {
    pub(crate) inner: Arc<PartitionInner>,
    _cleaner: Arc<PartitionCleaner>,
}

impl Partition {
    /// Partition name, unique within the process.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner
            .bookkeeping
            .lock()
            .expect("lock is poisoned")
            .name
            .clone()
    }

    /// Human description.
    #[must_use]
    pub fn description(&self) -> String {
        self.read_data().description.clone()
    }

    /// Total row count (`nEvents`).
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.read_data().nrows
    }

    /// Number of active rows (set bits in the mask).
    #[must_use]
    pub fn active_rows(&self) -> usize {
        self.read_data().mask.count_ones()
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> PartitionState {
        self.read_data().state
    }

    /// Monotonic switch timestamp.
    #[must_use]
    pub fn switch_time(&self) -> u64 {
        self.inner
            .bookkeeping
            .lock()
            .expect("lock is poisoned")
            .switch_time
    }

    /// Active directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.inner.active_dir
    }

    /// Backup directory, if paired.
    #[must_use]
    pub fn backup_directory(&self) -> Option<&Path> {
        self.inner.backup_dir.as_deref()
    }

    /// Column names in schema order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.read_data()
            .columns
            .iter()
            .map(|c| c.name().to_owned())
            .collect()
    }

    /// Type of a column.
    #[must_use]
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.read_data().column(name).map(Column::kind)
    }

    /// Snapshot of the active-row mask.
    #[must_use]
    pub fn active_mask(&self) -> Bitvector {
        self.read_data().mask.clone()
    }

    /// Ordered meta tags.
    #[must_use]
    pub fn meta_tags(&self) -> Vec<MetaTag> {
        self.read_data().meta_tags.clone()
    }

    /// Appends a meta tag; the header is rewritten on the next flush.
    pub fn add_meta_tag(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut data = self.write_data();
        data.meta_tags.push(MetaTag::new(name, value));
        data.header_dirty = true;
    }

    /// Advisory mesh shape.
    #[must_use]
    pub fn mesh_shape(&self) -> Option<MeshShape> {
        self.read_data().shape.clone()
    }

    /// `[lower, upper]` of a numeric column, computing and caching it if
    /// necessary.
    pub fn column_bounds(&self, name: &str) -> crate::Result<(f64, f64)> {
        if let Some(bounds) = self
            .read_data()
            .column(name)
            .ok_or_else(|| Error::UnknownColumn(name.to_owned()))?
            .bounds()
        {
            return Ok(bounds);
        }

        let values = {
            let data = self.read_data();
            let col = data
                .column(name)
                .ok_or_else(|| Error::UnknownColumn(name.to_owned()))?;
            queries::read_column_f64(&self.inner, col, data.nrows)?
        };

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values.iter().filter(|v| v.is_finite()) {
            min = min.min(*v);
            max = max.max(*v);
        }

        let bounds = if min <= max { (min, max) } else { (0.0, 0.0) };

        let mut data = self.write_data();
        if let Some(&i) = data.lookup.get(name) {
            if let Some(col) = data.columns.get_mut(i) {
                col.bounds = Some(bounds);
            }
            data.header_dirty = true;
        }

        Ok(bounds)
    }

    /// Renames the partition within the process.
    ///
    /// On collision, a switch-time beat plus derived digits is appended;
    /// after a bounded number of attempts [`Error::RenameExhausted`] is
    /// returned and the old name stays in place.
    pub fn rename(&self, new_name: &str) -> crate::Result<String> {
        let mut data = self.write_data();
        let mut bk = self.inner.bookkeeping.lock().expect("lock is poisoned");

        let unique = register_unique(new_name, bk.switch_time)?;
        deregister(&bk.name);
        bk.name = unique.clone();
        data.header_dirty = true;

        Ok(unique)
    }

    /// Rewrites the header if anything changed, with a soft write lock.
    ///
    /// Returns `true` if the header was written; contention or a clean
    /// header are quiet no-ops.
    pub fn flush(&self) -> crate::Result<bool> {
        let Ok(mut data) = self.inner.data.try_write() else {
            log::debug!("header rewrite skipped, partition is busy");
            return Ok(false);
        };

        if !data.header_dirty {
            return Ok(false);
        }

        let bk = self.inner.bookkeeping.lock().expect("lock is poisoned");
        let header = build_header(&bk, &data, self.inner.backup_dir.clone());
        drop(bk);

        header.write_to_dir(&self.inner.active_dir)?;
        data.header_dirty = false;

        Ok(true)
    }

    /// Starts a background thread mirroring the active directory into the
    /// backup directory.
    ///
    /// The thread holds the partition's read lock for its duration; on
    /// failure the backup is left untouched and the error is logged.
    pub fn make_backup_copy(&self) -> crate::Result<()> {
        let Some(backup) = self.inner.backup_dir.clone() else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "partition has no backup directory",
            )));
        };

        let inner = self.inner.clone();

        let handle = std::thread::Builder::new()
            .name("bitpart-backup".into())
            .spawn(move || {
                let _read = inner.data.read().expect("lock is poisoned");

                if let Err(e) = mirror_directory(&inner.active_dir, &backup) {
                    log::error!("backup copy into {backup:?} failed: {e}");
                } else {
                    log::debug!("backup copy into {backup:?} finished");
                }
            })?;

        let mut copier = self.inner.copier.lock().expect("lock is poisoned");
        if let Some(prev) = copier.replace(handle) {
            drop(copier);
            let _ = prev.join();
        }

        Ok(())
    }

    /// Waits for a running backup copy to finish.
    pub fn wait_for_backup(&self) {
        let handle = self.inner.copier.lock().expect("lock is poisoned").take();

        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Applies index options and loads any persisted index files.
    ///
    /// A loaded index whose row count disagrees with the partition is
    /// discarded and its file purged.
    pub fn load_indexes(&self, opts: &IndexOptions) {
        let mut data = self.write_data();
        let nrows = data.nrows;
        let dir = self.inner.active_dir.clone();
        let mut spec_changed = false;

        for col in &mut data.columns {
            if let Some(spec) = opts.spec_for(col.name()) {
                if *spec != col.index_spec {
                    col.index_spec = spec.clone();
                    spec_changed = true;
                }
            }

            col.load_index(&dir, nrows);
        }

        if spec_changed {
            data.header_dirty = true;
        }
    }

    /// Builds missing indexes with up to `nthr` worker threads.
    ///
    /// Workers pull column positions from a shared counter; each builds
    /// and persists one index at a time.
    pub fn build_indexes(&self, opts: &IndexOptions, nthr: usize) -> crate::Result<()> {
        let mut data = self.write_data();
        let nrows = data.nrows;
        let dir = self.inner.active_dir.clone();

        for col in &mut data.columns {
            if let Some(spec) = opts.spec_for(col.name()) {
                col.index_spec = spec.clone();
            }

            // stale index files are discarded here so the build below
            // replaces them
            col.load_index(&dir, nrows);
        }

        struct Job {
            slot: usize,
            kind: ColumnType,
            spec: IndexSpec,
            value_path: PathBuf,
            index_path: PathBuf,
        }

        let jobs: Vec<Job> = data
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                !c.has_index() && c.index_spec != IndexSpec::NoIndex && c.kind().is_numeric()
            })
            .map(|(slot, c)| Job {
                slot,
                kind: c.kind(),
                spec: c.index_spec.clone(),
                value_path: c.value_path(&dir),
                index_path: c.index_path(&dir),
            })
            .collect();

        if jobs.is_empty() {
            return Ok(());
        }

        let counter = AtomicUsize::new(0);
        let results: Mutex<Vec<(usize, ColumnIndex)>> = Mutex::new(vec![]);
        let workers = nthr.clamp(1, jobs.len());

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = counter.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = jobs.get(i) else {
                        break;
                    };

                    match build_one_index(job.kind, &job.spec, &job.value_path, nrows) {
                        Ok(Some(idx)) => {
                            if let Err(e) = idx.write_to_file(&job.index_path) {
                                log::warn!("cannot persist index {:?}: {e}", job.index_path);
                            }
                            results.lock().expect("lock is poisoned").push((job.slot, idx));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log::warn!("index build over {:?} failed: {e}", job.value_path);
                        }
                    }
                });
            }
        });

        let built = results.into_inner().expect("lock is poisoned");
        let any = !built.is_empty();

        for (slot, idx) in built {
            if let Some(col) = data.columns.get_mut(slot) {
                col.index = Some(idx);
            }
        }

        if any {
            data.header_dirty = true;
        }

        Ok(())
    }

    /// Drops all in-memory indexes, keeping their files.
    pub fn unload_indexes(&self) {
        let mut data = self.write_data();
        for col in &mut data.columns {
            col.unload_index();
        }
    }

    /// Drops all indexes and deletes their files.
    pub fn purge_index_files(&self) {
        let mut data = self.write_data();
        let dir = self.inner.active_dir.clone();

        for col in &mut data.columns {
            col.purge_index(&dir);
        }

        data.header_dirty = true;
    }

    /// Returns `true` if the column currently has a loaded index.
    #[must_use]
    pub fn has_index(&self, column: &str) -> bool {
        self.read_data().column(column).is_some_and(Column::has_index)
    }

    /// Resolves a RID to its row number.
    ///
    /// Builds or loads the sorted companion on first use; falls back to a
    /// linear scan when sorting fails.
    pub fn row_from_rid(&self, rid: crate::Rid) -> crate::Result<Option<crate::RowId>> {
        let data = self.read_data();
        let nrows = data.nrows;
        drop(data);

        let mut bk = self.inner.bookkeeping.lock().expect("lock is poisoned");
        self.ensure_rids(&mut bk, nrows)?;

        let Some(rids) = &bk.rids else {
            // implicit RIDs: the row number is the identifier
            let row = rid.0;
            return Ok((row < nrows as u64).then(|| row as crate::RowId));
        };

        Ok(rids.row_from_rid(rid))
    }

    /// RID of a row, if RIDs exist.
    pub fn rid_of_row(&self, row: crate::RowId) -> crate::Result<Option<crate::Rid>> {
        let data = self.read_data();
        let nrows = data.nrows;
        drop(data);

        let mut bk = self.inner.bookkeeping.lock().expect("lock is poisoned");
        self.ensure_rids(&mut bk, nrows)?;

        Ok(match &bk.rids {
            Some(rids) => rids.get(row as usize),
            None => (usize::try_from(row).unwrap_or(usize::MAX) < nrows)
                .then(|| crate::Rid(u64::from(row))),
        })
    }

    /// Evaluates a RID set into the matching active rows.
    pub fn evaluate_rid_set(&self, set: &[crate::Rid]) -> crate::Result<Bitvector> {
        let data = self.read_data();
        let nrows = data.nrows;
        let mask = data.mask.clone();
        drop(data);

        let mut bk = self.inner.bookkeeping.lock().expect("lock is poisoned");
        self.ensure_rids(&mut bk, nrows)?;

        let hits = match &bk.rids {
            Some(rids) => rids.evaluate_rid_set(set, nrows),
            None => crate::rids::rid_set_as_rows(set, nrows),
        };

        Ok(hits.and(&mask))
    }

    fn ensure_rids(&self, bk: &mut Bookkeeping, nrows: usize) -> crate::Result<()> {
        if bk.rids.is_some() {
            return Ok(());
        }

        let rid_path = self.inner.active_dir.join(RIDS_FILE);
        if !rid_path.exists() {
            // `<partition>.fillRIDs` materializes row-number RIDs even
            // without a file
            if self.inner.resources.get_bool_scoped(&bk.name, "fillRIDs") {
                bk.rids = Some(RidMap::new(
                    (0..nrows as u64).map(crate::Rid).collect(),
                ));
            }
            return Ok(());
        }

        let mut rids = RidMap::load(&rid_path, nrows)?;

        let sorted_path = self.inner.active_dir.join(SORTED_RIDS_FILE);
        if let Err(e) = rids.load_or_build_sorted(&sorted_path) {
            log::warn!("cannot build sorted RID file: {e}");
        }

        bk.rids = Some(rids);
        Ok(())
    }

    fn pair_backup(&self) {
        let Some(backup) = self.inner.backup_dir.clone() else {
            return;
        };

        let consistent = {
            let data = self.read_data();
            let bk = self.inner.bookkeeping.lock().expect("lock is poisoned");

            match PartitionHeader::read_from_dir(&backup) {
                Ok(other) => {
                    headers_consistent(&build_header(&bk, &data, None), &other)
                }
                Err(e) => {
                    log::debug!("backup header unreadable ({e}), scheduling rebuild");
                    false
                }
            }
        };

        if consistent {
            log::debug!("backup directory {backup:?} is consistent");
        } else if let Err(e) = self.make_backup_copy() {
            log::warn!("cannot start backup copy: {e}");
        }
    }

    pub(crate) fn read_data(&self) -> std::sync::RwLockReadGuard<'_, PartData> {
        self.inner.data.read().expect("lock is poisoned")
    }

    pub(crate) fn write_data(&self) -> std::sync::RwLockWriteGuard<'_, PartData> {
        self.inner.data.write().expect("lock is poisoned")
    }
}

impl Drop for Partition {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("header rewrite on close failed: {e}");
        }

        self.wait_for_backup();

        let bk = self.inner.bookkeeping.lock().expect("lock is poisoned");
        deregister(&bk.name);
    }
}

fn build_header(
    bk: &Bookkeeping,
    data: &PartData,
    backup_dir: Option<PathBuf>,
) -> PartitionHeader {
    PartitionHeader {
        name: bk.name.clone(),
        description: data.description.clone(),
        nrows: data.nrows as u32,
        switch_time: bk.switch_time,
        state: data.state,
        alternative_directory: backup_dir,
        index_spec: None,
        meta_tags: data.meta_tags.clone(),
        shape: data.shape.clone(),
        columns: data
            .columns
            .iter()
            .map(|c| ColumnSpec {
                name: c.name().to_owned(),
                kind: c.kind(),
                minimum: c.bounds().map(|(min, _)| min),
                maximum: c.bounds().map(|(_, max)| max),
                index_spec: None,
            })
            .collect(),
    }
}

fn headers_consistent(a: &PartitionHeader, b: &PartitionHeader) -> bool {
    a.nrows == b.nrows
        && b.state == PartitionState::Stable
        && a.columns.len() == b.columns.len()
        && a.columns
            .iter()
            .zip(&b.columns)
            .all(|(x, y)| x.name == y.name && x.kind == y.kind)
}

/// Applies the mask policies of §4.2: absent file means all active, a
/// short mask is extended with ones and persisted, an all-ones mask file
/// is deleted, read errors default to all active.
fn load_mask(dir: &Path, nrows: usize) -> Bitvector {
    let path = dir.join(MASK_FILE);

    if !path.exists() {
        return Bitvector::with_len(nrows, true);
    }

    let mut mask = match Bitvector::read_from_file(&path) {
        Ok(mask) => mask,
        Err(e) => {
            log::warn!("cannot read row mask {path:?}: {e}; treating all rows as active");
            return Bitvector::with_len(nrows, true);
        }
    };

    if mask.len() != nrows {
        log::warn!(
            "row mask has {} bits, expected {nrows}; adjusting and rewriting",
            mask.len(),
        );
        mask.adjust_size(nrows, true);

        if let Err(e) = mask.write_to_file(&path) {
            log::warn!("cannot rewrite row mask: {e}");
        }
    }

    if mask.is_all_ones() {
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("cannot remove all-ones row mask: {e}");
        }
    }

    mask
}

fn verify_column_file(dir: &Path, col: &Column, nrows: usize) {
    let Some(elem) = col.kind().element_size() else {
        return;
    };

    let path = col.value_path(dir);
    match std::fs::metadata(&path) {
        Ok(meta) if (meta.len() as usize) < nrows * elem => {
            log::warn!(
                "value file {path:?} holds {} bytes, expected at least {}",
                meta.len(),
                nrows * elem,
            );
        }
        Ok(_) => {}
        Err(e) => log::warn!("cannot stat value file {path:?}: {e}"),
    }
}

fn build_one_index(
    kind: ColumnType,
    spec: &IndexSpec,
    value_path: &Path,
    nrows: usize,
) -> crate::Result<Option<ColumnIndex>> {
    let values = queries::read_file_f64(kind, value_path, nrows)?;
    Ok(ColumnIndex::build(&values, nrows, spec))
}

fn mirror_directory(active: &Path, backup: &Path) -> std::io::Result<()> {
    let staging = backup.with_extension("staging");

    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    for entry in std::fs::read_dir(active)? {
        let entry = entry?;

        if entry.file_type()?.is_file() {
            std::fs::copy(entry.path(), staging.join(entry.file_name()))?;
        }
    }

    if backup.exists() {
        std::fs::remove_dir_all(backup)?;
    }
    std::fs::rename(&staging, backup)?;

    if let Some(parent) = backup.parent() {
        file::fsync_directory(parent)?;
    }

    Ok(())
}

fn registry() -> &'static Mutex<HashSet<String>> {
    static NAMES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    NAMES.get_or_init(|| Mutex::new(HashSet::new()))
}

fn register_unique(base: &str, beat: u64) -> crate::Result<String> {
    let mut names = registry().lock().expect("lock is poisoned");

    if names.insert(base.to_owned()) {
        return Ok(base.to_owned());
    }

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();

    for attempt in 0..MAX_RENAME_ATTEMPTS {
        let digits =
            xxhash_rust::xxh3::xxh3_64(format!("{base}.{beat}.{nanos}.{attempt}").as_bytes())
                % 100_000;
        let candidate = format!("{base}_{beat}{digits:05}");

        if names.insert(candidate.clone()) {
            return Ok(candidate);
        }
    }

    Err(Error::RenameExhausted)
}

fn deregister(name: &str) {
    registry().lock().expect("lock is poisoned").remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn unique_names_get_suffixed() -> crate::Result<()> {
        let a = register_unique("dup_name_test", 1)?;
        let b = register_unique("dup_name_test", 1)?;

        assert_eq!("dup_name_test", a);
        assert_ne!(a, b);
        assert!(b.starts_with("dup_name_test_"));

        deregister(&a);
        deregister(&b);

        Ok(())
    }

    #[test]
    fn mask_policy_absent_file() {
        let dir = tempfile::tempdir().expect("tempdir");

        let mask = load_mask(dir.path(), 100);
        assert_eq!(100, mask.len());
        assert!(mask.is_all_ones());
    }

    #[test]
    fn mask_policy_short_file_is_extended() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(MASK_FILE);

        let short = Bitvector::from_indices(50, [0, 10]);
        short.write_to_file(&path)?;

        let mask = load_mask(dir.path(), 100);

        assert_eq!(100, mask.len());
        assert_eq!(52, mask.count_ones());
        assert!(mask.get(99));

        // the extended mask was persisted
        let reread = Bitvector::read_from_file(&path)?;
        assert_eq!(100, reread.len());

        Ok(())
    }

    #[test]
    fn mask_policy_all_ones_file_is_deleted() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(MASK_FILE);

        Bitvector::with_len(10, true).write_to_file(&path)?;

        let mask = load_mask(dir.path(), 10);

        assert!(mask.is_all_ones());
        assert!(!path.exists());

        Ok(())
    }

    #[test]
    fn mirror_leaves_backup_untouched_on_failure() -> crate::Result<()> {
        let root = tempfile::tempdir()?;
        let active = root.path().join("active");
        let backup = root.path().join("backup");

        std::fs::create_dir_all(&active)?;
        std::fs::create_dir_all(&backup)?;
        std::fs::write(active.join("a"), b"1")?;
        std::fs::write(backup.join("old"), b"2")?;

        // missing active directory fails before the backup is replaced
        let missing = root.path().join("nope");
        assert!(mirror_directory(&missing, &backup).is_err());
        assert!(backup.join("old").exists());

        // a good mirror replaces it
        mirror_directory(&active, &backup)?;
        assert!(backup.join("a").exists());
        assert!(!backup.join("old").exists());

        Ok(())
    }
}
