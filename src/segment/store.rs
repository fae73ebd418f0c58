//! Keyed log-structured segment store.
//!
//! Two tiers: an in-memory memtable ordered by key, and on-disk levels of
//! immutable, key-sorted segment files. Reads consult the memtable, then
//! level 0 newest-first, then deeper levels. Writes merge into the memtable
//! in place; once the memtable crosses `l0_bytes` it is frozen and flushed
//! as a new level-0 segment. Level 0 accumulating past `max_l0_segments`
//! segments triggers a compaction into level 1, and so on up the levels at
//! `level_fanout` segments per level.
//!
//! Grounded on `storage/mmap_store.rs`'s `Mmap`/`MmapOptions` read path;
//! the copy-on-write snapshot swap is `parking_lot`-guarded, mirroring the
//! concurrency crate already used throughout this library. Compaction itself
//! runs on the store's own `TaskPool` rather than inline in `put`: a `put`
//! that trips the L0 cap flushes and swaps in the new segment immediately,
//! then hands the cascade off to a background task that reads and rewrites
//! level files without holding `writer`, re-acquiring it only for the brief
//! atomic swap that publishes the merged result.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};

use crate::concurrency::{Concurrency, TaskPool};
use crate::error::{LogSink, Report, ReportSink, Severity, VangaError};
use crate::segment::profile::SegmentProfile;
use crate::wire::segment_record::{
    decode_record, encode_record, read_level_header, write_level_header, write_level_trailer,
};

const MAX_WRITE_RETRIES: usize = 3;

/// Validated hyperparameters for a [`SegmentStore`].
#[derive(Debug, Clone)]
pub struct SegmentStoreConfig {
    l0_bytes: u64,
    max_l0_segments: usize,
    level_fanout: usize,
}

impl SegmentStoreConfig {
    pub fn builder() -> SegmentStoreConfigBuilder {
        SegmentStoreConfigBuilder::default()
    }

    pub fn l0_bytes(&self) -> u64 {
        self.l0_bytes
    }

    pub fn max_l0_segments(&self) -> usize {
        self.max_l0_segments
    }

    pub fn level_fanout(&self) -> usize {
        self.level_fanout
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentStoreConfigBuilder {
    l0_bytes: Option<u64>,
    max_l0_segments: Option<usize>,
    level_fanout: Option<usize>,
}

impl SegmentStoreConfigBuilder {
    pub fn l0_bytes(mut self, value: u64) -> Self {
        self.l0_bytes = Some(value);
        self
    }

    pub fn max_l0_segments(mut self, value: usize) -> Self {
        self.max_l0_segments = Some(value);
        self
    }

    pub fn level_fanout(mut self, value: usize) -> Self {
        self.level_fanout = Some(value);
        self
    }

    pub fn build(self) -> Result<SegmentStoreConfig, VangaError> {
        let max_l0_segments = self.max_l0_segments.unwrap_or(4);
        if max_l0_segments == 0 {
            return Err(VangaError::InvalidArgument(
                "max_l0_segments must be at least 1".into(),
            ));
        }
        let level_fanout = self.level_fanout.unwrap_or(10);
        if level_fanout < 2 {
            return Err(VangaError::InvalidArgument(
                "level_fanout must be at least 2".into(),
            ));
        }
        Ok(SegmentStoreConfig {
            l0_bytes: self.l0_bytes.unwrap_or(1 << 20),
            max_l0_segments,
            level_fanout,
        })
    }
}

#[derive(Debug, Clone)]
struct SegmentFile {
    path: PathBuf,
}

#[derive(Clone)]
struct Snapshot {
    memtable: BTreeMap<u64, SegmentProfile>,
    memtable_bytes: u64,
    // levels[0] is L0: newest segment last. levels[n>0] holds at most one
    // compacted segment at a time between cascades.
    levels: Vec<Vec<SegmentFile>>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            memtable: BTreeMap::new(),
            memtable_bytes: 0,
            levels: Vec::new(),
        }
    }
}

/// State shared between a [`SegmentStore`] handle and its background
/// compaction tasks, via `Arc` rather than a borrow so a spawned task can
/// outlive the `put` call that triggered it.
struct Shared {
    dir: PathBuf,
    config: SegmentStoreConfig,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    next_file_seq: AtomicU64,
}

impl Shared {
    /// Merges a contiguous span of segments at one level key-by-key,
    /// applying merge-on-write semantics in file order (oldest first) so
    /// the result matches what a single memtable would have produced had
    /// the writes gone there directly.
    fn compact_segments(
        &self,
        segments: &[SegmentFile],
        sink: &dyn ReportSink,
    ) -> Result<SegmentFile, VangaError> {
        let mut merged: BTreeMap<u64, SegmentProfile> = BTreeMap::new();
        for segment in segments {
            match read_all_records(&segment.path) {
                Ok(records) => {
                    for (key, profile) in records {
                        match merged.get(&key) {
                            Some(existing) => {
                                let combined = existing.merge(&profile);
                                merged.insert(key, combined);
                            }
                            None => {
                                merged.insert(key, profile);
                            }
                        }
                    }
                }
                Err(err) => {
                    sink.report(Report::new(
                        Severity::Error,
                        "segment.compact_corrupt",
                        format!("{}: {err}", segment.path.display()),
                    ));
                }
            }
        }
        self.flush_memtable(&merged, sink)
    }

    fn flush_memtable(
        &self,
        memtable: &BTreeMap<u64, SegmentProfile>,
        sink: &dyn ReportSink,
    ) -> Result<SegmentFile, VangaError> {
        let seq = self.next_file_seq.fetch_add(1, Ordering::SeqCst);
        let level = 0u32;
        let final_path = self.dir.join(format!("L{level}-{seq:020}.seg"));
        let tmp_path = self.dir.join(format!("L{level}-{seq:020}.seg.tmp"));

        let mut attempt = 0;
        loop {
            match self.write_segment_file(&tmp_path, level, memtable) {
                Ok(()) => break,
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_WRITE_RETRIES {
                        sink.report(Report::new(
                            Severity::Critical,
                            "segment.write_fatal",
                            err.to_string(),
                        ));
                        return Err(err);
                    }
                    sink.report(Report::new(
                        Severity::Warning,
                        "segment.write_retry",
                        format!("retry {attempt}: {err}"),
                    ));
                }
            }
        }

        fs::rename(&tmp_path, &final_path)?;
        Ok(SegmentFile { path: final_path })
    }

    fn write_segment_file(
        &self,
        tmp_path: &Path,
        level: u32,
        memtable: &BTreeMap<u64, SegmentProfile>,
    ) -> Result<(), VangaError> {
        let file = File::create(tmp_path)?;
        let mut writer = BufWriter::new(file);
        write_level_header(&mut writer, level)?;
        for (key, profile) in memtable {
            encode_record(&mut writer, *key, profile)?;
        }
        write_level_trailer(&mut writer, memtable.len() as u64)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Persistent keyed map from a 64-bit user id to a [`SegmentProfile`].
pub struct SegmentStore {
    shared: Arc<Shared>,
    pool: TaskPool,
}

impl SegmentStore {
    /// Opens (creating if absent) a store rooted at `dir`. Existing level
    /// files left over from a prior process are registered by scanning the
    /// directory for files matching the store's own naming convention; a
    /// directory with no such files starts with empty levels.
    pub fn open(dir: impl Into<PathBuf>, config: SegmentStoreConfig) -> Result<Self, VangaError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut levels: Vec<Vec<SegmentFile>> = Vec::new();
        let mut max_seq = 0u64;
        if let Ok(read_dir) = fs::read_dir(&dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some((level, seq)) = parse_segment_file_name(name) else {
                    continue;
                };
                max_seq = max_seq.max(seq);
                while levels.len() <= level as usize {
                    levels.push(Vec::new());
                }
                levels[level as usize].push(SegmentFile { path });
            }
        }
        for level in &mut levels {
            level.sort_by(|a, b| a.path.cmp(&b.path));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                dir,
                config,
                snapshot: RwLock::new(Arc::new(Snapshot {
                    levels,
                    ..Snapshot::empty()
                })),
                writer: Mutex::new(()),
                next_file_seq: AtomicU64::new(max_seq + 1),
            }),
            // Compaction cascades are already serialized through `writer`;
            // one background worker is enough and keeps disk I/O from
            // competing with itself.
            pool: TaskPool::new(Concurrency::single_threaded()),
        })
    }

    /// Reads the profile stored for `key`, or `None` if absent. A corrupted
    /// segment encountered along the way is skipped and reported rather
    /// than surfaced as an error (best-effort read semantics).
    pub fn get(&self, key: u64, sink: &dyn ReportSink) -> Option<SegmentProfile> {
        let snapshot = self.shared.snapshot.read().clone();
        if let Some(profile) = snapshot.memtable.get(&key) {
            return Some(profile.clone());
        }
        for level in &snapshot.levels {
            for segment in level.iter().rev() {
                match read_key_from_segment(&segment.path, key) {
                    Ok(Some(profile)) => return Some(profile),
                    Ok(None) => continue,
                    Err(err) => {
                        sink.report(Report::new(
                            Severity::Error,
                            "segment.read_corrupt",
                            format!("{}: {err}", segment.path.display()),
                        ));
                        continue;
                    }
                }
            }
        }
        None
    }

    /// Merges `delta` into the profile stored for `key` (merge-on-write).
    /// Serializes with any other writer; readers are never blocked.
    ///
    /// Flushing a memtable that has crossed `l0_bytes` happens inline, since
    /// the caller's own write depends on it. If that flush pushes level 0
    /// past `max_l0_segments`, the resulting cascade is handed to a
    /// background task instead of running here — `put` returns as soon as
    /// its own write is durable, not after however many levels need merging.
    pub fn put(
        &self,
        key: u64,
        delta: &SegmentProfile,
        sink: &dyn ReportSink,
    ) -> Result<(), VangaError> {
        let _guard = self.shared.writer.lock();
        let current = self.shared.snapshot.read().clone();

        let mut memtable = current.memtable.clone();
        let merged = match memtable.get(&key) {
            Some(existing) => existing.merge(delta),
            None => delta.clone(),
        };
        let added_bytes = estimate_profile_bytes(delta);
        memtable.insert(key, merged);

        let mut levels = current.levels.clone();
        let mut memtable_bytes = current.memtable_bytes + added_bytes;
        let mut needs_compaction = false;

        if memtable_bytes >= self.shared.config.l0_bytes && !memtable.is_empty() {
            let segment = self.shared.flush_memtable(&memtable, sink)?;
            if levels.is_empty() {
                levels.push(Vec::new());
            }
            levels[0].push(segment);
            memtable = BTreeMap::new();
            memtable_bytes = 0;
            needs_compaction = levels[0].len() > self.shared.config.max_l0_segments;
        }

        *self.shared.snapshot.write() = Arc::new(Snapshot {
            memtable,
            memtable_bytes,
            levels,
        });
        drop(_guard);

        if needs_compaction {
            let shared = Arc::clone(&self.shared);
            self.pool.spawn(move || run_cascade_compaction(shared));
        }
        Ok(())
    }

    /// Segment counts per level, oldest level first. Test-only window into
    /// state that is otherwise private to let tests observe a background
    /// compaction cascade actually finishing rather than only checking that
    /// reads still resolve correctly (which holds whether or not it has).
    #[cfg(test)]
    fn level_segment_counts(&self) -> Vec<usize> {
        self.shared
            .snapshot
            .read()
            .levels
            .iter()
            .map(|l| l.len())
            .collect()
    }
}

/// Background cascade: repeatedly finds the shallowest level over its cap,
/// merges it off the live snapshot without holding `writer`, then reacquires
/// `writer` only to publish the merged segment and drop the old ones. Loops
/// in case the merge itself pushes the next level over its own cap.
///
/// Runs with its own [`LogSink`] rather than the triggering `put`'s sink,
/// since it may still be running long after that call returned.
fn run_cascade_compaction(shared: Arc<Shared>) {
    let sink = LogSink;
    loop {
        let current = shared.snapshot.read().clone();
        let Some(level_idx) = find_cascading_level(&current.levels, &shared.config) else {
            break;
        };
        let segments = current.levels[level_idx].clone();

        let merged = match shared.compact_segments(&segments, &sink) {
            Ok(segment) => segment,
            Err(err) => {
                sink.report(Report::new(
                    Severity::Critical,
                    "segment.compact_fatal",
                    err.to_string(),
                ));
                return;
            }
        };

        {
            let _guard = shared.writer.lock();
            let mut latest = (*shared.snapshot.read()).clone();
            if let Some(level) = latest.levels.get_mut(level_idx) {
                level.retain(|s| !segments.iter().any(|old| old.path == s.path));
            }
            if latest.levels.len() <= level_idx + 1 {
                latest.levels.push(Vec::new());
            }
            latest.levels[level_idx + 1].push(merged);
            *shared.snapshot.write() = Arc::new(latest);
        }

        for segment in &segments {
            let _ = fs::remove_file(&segment.path);
        }
    }
}

fn find_cascading_level(levels: &[Vec<SegmentFile>], config: &SegmentStoreConfig) -> Option<usize> {
    levels.iter().enumerate().find_map(|(idx, level)| {
        let cap = if idx == 0 { config.max_l0_segments } else { config.level_fanout };
        (level.len() > cap).then_some(idx)
    })
}

fn parse_segment_file_name(name: &str) -> Option<(u32, u64)> {
    let name = name.strip_suffix(".seg")?;
    let rest = name.strip_prefix('L')?;
    let (level_str, seq_str) = rest.split_once('-')?;
    let level = level_str.parse().ok()?;
    let seq = seq_str.parse().ok()?;
    Some((level, seq))
}

fn estimate_profile_bytes(profile: &SegmentProfile) -> u64 {
    let mut bytes = 8u64;
    for entry in profile.entries() {
        bytes += 4 + 8 * entry.timestamps.len() as u64;
    }
    bytes
}

fn read_all_records(path: &Path) -> Result<Vec<(u64, SegmentProfile)>, VangaError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file).map_err(|e| VangaError::IO(e.to_string()))? };
    let mut cursor = std::io::Cursor::new(&mmap[..]);
    read_level_header(&mut cursor)?;
    let mut records = Vec::new();
    while let Some(record) = decode_record(&mut cursor)? {
        records.push(record);
    }
    Ok(records)
}

fn read_key_from_segment(path: &Path, key: u64) -> Result<Option<SegmentProfile>, VangaError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file).map_err(|e| VangaError::IO(e.to_string()))? };
    let mut cursor = std::io::Cursor::new(&mmap[..]);
    read_level_header(&mut cursor)?;
    while let Some((record_key, profile)) = decode_record(&mut cursor)? {
        if record_key == key {
            return Ok(Some(profile));
        }
    }
    Ok(None)
}
