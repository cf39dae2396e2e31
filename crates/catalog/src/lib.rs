//! Preset catalog: a background-scanned, sorted, rating-weighted listing of
//! the presets on disk.
//!
//! The scan runs on its own thread and appends to the shared list in
//! batches, so callers can display a partial catalog while the walk
//! continues. Selection (weighted random, uniform, sequential) and lookups
//! read a snapshot under the same lock the scanner appends under.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use rand::Rng;
use tracing::{debug, warn};

mod scan;
mod sort;

use scan::rebuild_cumulative;

/// One catalog entry: a preset file, or a subdirectory whose name carries a
/// leading `*` marker.
#[derive(Clone, Debug, PartialEq)]
pub struct PresetInfo {
    /// Filename without path; `*name` for subdirectories.
    pub name: String,
    pub rating: f32,
    /// Prefix sum of ratings, used by the weighted selector.
    pub rating_cum: f32,
}

impl PresetInfo {
    pub fn is_directory(&self) -> bool {
        self.name.starts_with('*')
    }
}

pub(crate) struct SharedList {
    pub(crate) entries: Mutex<Vec<PresetInfo>>,
    pub(crate) complete: AtomicBool,
    pub(crate) cancel: AtomicBool,
}

#[derive(Debug)]
pub(crate) enum ScanEvent {
    FirstBatch,
    Complete,
    Cancelled,
}

struct Worker {
    handle: JoinHandle<()>,
    events: Receiver<ScanEvent>,
}

pub struct PresetCatalog {
    dir: PathBuf,
    max_ps_version: u32,
    shared: Arc<SharedList>,
    worker: Option<Worker>,
}

impl PresetCatalog {
    pub fn new(dir: PathBuf, max_ps_version: u32) -> Self {
        Self {
            dir,
            max_ps_version,
            shared: Arc::new(empty_list()),
            worker: None,
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn set_dir(&mut self, dir: PathBuf) {
        if dir != self.dir {
            self.dir = dir;
            self.shared = Arc::new(empty_list());
        }
    }

    /// Starts or waits on a directory scan.
    ///
    /// With a scan already in flight, `force = false` reuses it (returning
    /// immediately for background calls, blocking to completion otherwise)
    /// while `force = true` cancels and restarts. A background call returns
    /// once the first batch of entries is visible; a foreground call blocks
    /// until the scan finishes.
    pub fn update(&mut self, background: bool, force: bool) {
        self.reap_finished();
        if self.worker.is_some() {
            if !force {
                if !background {
                    self.wait_complete();
                }
                return;
            }
            self.cancel_scan(Duration::from_millis(500));
        }
        self.start_scan();
        if background {
            self.wait_first_batch();
        } else {
            self.wait_complete();
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.worker.is_some() && !self.shared.complete.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.shared.complete.load(Ordering::Acquire)
    }

    /// Number of published entries right now; may grow while a scan runs.
    pub fn len(&self) -> usize {
        self.shared.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<PresetInfo> {
        self.shared.entries.lock().unwrap().clone()
    }

    pub fn get(&self, index: usize) -> Option<PresetInfo> {
        self.shared.entries.lock().unwrap().get(index).cloned()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.shared
            .entries
            .lock()
            .unwrap()
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Updates one entry's rating and rebuilds the prefix sums.
    pub fn set_rating(&self, index: usize, rating: f32) {
        let mut entries = self.shared.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(index) {
            entry.rating = rating.clamp(0.0, 5.0);
            rebuild_cumulative(&mut entries);
        }
    }

    /// Picks a preset index with probability proportional to its rating.
    /// Falls back to a uniform pick when no rating weight exists.
    pub fn select_weighted_random<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        let entries = self.shared.entries.lock().unwrap();
        let total = entries.last().map(|e| e.rating_cum).unwrap_or(0.0);
        if total <= 0.0 {
            return uniform_pick(&entries, rng);
        }
        let draw = rng.gen_range(0.0..total);
        let index = entries.partition_point(|e| e.rating_cum <= draw);
        entries.get(index).map(|_| index)
    }

    /// Uniform pick over preset entries, skipping directory markers.
    pub fn select_uniform_random<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        let entries = self.shared.entries.lock().unwrap();
        uniform_pick(&entries, rng)
    }

    /// Sequential mode: the next preset after `current`, wrapping, skipping
    /// directory markers.
    pub fn next_sequential(&self, current: usize) -> Option<usize> {
        let entries = self.shared.entries.lock().unwrap();
        if entries.is_empty() {
            return None;
        }
        let len = entries.len();
        let mut index = (current + 1) % len;
        for _ in 0..len {
            if !entries[index].is_directory() {
                return Some(index);
            }
            index = (index + 1) % len;
        }
        None
    }

    /// Requests cooperative cancellation, waits up to `timeout`, then
    /// detaches the thread. Forcefully killing it is not an option, and the
    /// worker only holds stack-local state plus an `Arc` we replace anyway.
    pub fn cancel_scan(&mut self, timeout: Duration) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.cancel.store(true, Ordering::Relaxed);
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match worker.events.recv_timeout(remaining) {
                Ok(ScanEvent::Complete) | Ok(ScanEvent::Cancelled) => {
                    worker.handle.join().ok();
                    break;
                }
                Ok(ScanEvent::FirstBatch) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("preset scan did not stop in time, detaching");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    worker.handle.join().ok();
                    break;
                }
            }
        }
        self.shared = Arc::new(empty_list());
    }

    fn start_scan(&mut self) {
        let shared = Arc::new(empty_list());
        self.shared = Arc::clone(&shared);
        let (tx, rx) = crossbeam_channel::unbounded();
        let dir = self.dir.clone();
        let max_ps = self.max_ps_version;
        debug!(dir = %dir.display(), "starting preset scan");
        let handle = std::thread::Builder::new()
            .name("preset-scan".into())
            .spawn(move || scan::run_scan(dir, max_ps, shared, tx))
            .expect("spawn preset scan thread");
        self.worker = Some(Worker { handle, events: rx });
    }

    fn wait_first_batch(&mut self) {
        if let Some(worker) = &self.worker {
            for event in worker.events.iter() {
                match event {
                    ScanEvent::FirstBatch => break,
                    ScanEvent::Complete | ScanEvent::Cancelled => break,
                }
            }
        }
        self.reap_finished();
    }

    fn wait_complete(&mut self) {
        if let Some(worker) = self.worker.take() {
            for event in worker.events.iter() {
                if matches!(event, ScanEvent::Complete | ScanEvent::Cancelled) {
                    break;
                }
            }
            worker.handle.join().ok();
        }
    }

    fn reap_finished(&mut self) {
        if self
            .worker
            .as_ref()
            .is_some_and(|w| w.handle.is_finished())
        {
            if let Some(worker) = self.worker.take() {
                worker.handle.join().ok();
            }
        }
    }
}

impl Drop for PresetCatalog {
    fn drop(&mut self) {
        self.cancel_scan(Duration::from_millis(500));
    }
}

fn empty_list() -> SharedList {
    SharedList {
        entries: Mutex::new(Vec::new()),
        complete: AtomicBool::new(false),
        cancel: AtomicBool::new(false),
    }
}

fn uniform_pick<R: Rng>(entries: &[PresetInfo], rng: &mut R) -> Option<usize> {
    let presets: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.is_directory())
        .map(|(i, _)| i)
        .collect();
    if presets.is_empty() {
        None
    } else {
        Some(presets[rng.gen_range(0..presets.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn write_preset(dir: &std::path::Path, name: &str, rating: f32) {
        std::fs::write(
            dir.join(name),
            format!("MILKDROP_PRESET_VERSION=201\nPSVERSION=2\n[preset00]\nfRating={rating}\nzoom=1.0\n"),
        )
        .unwrap();
    }

    #[test]
    fn scan_sorts_with_directories_first() {
        let dir = tempfile::tempdir().unwrap();
        write_preset(dir.path(), "beta.milk", 3.0);
        write_preset(dir.path(), "Alpha.milk", 3.0);
        std::fs::create_dir(dir.path().join("favorites")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut catalog = PresetCatalog::new(dir.path().to_path_buf(), 4);
        catalog.update(false, false);
        assert!(catalog.is_complete());
        let names: Vec<String> = catalog.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["*favorites", "Alpha.milk", "beta.milk"]);
    }

    #[test]
    fn missing_directory_yields_empty_catalog() {
        let mut catalog = PresetCatalog::new(PathBuf::from("/nonexistent/presets"), 4);
        catalog.update(false, false);
        assert!(catalog.is_complete());
        assert!(catalog.is_empty());
    }

    #[test]
    fn background_update_shows_partial_list_early() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..45 {
            write_preset(dir.path(), &format!("p{i:03}.milk"), 3.0);
        }
        let mut catalog = PresetCatalog::new(dir.path().to_path_buf(), 4);
        catalog.update(true, false);
        assert!(catalog.len() >= 30);
        // Reusing the in-flight scan and blocking completes it.
        catalog.update(false, false);
        assert!(catalog.is_complete());
        assert_eq!(catalog.len(), 45);
    }

    #[test]
    fn force_restarts_a_completed_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_preset(dir.path(), "a.milk", 3.0);
        let mut catalog = PresetCatalog::new(dir.path().to_path_buf(), 4);
        catalog.update(false, false);
        assert_eq!(catalog.len(), 1);
        write_preset(dir.path(), "b.milk", 3.0);
        catalog.update(false, true);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn weighted_selection_tracks_rating_proportions() {
        let dir = tempfile::tempdir().unwrap();
        write_preset(dir.path(), "low.milk", 1.0);
        write_preset(dir.path(), "mid.milk", 2.0);
        write_preset(dir.path(), "top.milk", 5.0);
        let mut catalog = PresetCatalog::new(dir.path().to_path_buf(), 4);
        catalog.update(false, false);

        let mut rng = SmallRng::seed_from_u64(42);
        let mut counts = [0usize; 3];
        let draws = 8000;
        for _ in 0..draws {
            let index = catalog.select_weighted_random(&mut rng).unwrap();
            counts[index] += 1;
        }
        // Sorted order: low, mid, top with weights 1/8, 2/8, 5/8.
        let expect = [0.125f64, 0.25, 0.625];
        for (count, expect) in counts.iter().zip(expect) {
            let freq = *count as f64 / draws as f64;
            assert!(
                (freq - expect).abs() < 0.04,
                "frequency {freq} too far from {expect}"
            );
        }
    }

    #[test]
    fn weighted_selection_never_returns_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write_preset(dir.path(), "only.milk", 4.0);
        let mut catalog = PresetCatalog::new(dir.path().to_path_buf(), 4);
        catalog.update(false, false);

        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..64 {
            let index = catalog.select_weighted_random(&mut rng).unwrap();
            assert!(!catalog.get(index).unwrap().is_directory());
        }
    }

    #[test]
    fn zero_ratings_fall_back_to_uniform() {
        let dir = tempfile::tempdir().unwrap();
        write_preset(dir.path(), "a.milk", 0.0);
        write_preset(dir.path(), "b.milk", 0.0);
        let mut catalog = PresetCatalog::new(dir.path().to_path_buf(), 4);
        catalog.update(false, false);

        let mut rng = SmallRng::seed_from_u64(5);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            seen.insert(catalog.select_weighted_random(&mut rng).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn sequential_mode_wraps_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write_preset(dir.path(), "a.milk", 3.0);
        write_preset(dir.path(), "b.milk", 3.0);
        let mut catalog = PresetCatalog::new(dir.path().to_path_buf(), 4);
        catalog.update(false, false);

        // Order: *sub(0), a(1), b(2).
        assert_eq!(catalog.next_sequential(1), Some(2));
        assert_eq!(catalog.next_sequential(2), Some(1)); // wraps past *sub
    }

    #[test]
    fn rating_edits_rebuild_prefix_sums() {
        let dir = tempfile::tempdir().unwrap();
        write_preset(dir.path(), "a.milk", 1.0);
        write_preset(dir.path(), "b.milk", 1.0);
        let mut catalog = PresetCatalog::new(dir.path().to_path_buf(), 4);
        catalog.update(false, false);
        catalog.set_rating(0, 5.0);
        let entries = catalog.snapshot();
        assert_eq!(entries[0].rating_cum, 5.0);
        assert_eq!(entries[1].rating_cum, 6.0);
    }
}
