//! Directory scan worker.
//!
//! One thread walks the preset directory, rating and filtering each `.milk`
//! file, and publishes entries to the shared list in batches so callers can
//! show a partial catalog while the scan continues. Entries are only ever
//! appended during a pass; the single sort happens at the end inside the
//! same lock.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::sort::merge_sort;
use crate::{PresetInfo, ScanEvent, SharedList};

/// Entries published before the first batch notification.
pub(crate) const FIRST_BATCH: usize = 30;
/// Publish cadence after the first batch.
pub(crate) const BATCH: usize = 64;

/// How much of a preset file the fast header probe reads.
const HEADER_PROBE_BYTES: usize = 160;

const DEFAULT_RATING: f32 = 3.0;

pub(crate) fn run_scan(
    dir: PathBuf,
    max_ps_version: u32,
    shared: Arc<SharedList>,
    events: Sender<ScanEvent>,
) {
    let mut pending: Vec<PresetInfo> = Vec::new();
    let mut published = 0usize;
    let mut first_batch_sent = false;

    let read_dir = match std::fs::read_dir(&dir) {
        Ok(read_dir) => read_dir,
        Err(err) => {
            // A moved or deleted directory is benign; publish an empty list.
            warn!(dir = %dir.display(), error = %err, "preset directory scan failed");
            finish(&shared, Vec::new(), &events, first_batch_sent);
            return;
        }
    };

    for entry in read_dir.flatten() {
        if shared.cancel.load(Ordering::Relaxed) {
            debug!("preset scan cancelled");
            events.send(ScanEvent::Cancelled).ok();
            return;
        }
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_type.is_dir() {
            pending.push(PresetInfo {
                name: format!("*{file_name}"),
                rating: 0.0,
                rating_cum: 0.0,
            });
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("milk"))
        {
            match probe_preset(&path, max_ps_version) {
                Some(rating) => pending.push(PresetInfo {
                    name: file_name,
                    rating,
                    rating_cum: 0.0,
                }),
                None => continue,
            }
        } else {
            continue;
        }

        let threshold = if published == 0 { FIRST_BATCH } else { BATCH };
        if pending.len() >= threshold {
            published += pending.len();
            shared.entries.lock().unwrap().append(&mut pending);
            if !first_batch_sent {
                first_batch_sent = true;
                events.send(ScanEvent::FirstBatch).ok();
            }
        }
    }

    finish(&shared, pending, &events, first_batch_sent);
}

fn finish(
    shared: &SharedList,
    mut pending: Vec<PresetInfo>,
    events: &Sender<ScanEvent>,
    first_batch_sent: bool,
) {
    {
        let mut entries = shared.entries.lock().unwrap();
        entries.append(&mut pending);
        merge_sort(&mut entries);
        rebuild_cumulative(&mut entries);
    }
    shared.complete.store(true, Ordering::Release);
    if !first_batch_sent {
        events.send(ScanEvent::FirstBatch).ok();
    }
    events.send(ScanEvent::Complete).ok();
}

/// Rebuilds the rating prefix sums the weighted selector binary-searches.
/// Directory markers contribute zero weight.
pub(crate) fn rebuild_cumulative(entries: &mut [PresetInfo]) {
    let mut cum = 0.0f32;
    for entry in entries {
        if !entry.name.starts_with('*') {
            cum += entry.rating.max(0.0);
        }
        entry.rating_cum = cum;
    }
}

/// Rates one preset file, or returns `None` to exclude it.
///
/// The fast path reads only the first [`HEADER_PROBE_BYTES`] bytes, enough
/// for the version header and an early `fRating=` line. When the rating is
/// not in that window the whole file is read instead.
fn probe_preset(path: &Path, max_ps_version: u32) -> Option<f32> {
    let mut head = [0u8; HEADER_PROBE_BYTES];
    let read = File::open(path)
        .and_then(|mut f| {
            let mut filled = 0;
            while filled < head.len() {
                match f.read(&mut head[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(err) => return Err(err),
                }
            }
            Ok(filled)
        })
        .ok()?;
    let head = String::from_utf8_lossy(&head[..read]);

    let mut ps_version = 0u32;
    for key in ["PSVERSION_WARP", "PSVERSION_COMP", "PSVERSION"] {
        if let Some(v) = header_value(&head, key) {
            ps_version = ps_version.max(v.trim().parse().unwrap_or(0));
        }
    }
    if ps_version > max_ps_version {
        debug!(path = %path.display(), ps_version, "preset excluded, shader tier too high");
        return None;
    }

    if let Some(raw) = header_value(&head, "fRating") {
        // The probe may have cut the line short; only trust a complete one.
        if head[head.find("fRating").unwrap_or(0)..].contains('\n') {
            return Some(raw.trim().parse().unwrap_or(DEFAULT_RATING));
        }
    }

    // Slow path: full keyed read.
    let text = std::fs::read_to_string(path).ok()?;
    let rating = header_value(&text, "fRating")
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(DEFAULT_RATING);
    Some(rating)
}

/// Finds `key=value` at the start of a line, returning the value slice up to
/// end of line.
fn header_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(key) {
            if let Some(value) = rest.strip_prefix('=') {
                return Some(value);
            }
        }
    }
    None
}
