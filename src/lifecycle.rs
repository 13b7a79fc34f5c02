// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Segment/thumbnail lifecycle tracking and garbage collection.
//!
//! Mirrors the sliding-window bookkeeping an HLS media playlist itself does:
//! segments age out of the window as `media_sequence` advances, and once a
//! segment has been out of the window for `expire_time_secs` its thumbnails
//! (and manifest entry) are reaped.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::scheduler::GeneratedThumbnail;

/// All known-emitted thumbnails for a single segment, plus when (if ever)
/// the segment left the live window.
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    pub sn: u64,
    pub thumbnails: Vec<ThumbnailRecord>,
    pub removed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailRecord {
    pub time_secs: f64,
    pub name: String,
}

/// Sliding window of "when did sn X leave the playlist" events, used to
/// compute the oldest still-live `sn` without rescanning every record.
///
/// `offset` is the lowest `sn` currently tracked; `removed_at[i]` is the
/// removal timestamp for `sn = offset + i`, or absent (`None` sentinel via
/// length-only tracking) until that `sn` actually leaves the window — see
/// [`RemovalTimeline::mark_removed`].
#[derive(Debug, Default)]
struct RemovalTimeline {
    offset: Option<u64>,
    removed_at: VecDeque<Option<DateTime<Utc>>>,
}

impl RemovalTimeline {
    fn ensure_tracked(&mut self, sn: u64) {
        match self.offset {
            None => {
                self.offset = Some(sn);
                self.removed_at.push_back(None);
            }
            Some(offset) if sn < offset => {
                let gap = offset - sn;
                for _ in 0..gap {
                    self.removed_at.push_front(None);
                }
                self.offset = Some(sn);
            }
            Some(offset) => {
                let end = offset + self.removed_at.len() as u64;
                if sn >= end {
                    for _ in 0..(sn - end + 1) {
                        self.removed_at.push_back(None);
                    }
                }
            }
        }
    }

    fn mark_removed(&mut self, sn: u64, at: DateTime<Utc>) {
        self.ensure_tracked(sn);
        let offset = self.offset.unwrap();
        let idx = (sn - offset) as usize;
        if self.removed_at[idx].is_none() {
            self.removed_at[idx] = Some(at);
        }
    }

    /// `sn`s whose removal happened at or before `cutoff` and have not yet
    /// been drained by a prior call.
    fn drain_expired(&mut self, cutoff: DateTime<Utc>) -> Vec<u64> {
        let mut expired = Vec::new();
        while let Some(front) = self.removed_at.front() {
            match front {
                Some(at) if *at <= cutoff => {
                    let sn = self.offset.unwrap();
                    expired.push(sn);
                    self.removed_at.pop_front();
                    self.offset = Some(sn + 1);
                }
                _ => break,
            }
        }
        expired
    }
}

/// Tracks every segment's thumbnails across the lifetime of one stream and
/// decides when to reap them.
pub struct LifecycleManager {
    output_dir: PathBuf,
    expire_time_secs: u64,
    never_delete: bool,
    records: std::collections::BTreeMap<u64, SegmentRecord>,
    timeline: RemovalTimeline,
    finished: bool,
    /// Start of the last-seen live window (`media_sequence` of the last
    /// `advance_window` call). `None` until the first call establishes a
    /// baseline — nothing is removed on that first call, since every `sn`
    /// below it was never observed live.
    window_start: Option<u64>,
    /// End (exclusive) of the last-seen live window, i.e. `media_sequence +
    /// segment_count`. Used by [`mark_all_removed`](Self::mark_all_removed)
    /// to mark every `sn` the playlist ever showed us, including ones that
    /// never got a thumbnail and so have no `SegmentRecord`.
    window_end: Option<u64>,
}

/// Outcome of a window update: newly-finalized (i.e. reaped) segments, plus
/// whether the stream as a whole finished (VOD ended and every segment was
/// reaped, or the playlist went away).
#[derive(Debug, Default)]
pub struct GcResult {
    pub reaped: Vec<u64>,
}

impl LifecycleManager {
    pub fn new(output_dir: PathBuf, expire_time_secs: u64, never_delete: bool) -> Self {
        Self {
            output_dir,
            expire_time_secs,
            never_delete,
            records: std::collections::BTreeMap::new(),
            timeline: RemovalTimeline::default(),
            finished: false,
            window_start: None,
            window_end: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn record(&self, sn: u64) -> Option<&SegmentRecord> {
        self.records.get(&sn)
    }

    pub fn all_records(&self) -> impl Iterator<Item = &SegmentRecord> {
        self.records.values()
    }

    /// Register newly-generated thumbnails against their segment.
    pub fn record_thumbnails(&mut self, thumbs: &[GeneratedThumbnail]) {
        for t in thumbs {
            let entry = self.records.entry(t.sn).or_insert_with(|| SegmentRecord {
                sn: t.sn,
                thumbnails: Vec::new(),
                removed_at: None,
            });
            entry.thumbnails.push(ThumbnailRecord { time_secs: t.time_secs, name: t.name.clone() });
        }
    }

    /// Update the live window to `[media_sequence, media_sequence +
    /// segment_count)`. Every `sn` below the new window start is marked
    /// removed in the removal timeline as of `now`, whether or not it ever
    /// produced a thumbnail — the timeline must see every `sn` leave the
    /// window in order, or a gap at an un-thumbnailed `sn` would permanently
    /// block `drain_expired` from ever reaching later, already-removed `sn`s.
    pub fn advance_window(&mut self, media_sequence: u64, segment_count: usize, now: DateTime<Utc>) {
        match self.window_start {
            // A known prior baseline: every sn in [start, media_sequence)
            // left the window just now, recorded or not.
            Some(start) => {
                for sn in start..media_sequence {
                    self.timeline.mark_removed(sn, now);
                    if let Some(rec) = self.records.get_mut(&sn) {
                        if rec.removed_at.is_none() {
                            rec.removed_at = Some(now);
                        }
                    }
                }
            }
            // No baseline yet: the only sn's we know anything about are the
            // ones with a SegmentRecord already (e.g. thumbnails recorded
            // before the window was ever advanced). Anything else below
            // media_sequence was never observed live, so there's nothing to
            // track.
            None => {
                for sn in self.records.keys().copied().collect::<Vec<_>>() {
                    if sn < media_sequence {
                        self.timeline.mark_removed(sn, now);
                        if let Some(rec) = self.records.get_mut(&sn) {
                            if rec.removed_at.is_none() {
                                rec.removed_at = Some(now);
                            }
                        }
                    }
                }
            }
        }
        self.window_start = Some(media_sequence);
        self.window_end = Some(media_sequence + segment_count as u64);
        debug!(media_sequence, segment_count, "Lifecycle window advanced");
    }

    /// The playlist is gone (404 exhausted retries, or malformed). Every
    /// `sn` the playlist ever showed us — not just the ones with a
    /// `SegmentRecord` — is marked removed unconditionally, matching the
    /// full `[window_start, window_end)` range `advance_window` last saw.
    pub fn mark_all_removed(&mut self, now: DateTime<Utc>) {
        if let (Some(start), Some(end)) = (self.window_start, self.window_end) {
            for sn in start..end {
                self.timeline.mark_removed(sn, now);
            }
            self.window_start = Some(end);
        }
        for (sn, rec) in self.records.iter_mut() {
            if rec.removed_at.is_none() {
                rec.removed_at = Some(now);
            }
            self.timeline.mark_removed(*sn, now);
        }
    }

    /// The playlist ended (VOD `#EXT-X-ENDLIST`): every remaining segment is
    /// marked removed so it ages out on the normal GC schedule. The stream
    /// is considered finished once the caller also observes every record
    /// reaped (or immediately, for `never_delete` streams, which never reap).
    pub fn mark_playlist_ended(&mut self, now: DateTime<Utc>) {
        self.mark_all_removed(now);
        self.finished = true;
    }

    /// Reap every segment record whose removal happened at least
    /// `expire_time_secs` ago. No-op when `never_delete` is set.
    pub async fn collect(&mut self, now: DateTime<Utc>) -> GcResult {
        if self.never_delete {
            return GcResult::default();
        }
        let cutoff = now - chrono::Duration::seconds(self.expire_time_secs as i64);
        let expired = self.timeline.drain_expired(cutoff);

        let mut reaped = Vec::new();
        for sn in expired {
            if let Some(rec) = self.records.remove(&sn) {
                for thumb in &rec.thumbnails {
                    let path = self.output_dir.join(&thumb.name);
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(sn, path = %path.display(), error = %e, "Failed to remove expired thumbnail");
                        }
                    }
                }
                debug!(sn, "Reaped segment thumbnails");
                reaped.push(sn);
            }
        }

        GcResult { reaped }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
