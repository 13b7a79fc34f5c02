// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Thumbnail scheduler — decides which segments to extract frames from and
//! at what intra-segment offsets, so that a target number of thumbnails is
//! spread evenly over the (changing) stream duration without duplicates or
//! gaps.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error};
use url::Url;

use crate::config::IntervalMode;
use crate::error::Result;
use crate::extractor::FrameExtractor;
use crate::playlist::Playlist;

/// Cursor: where the last thumbnail was grabbed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailLocation {
    pub sn: u64,
    pub time_secs: f64,
}

/// A single extracted frame, immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedThumbnail {
    pub sn: u64,
    pub name: String,
    pub time_secs: f64,
}

pub struct ThumbnailScheduler {
    interval_mode: IntervalMode,
    initial_thumbnail_count: Option<usize>,
    width: Option<u32>,
    height: Option<u32>,
    prefix: String,
    output_dir: PathBuf,
    extractor: Arc<dyn FrameExtractor>,

    last_location: Option<ThumbnailLocation>,
    playlist_ended: bool,
    name_counters: HashMap<u64, usize>,
}

/// Milliseconds precision, per the FrameExtractor contract.
fn round_ms(t: f64) -> f64 {
    (t * 1000.0).round() / 1000.0
}

impl ThumbnailScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        interval_mode: IntervalMode,
        initial_thumbnail_count: Option<usize>,
        width: Option<u32>,
        height: Option<u32>,
        prefix: String,
        output_dir: PathBuf,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Self {
        Self {
            interval_mode,
            initial_thumbnail_count,
            width,
            height,
            prefix,
            output_dir,
            extractor,
            last_location: None,
            playlist_ended: false,
            name_counters: HashMap::new(),
        }
    }

    pub fn last_location(&self) -> Option<ThumbnailLocation> {
        self.last_location
    }

    pub fn playlist_ended(&self) -> bool {
        self.playlist_ended
    }

    fn interval_for(&self, playlist: &Playlist) -> Option<f64> {
        match self.interval_mode {
            IntervalMode::Fixed(i) => Some(i),
            IntervalMode::TargetCount(n) => {
                if n == 0 {
                    return None;
                }
                let total = playlist.total_duration_secs();
                if total <= 0.0 || !total.is_finite() {
                    // Open question in the design: a fresh playlist with zero
                    // total duration would make interval 0 or infinite.
                    // Skip this tick rather than schedule a degenerate walk.
                    None
                } else {
                    Some(total / n as f64)
                }
            }
        }
    }

    /// Prefix sums of segment durations: `prefix[i]` is the start time of
    /// segment `i` on the playlist's internal timeline (`T=0` at segment 0).
    fn prefix_sums(playlist: &Playlist) -> Vec<f64> {
        let mut sums = Vec::with_capacity(playlist.segments.len() + 1);
        let mut acc = 0.0;
        sums.push(0.0);
        for seg in &playlist.segments {
            acc += seg.duration_secs;
            sums.push(acc);
        }
        sums
    }

    fn next_time(&self, playlist: &Playlist, prefix_sums: &[f64], interval: f64) -> f64 {
        if let Some(loc) = self.last_location {
            if loc.sn >= playlist.media_sequence {
                let idx = (loc.sn - playlist.media_sequence) as usize;
                if idx < playlist.segments.len() {
                    let start = prefix_sums[idx];
                    return start + loc.time_secs + interval;
                }
            }
        }

        if self.initial_thumbnail_count.is_none() {
            0.0
        } else {
            let total = *prefix_sums.last().unwrap_or(&0.0);
            let backfill = self.initial_thumbnail_count.unwrap_or(0) as f64 * interval;
            (total - backfill).max(0.0)
        }
    }

    /// Index of the segment whose `[start, start+duration)` contains `t`, or
    /// `None` if `t` falls at or beyond the end of the playlist.
    fn segment_at(prefix_sums: &[f64], segment_count: usize, t: f64) -> Option<usize> {
        for idx in 0..segment_count {
            let start = prefix_sums[idx];
            let end = prefix_sums[idx + 1];
            if t >= start && t < end {
                return Some(idx);
            }
        }
        None
    }

    fn resolve_segment_url(playlist_url: &Url, uri: &str) -> Result<Url> {
        playlist_url
            .join(uri)
            .map_err(|e| crate::error::ThumbError::SegmentFetch(format!("resolve '{uri}': {e}")))
    }

    /// Given a freshly `Changed` playlist, emit zero or more new thumbnails
    /// and advance the cursor. Idempotent across re-polls of an unchanged
    /// playlist because `last_location` prevents re-emission.
    pub async fn schedule(
        &mut self,
        playlist: &Playlist,
        playlist_url: &Url,
    ) -> Result<Vec<GeneratedThumbnail>> {
        let mut emitted = Vec::new();

        let Some(interval) = self.interval_for(playlist) else {
            if playlist.end_list {
                self.playlist_ended = true;
            }
            return Ok(emitted);
        };

        let prefix_sums = Self::prefix_sums(playlist);
        let mut next_time = self.next_time(playlist, &prefix_sums, interval);

        let mut seg_idx = match Self::segment_at(&prefix_sums, playlist.segments.len(), next_time)
        {
            Some(i) => i,
            None => {
                if playlist.end_list {
                    self.playlist_ended = true;
                }
                return Ok(emitted);
            }
        };

        while seg_idx < playlist.segments.len() {
            let seg = &playlist.segments[seg_idx];
            let sn = playlist.media_sequence + seg_idx as u64;
            let start_time = prefix_sums[seg_idx];
            let seg_end = prefix_sums[seg_idx + 1];
            let base_offset = round_ms(next_time - start_time);

            let segment_url = match Self::resolve_segment_url(playlist_url, &seg.uri) {
                Ok(u) => u,
                Err(e) => {
                    error!(sn, error = %e, "Failed to resolve segment URL, skipping segment");
                    break;
                }
            };

            let start_index = *self.name_counters.get(&sn).unwrap_or(&0);
            let basename = format!("{}-{}", self.prefix, sn);

            let frames = self
                .extractor
                .extract(
                    &segment_url,
                    base_offset,
                    interval,
                    seg.duration_secs,
                    self.width,
                    self.height,
                    &self.output_dir,
                    &basename,
                    start_index,
                )
                .await;

            let frames = match frames {
                Ok(frames) => frames,
                Err(e) => {
                    error!(sn, error = %e, "Frame extraction failed, leaving cursor unchanged");
                    break;
                }
            };

            if frames.is_empty() {
                debug!(sn, base_offset, "No frames produced for segment, advancing past it");
                next_time = seg_end;
                seg_idx += 1;
                continue;
            }

            self.name_counters
                .insert(sn, start_index + frames.len());

            for frame in &frames {
                let thumb = GeneratedThumbnail {
                    sn,
                    name: frame.file_name.clone(),
                    time_secs: frame.offset_secs,
                };
                self.last_location = Some(ThumbnailLocation { sn, time_secs: thumb.time_secs });
                next_time = start_time + thumb.time_secs + interval;
                emitted.push(thumb);
            }

            seg_idx += 1;
        }

        if playlist.end_list {
            self.playlist_ended = true;
        }

        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractedFrame;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeExtractor {
        calls: Mutex<Vec<(String, f64, f64, f64)>>,
    }

    impl FakeExtractor {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl FrameExtractor for FakeExtractor {
        async fn extract(
            &self,
            segment_url: &Url,
            base_offset_secs: f64,
            interval_secs: f64,
            segment_duration_secs: f64,
            _width: Option<u32>,
            _height: Option<u32>,
            _output_dir: &Path,
            basename: &str,
            start_index: usize,
        ) -> Result<Vec<ExtractedFrame>> {
            self.calls.lock().unwrap().push((
                segment_url.to_string(),
                base_offset_secs,
                interval_secs,
                segment_duration_secs,
            ));
            let mut frames = Vec::new();
            let mut t = base_offset_secs;
            let mut i = 0;
            while t < segment_duration_secs {
                frames.push(ExtractedFrame {
                    index: start_index + i,
                    offset_secs: t,
                    file_name: format!("{basename}-{}.jpg", start_index + i),
                });
                i += 1;
                t += interval_secs;
            }
            Ok(frames)
        }
    }

    fn vod_playlist(segments: usize, seg_dur: f64) -> Playlist {
        Playlist {
            media_sequence: 0,
            target_duration_secs: seg_dur,
            end_list: true,
            segments: (0..segments)
                .map(|i| crate::playlist::Segment { uri: format!("s{i}.ts"), duration_secs: seg_dur })
                .collect(),
        }
    }

    #[tokio::test]
    async fn bipbop_vod_scenario_emits_five_evenly_spaced_thumbnails() {
        // 10 segments of 6s, target_thumbnail_count=5 -> interval=12s.
        let extractor = Arc::new(FakeExtractor::new());
        let mut sched = ThumbnailScheduler::new(
            IntervalMode::TargetCount(5),
            None,
            None,
            None,
            "pre".into(),
            PathBuf::from("/tmp"),
            extractor,
        );
        let playlist = vod_playlist(10, 6.0);
        let url = Url::parse("http://example.com/live.m3u8").unwrap();
        let thumbs = sched.schedule(&playlist, &url).await.unwrap();

        assert_eq!(thumbs.len(), 5);
        let sns: Vec<u64> = thumbs.iter().map(|t| t.sn).collect();
        assert_eq!(sns, vec![0, 2, 4, 6, 8]);
        for t in &thumbs {
            assert_eq!(t.time_secs, 0.0);
        }
        assert!(sched.playlist_ended());
    }

    #[tokio::test]
    async fn initial_count_backfills_from_the_tail() {
        // interval=6, initial_thumbnail_count=3 -> nextTime = max(0, 60-18) = 42
        let extractor = Arc::new(FakeExtractor::new());
        let mut sched = ThumbnailScheduler::new(
            IntervalMode::Fixed(6.0),
            Some(3),
            None,
            None,
            "pre".into(),
            PathBuf::from("/tmp"),
            extractor,
        );
        let playlist = vod_playlist(10, 6.0);
        let url = Url::parse("http://example.com/live.m3u8").unwrap();
        let thumbs = sched.schedule(&playlist, &url).await.unwrap();

        assert_eq!(thumbs.len(), 3);
        let sns: Vec<u64> = thumbs.iter().map(|t| t.sn).collect();
        assert_eq!(sns, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn repolling_unchanged_playlist_emits_nothing() {
        let extractor = Arc::new(FakeExtractor::new());
        let mut sched = ThumbnailScheduler::new(
            IntervalMode::Fixed(6.0),
            None,
            None,
            None,
            "pre".into(),
            PathBuf::from("/tmp"),
            extractor,
        );
        let playlist = vod_playlist(10, 6.0);
        let url = Url::parse("http://example.com/live.m3u8").unwrap();
        let first = sched.schedule(&playlist, &url).await.unwrap();
        assert!(!first.is_empty());

        let second = sched.schedule(&playlist, &url).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn sliding_window_resumes_from_new_segments_only() {
        // Poll A: sn 100..105 (6 segments), interval=6 -> thumbnails at T=0..30 (sn 100..105).
        let extractor = Arc::new(FakeExtractor::new());
        let mut sched = ThumbnailScheduler::new(
            IntervalMode::Fixed(6.0),
            None,
            None,
            None,
            "pre".into(),
            PathBuf::from("/tmp"),
            extractor,
        );
        let url = Url::parse("http://example.com/live.m3u8").unwrap();

        let mut a = vod_playlist(6, 6.0);
        a.media_sequence = 100;
        a.end_list = false;
        let first = sched.schedule(&a, &url).await.unwrap();
        assert_eq!(first.len(), 6);

        // Poll B: sn 101..107 (adds 106, drops 100).
        let mut b = vod_playlist(6, 6.0);
        b.media_sequence = 101;
        b.end_list = false;
        let second = sched.schedule(&b, &url).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].sn, 106);
        assert_eq!(second[0].time_secs, 0.0);
    }

    #[tokio::test]
    async fn zero_duration_playlist_with_target_count_skips_the_tick() {
        let extractor = Arc::new(FakeExtractor::new());
        let mut sched = ThumbnailScheduler::new(
            IntervalMode::TargetCount(5),
            None,
            None,
            None,
            "pre".into(),
            PathBuf::from("/tmp"),
            extractor,
        );
        let playlist = Playlist {
            media_sequence: 0,
            target_duration_secs: 6.0,
            end_list: false,
            segments: vec![],
        };
        let url = Url::parse("http://example.com/live.m3u8").unwrap();
        let thumbs = sched.schedule(&playlist, &url).await.unwrap();
        assert!(thumbs.is_empty());
    }
}
