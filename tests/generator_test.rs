// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! End-to-end pipeline tests: scheduler + lifecycle + manifest wired
//! together the way a running generator drives them, without a real
//! network playlist source.
//!
//! Run with: `cargo test`

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use url::Url;

use hlsthumb::config::IntervalMode;
use hlsthumb::error::Result;
use hlsthumb::extractor::{ExtractedFrame, FrameExtractor};
use hlsthumb::lifecycle::LifecycleManager;
use hlsthumb::manifest::{Manifest, ManifestWriter};
use hlsthumb::playlist::{Playlist, Segment};
use hlsthumb::scheduler::ThumbnailScheduler;

struct FakeExtractor;

#[async_trait]
impl FrameExtractor for FakeExtractor {
    async fn extract(
        &self,
        _segment_url: &Url,
        base_offset_secs: f64,
        interval_secs: f64,
        segment_duration_secs: f64,
        _width: Option<u32>,
        _height: Option<u32>,
        _output_dir: &Path,
        basename: &str,
        start_index: usize,
    ) -> Result<Vec<ExtractedFrame>> {
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

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn vod_playlist(media_sequence: u64, segments: usize, seg_dur: f64, ended: bool) -> Playlist {
    Playlist {
        media_sequence,
        target_duration_secs: seg_dur,
        end_list: ended,
        segments: (0..segments)
            .map(|i| Segment { uri: format!("s{}.ts", media_sequence as usize + i), duration_secs: seg_dur })
            .collect(),
    }
}

#[tokio::test]
async fn bipbop_vod_pipeline_writes_manifest_with_all_thumbnails() {
    let dir = TempDir::new().unwrap();
    let extractor: Arc<dyn FrameExtractor> = Arc::new(FakeExtractor);
    let url = Url::parse("http://example.com/live.m3u8").unwrap();

    let mut scheduler = ThumbnailScheduler::new(
        IntervalMode::TargetCount(5),
        None,
        None,
        None,
        "stream".into(),
        dir.path().to_path_buf(),
        extractor,
    );
    let mut lifecycle = LifecycleManager::new(dir.path().to_path_buf(), 30, false);
    let writer = ManifestWriter::new(dir.path(), "thumbnails-stream.json");

    let playlist = vod_playlist(0, 10, 6.0, true);
    lifecycle.advance_window(playlist.media_sequence, playlist.segments.len(), at(0));
    let thumbs = scheduler.schedule(&playlist, &url).await.unwrap();
    assert_eq!(thumbs.len(), 5);
    lifecycle.record_thumbnails(&thumbs);
    lifecycle.mark_playlist_ended(at(0));

    writer.write(&Manifest::from_lifecycle(&lifecycle, lifecycle.is_finished())).await.unwrap();

    let raw = tokio::fs::read_to_string(writer.path()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["ended"], true);
    assert_eq!(parsed["segments"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn sliding_window_expires_thumbnails_after_expire_time() {
    let dir = TempDir::new().unwrap();
    let extractor: Arc<dyn FrameExtractor> = Arc::new(FakeExtractor);
    let url = Url::parse("http://example.com/live.m3u8").unwrap();

    let mut scheduler = ThumbnailScheduler::new(
        IntervalMode::Fixed(6.0),
        None,
        None,
        None,
        "stream".into(),
        dir.path().to_path_buf(),
        extractor,
    );
    let mut lifecycle = LifecycleManager::new(dir.path().to_path_buf(), 10, false);

    // Poll 1: live window sn 0..6.
    let p1 = vod_playlist(0, 6, 6.0, false);
    lifecycle.advance_window(p1.media_sequence, p1.segments.len(), at(0));
    let t1 = scheduler.schedule(&p1, &url).await.unwrap();
    lifecycle.record_thumbnails(&t1);
    assert!(lifecycle.record(0).is_some());

    // Write one real thumbnail file so GC can observe its removal.
    let file_path = dir.path().join(&t1[0].name);
    tokio::fs::write(&file_path, b"jpeg").await.unwrap();

    // Poll 2: window slides to sn 1..7, sn 0 drops out at t=6.
    let p2 = vod_playlist(1, 6, 6.0, false);
    lifecycle.advance_window(p2.media_sequence, p2.segments.len(), at(6));
    let t2 = scheduler.schedule(&p2, &url).await.unwrap();
    lifecycle.record_thumbnails(&t2);

    // Not yet expired (needs 10s after removal at t=6).
    let gc1 = lifecycle.collect(at(10)).await;
    assert!(gc1.reaped.is_empty());
    assert!(file_path.exists());

    // Expired now (t=16 >= 6+10).
    let gc2 = lifecycle.collect(at(16)).await;
    assert_eq!(gc2.reaped, vec![0]);
    assert!(!file_path.exists());
    assert!(lifecycle.record(0).is_none());
}

#[tokio::test]
async fn destroy_during_extraction_leaves_manifest_consistent_with_never_delete() {
    let dir = TempDir::new().unwrap();
    let extractor: Arc<dyn FrameExtractor> = Arc::new(FakeExtractor);
    let url = Url::parse("http://example.com/live.m3u8").unwrap();

    let mut scheduler = ThumbnailScheduler::new(
        IntervalMode::Fixed(6.0),
        None,
        None,
        None,
        "stream".into(),
        dir.path().to_path_buf(),
        extractor,
    );
    let mut lifecycle = LifecycleManager::new(dir.path().to_path_buf(), 0, true);
    let writer = ManifestWriter::new(dir.path(), "thumbnails-stream.json");

    let playlist = vod_playlist(0, 4, 6.0, false);
    lifecycle.advance_window(playlist.media_sequence, playlist.segments.len(), at(0));
    let thumbs = scheduler.schedule(&playlist, &url).await.unwrap();
    lifecycle.record_thumbnails(&thumbs);
    writer.write(&Manifest::from_lifecycle(&lifecycle, false)).await.unwrap();

    // Simulate a destroy with never_delete: manifest and files must remain,
    // and GC must be a no-op regardless of elapsed time.
    let gc = lifecycle.collect(at(100_000)).await;
    assert!(gc.reaped.is_empty());
    assert!(writer.path().exists());
}

#[test]
fn target_count_with_zero_duration_playlist_is_handled_without_panicking() {
    // Regression guard for the interval_for() division-by-duration edge case.
    let playlist = Playlist { media_sequence: 0, target_duration_secs: 6.0, end_list: false, segments: vec![] };
    assert_eq!(playlist.total_duration_secs(), 0.0);
}
