// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Playlist polling and parsing.
//!
//! Fetches and parses the HLS media playlist on a cadence driven by its
//! `targetDuration`, and classifies each poll as [`PollOutcome::Changed`],
//! [`PollOutcome::Unchanged`] or [`PollOutcome::Gone`].

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

const RETRY_BACKOFF: Duration = Duration::from_secs(5);
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// One segment in a parsed [`Playlist`].
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration_secs: f64,
}

/// A parsed media playlist snapshot. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub media_sequence: u64,
    pub target_duration_secs: f64,
    pub end_list: bool,
    pub segments: Vec<Segment>,
}

impl Playlist {
    pub fn total_duration_secs(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_secs).sum()
    }
}

/// Result of one [`PlaylistPoller::poll`] call.
#[derive(Debug)]
pub enum PollOutcome {
    Changed(Playlist),
    Unchanged,
    Gone,
}

/// Polls and parses a live HLS playlist, tracking the effective media
/// playlist URL (resolved from a master playlist's first variant, if any)
/// and the last-seen snapshot for change detection.
pub struct PlaylistPoller {
    client: Client,
    original_url: Url,
    effective_url: Option<Url>,
    last_snapshot: Option<(usize, u64)>,
    /// Last-observed `targetDuration`, retained across `Unchanged`/`Gone`
    /// polls so cadence stays correct once it's known.
    last_target_duration_secs: Option<f64>,
    retry_count: i64,
    ignore_404: bool,
}

impl PlaylistPoller {
    pub fn new(client: Client, url: Url, retry_count: i64, ignore_404: bool) -> Self {
        Self {
            client,
            original_url: url,
            effective_url: None,
            last_snapshot: None,
            last_target_duration_secs: None,
            retry_count,
            ignore_404,
        }
    }

    /// The URL currently being polled — the original URL until a master
    /// playlist's first variant has been resolved, then the variant URL.
    pub fn effective_url(&self) -> &Url {
        self.effective_url.as_ref().unwrap_or(&self.original_url)
    }

    /// Fetch and parse the playlist, applying the retry/backoff/404 policy,
    /// and classify the result against the previous snapshot.
    pub async fn poll(&mut self) -> PollOutcome {
        let url = self.effective_url().clone();
        match self.fetch_with_retries(&url).await {
            Ok(bytes) => self.handle_body(&bytes).await,
            Err(()) => PollOutcome::Gone,
        }
    }

    async fn handle_body(&mut self, bytes: &[u8]) -> PollOutcome {
        match m3u8_rs::parse_playlist_res(bytes) {
            Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
                let Some(variant) = master.variants.first() else {
                    warn!("Master playlist has no variants");
                    return PollOutcome::Gone;
                };
                let base = self.effective_url().clone();
                let resolved = match base.join(&variant.uri) {
                    Ok(u) => u,
                    Err(e) => {
                        warn!(error = %e, "Failed to resolve variant URI");
                        return PollOutcome::Gone;
                    }
                };
                debug!(url = %resolved, "Resolved effective media playlist URL from master playlist");
                self.effective_url = Some(resolved.clone());
                match self.fetch_with_retries(&resolved).await {
                    Ok(bytes) => Box::pin(self.handle_body(&bytes)).await,
                    Err(()) => PollOutcome::Gone,
                }
            }
            Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => {
                let playlist = Playlist {
                    media_sequence: media.media_sequence,
                    target_duration_secs: media.target_duration as f64,
                    end_list: media.end_list,
                    segments: media
                        .segments
                        .iter()
                        .map(|s| Segment {
                            uri: s.uri.clone(),
                            duration_secs: s.duration as f64,
                        })
                        .collect(),
                };
                self.classify(playlist)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse playlist body");
                PollOutcome::Gone
            }
        }
    }

    fn classify(&mut self, playlist: Playlist) -> PollOutcome {
        self.last_target_duration_secs = Some(playlist.target_duration_secs);
        let snapshot = (playlist.segments.len(), playlist.media_sequence);
        if self.last_snapshot == Some(snapshot) {
            return PollOutcome::Unchanged;
        }
        self.last_snapshot = Some(snapshot);
        PollOutcome::Changed(playlist)
    }

    /// Fetch `url`, retrying up to `playlist_retry_count + 1` times with a
    /// fixed 5s backoff. A 404 short-circuits immediately unless
    /// `ignore_playlist_404` is set, in which case it's a normal retryable
    /// failure. `Err(())` means retries (or the 404 short-circuit) concluded
    /// the playlist is gone.
    async fn fetch_with_retries(&self, url: &Url) -> std::result::Result<Vec<u8>, ()> {
        let mut attempt: i64 = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::NotFound) if !self.ignore_404 => {
                    debug!(%url, "Playlist 404, not ignored — treating as gone");
                    return Err(());
                }
                Err(e) => {
                    attempt += 1;
                    let exhausted =
                        self.retry_count >= 0 && attempt > self.retry_count;
                    if exhausted {
                        warn!(%url, attempts = attempt, error = ?e, "Playlist fetch retries exhausted");
                        return Err(());
                    }
                    warn!(%url, attempt, error = ?e, "Playlist fetch failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError> {
        let resp = tokio::time::timeout(FETCH_TIMEOUT, self.client.get(url.clone()).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status()));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    /// Cadence the poller loop should wait before calling [`poll`] again.
    /// Advisory: the driving loop owns the actual timer.
    pub fn next_delay(&self, last: &PollOutcome) -> Duration {
        match last {
            PollOutcome::Changed(p) if p.end_list => Duration::from_secs(30),
            PollOutcome::Changed(p) => {
                Duration::from_secs_f64((p.target_duration_secs / 2.0).max(1.0))
            }
            PollOutcome::Unchanged | PollOutcome::Gone => match self.last_target_duration_secs {
                Some(td) => Duration::from_secs_f64((td / 2.0).max(1.0)),
                None => Duration::from_secs(2),
            },
        }
    }
}

#[derive(Debug)]
enum FetchError {
    NotFound,
    Timeout,
    Status(StatusCode),
    Transport(String),
}
