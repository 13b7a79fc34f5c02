// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-stream generator: the single cooperative task that watches one HLS
//! playlist end to end — polling, scheduling thumbnails, tracking segment
//! lifecycle, garbage-collecting, and keeping the manifest file current.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use sha1::{Digest, Sha1};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::StreamConfig;
use crate::error::{Result, ThumbError};
use crate::extractor::FrameExtractor;
use crate::lifecycle::LifecycleManager;
use crate::manifest::{Manifest, ManifestWriter};
use crate::playlist::{PlaylistPoller, PollOutcome};
use crate::scheduler::ThumbnailScheduler;

const GC_INTERVAL: Duration = Duration::from_secs(30);

/// Broadcast events describing a generator's activity, consumed by the HTTP
/// API (for `GET /api/streams/{id}/events`-style consumers, future work) and
/// by tests.
#[derive(Debug, Clone)]
pub enum GeneratorEvent {
    NewThumbnail { sn: u64, name: String },
    ThumbnailRemoved { sn: u64, name: String },
    ThumbnailsChanged,
    PlaylistEnded,
    Finished,
    Error(String),
}

/// Commands a generator task accepts from its manager.
enum Command {
    Destroy { delete_files: bool },
    Ping,
}

/// A live handle to a running generator task.
pub struct GeneratorHandle {
    pub id: String,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<GeneratorEvent>,
    join: tokio::task::JoinHandle<()>,
    last_ping: Arc<parking_lot::Mutex<Instant>>,
    /// The most recently written manifest, kept in memory so the control API
    /// can serve it without a file read.
    last_manifest: Arc<parking_lot::RwLock<Manifest>>,
}

impl GeneratorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<GeneratorEvent> {
        self.events.subscribe()
    }

    pub async fn destroy(self, delete_files: bool) {
        let _ = self.commands.send(Command::Destroy { delete_files }).await;
        let _ = self.join.await;
    }

    /// Record a liveness ping and return a detached future that notifies the
    /// generator task. Returned as `'static` so callers can drop any lock
    /// guarding this handle before awaiting it.
    pub fn ping(&self) -> impl std::future::Future<Output = ()> + 'static {
        *self.last_ping.lock() = Instant::now();
        let tx = self.commands.clone();
        async move {
            let _ = tx.send(Command::Ping).await;
        }
    }

    pub fn seconds_since_ping(&self) -> u64 {
        self.last_ping.lock().elapsed().as_secs()
    }

    pub fn manifest_path(&self, stream: &StreamConfig) -> std::path::PathBuf {
        stream
            .output_dir
            .join(stream.manifest_file_name.clone().unwrap_or_else(|| default_manifest_name(&self.id)))
    }

    /// The most recently built manifest, held in memory.
    pub fn manifest(&self) -> Manifest {
        self.last_manifest.read().clone()
    }
}

pub fn default_manifest_name(id: &str) -> String {
    format!("thumbnails-{id}.json")
}

/// Derive a stable id/prefix from the playlist URL when the config doesn't
/// supply one explicitly.
pub fn derive_id(playlist_url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(playlist_url.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

/// Spawn a generator task for `stream`, returning a handle the manager holds
/// onto. `extractor` is injected so tests can substitute a fake.
pub fn spawn(
    stream: StreamConfig,
    client: Client,
    extractor: Arc<dyn FrameExtractor>,
) -> Result<GeneratorHandle> {
    let id = stream.id.clone().unwrap_or_else(|| derive_id(&stream.playlist_url));
    let url = Url::parse(&stream.playlist_url)
        .map_err(|e| ThumbError::Config(format!("invalid playlist_url: {e}")))?;

    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (event_tx, _) = broadcast::channel(256);
    let last_ping = Arc::new(parking_lot::Mutex::new(Instant::now()));
    let last_manifest = Arc::new(parking_lot::RwLock::new(Manifest::default()));

    let task = GeneratorTask {
        id: id.clone(),
        stream,
        url,
        client,
        extractor,
        events: event_tx.clone(),
        commands: cmd_rx,
        last_manifest: last_manifest.clone(),
    };

    let join = tokio::spawn(task.run());

    Ok(GeneratorHandle { id, commands: cmd_tx, events: event_tx, join, last_ping, last_manifest })
}

struct GeneratorTask {
    id: String,
    stream: StreamConfig,
    url: Url,
    client: Client,
    extractor: Arc<dyn FrameExtractor>,
    events: broadcast::Sender<GeneratorEvent>,
    commands: mpsc::Receiver<Command>,
    last_manifest: Arc<parking_lot::RwLock<Manifest>>,
}

impl GeneratorTask {
    fn emit(&self, event: GeneratorEvent) {
        let _ = self.events.send(event);
    }

    async fn run(mut self) {
        info!(id = self.id, url = %self.url, "Generator started");

        let prefix = self
            .stream
            .output_name_prefix
            .clone()
            .unwrap_or_else(|| self.id.clone());
        let manifest_name = self
            .stream
            .manifest_file_name
            .clone()
            .unwrap_or_else(|| default_manifest_name(&self.id));

        let mut poller = PlaylistPoller::new(
            self.client.clone(),
            self.url.clone(),
            self.stream.playlist_retry_count,
            self.stream.ignore_playlist_404,
        );
        let mut scheduler = ThumbnailScheduler::new(
            self.stream.interval_mode(),
            self.stream.initial_thumbnail_count,
            self.stream.effective_width(),
            self.stream.height,
            prefix,
            self.stream.temp_dir.clone(),
            self.extractor.clone(),
        );
        let mut lifecycle = LifecycleManager::new(
            self.stream.output_dir.clone(),
            self.stream.expire_time_secs,
            self.stream.never_delete,
        );
        let manifest_writer = ManifestWriter::new(&self.stream.output_dir, &manifest_name);

        let mut poll_deadline = Instant::now();
        let mut gc_deadline = Instant::now() + GC_INTERVAL;
        let mut delete_files_on_exit = true;

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Destroy { delete_files }) => {
                            delete_files_on_exit = delete_files;
                            break;
                        }
                        Some(Command::Ping) => {
                            debug!(id = self.id, "Liveness ping received");
                        }
                        None => {
                            // Manager dropped; treat like an implicit destroy that keeps files.
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep_until(gc_deadline) => {
                    gc_deadline = Instant::now() + GC_INTERVAL;
                    let result = lifecycle.collect(Utc::now()).await;
                    if !result.reaped.is_empty() {
                        let manifest = Manifest::from_lifecycle(&lifecycle, lifecycle.is_finished());
                        *self.last_manifest.write() = manifest.clone();
                        if let Err(e) = manifest_writer.write(&manifest).await {
                            error!(id = self.id, error = %e, "Failed to write manifest after GC");
                        }
                        self.emit(GeneratorEvent::ThumbnailsChanged);
                    }
                    let drained = self.stream.never_delete || lifecycle.all_records().next().is_none();
                    if lifecycle.is_finished() && drained {
                        self.emit(GeneratorEvent::Finished);
                        break;
                    }
                }

                _ = tokio::time::sleep_until(poll_deadline) => {
                    let outcome = poller.poll().await;
                    let next_delay = poller.next_delay(&outcome);
                    poll_deadline = Instant::now() + next_delay;

                    match outcome {
                        PollOutcome::Changed(playlist) => {
                            let now = Utc::now();
                            lifecycle.advance_window(playlist.media_sequence, playlist.segments.len(), now);

                            match scheduler.schedule(&playlist, poller.effective_url()).await {
                                Ok(thumbs) if !thumbs.is_empty() => {
                                    lifecycle.record_thumbnails(&thumbs);
                                    for t in &thumbs {
                                        self.emit(GeneratorEvent::NewThumbnail { sn: t.sn, name: t.name.clone() });
                                    }
                                    self.emit(GeneratorEvent::ThumbnailsChanged);
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    warn!(id = self.id, error = %e, "Scheduler error");
                                    self.emit(GeneratorEvent::Error(e.to_string()));
                                }
                            }

                            if playlist.end_list {
                                lifecycle.mark_playlist_ended(now);
                                self.emit(GeneratorEvent::PlaylistEnded);
                            }

                            let manifest = Manifest::from_lifecycle(&lifecycle, lifecycle.is_finished());
                            *self.last_manifest.write() = manifest.clone();
                            if let Err(e) = manifest_writer.write(&manifest).await {
                                error!(id = self.id, error = %e, "Failed to write manifest");
                            }
                        }
                        PollOutcome::Unchanged => {}
                        PollOutcome::Gone => {
                            warn!(id = self.id, "Playlist gone, marking all segments removed");
                            lifecycle.mark_all_removed(Utc::now());
                            self.emit(GeneratorEvent::Error("playlist gone".into()));
                            let manifest = Manifest::from_lifecycle(&lifecycle, true);
                            *self.last_manifest.write() = manifest.clone();
                            if let Err(e) = manifest_writer.write(&manifest).await {
                                error!(id = self.id, error = %e, "Failed to write manifest after playlist loss");
                            }
                        }
                    }
                }
            }
        }

        if delete_files_on_exit && !self.stream.never_delete {
            manifest_writer.remove().await;
            for rec in lifecycle.all_records() {
                for t in &rec.thumbnails {
                    let path = lifecycle.output_dir().join(&t.name);
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }

        info!(id = self.id, "Generator stopped");
    }
}
