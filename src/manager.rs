// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Generator manager: orchestrates every stream's generator task and runs
//! the liveness-ping reaper.
//!
//! Supports dynamic stream add/remove at runtime via `add_stream()` and
//! `remove_stream()`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, StreamConfig};
use crate::error::{Result, ThumbError};
use crate::extractor::{FfmpegExtractor, FrameExtractor};
use crate::generator::{self, GeneratorHandle};

const REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// Top-level manager.
pub struct GeneratorManager {
    /// Per-stream generator handles, keyed by stream ID.
    generators: Arc<parking_lot::RwLock<HashMap<String, (StreamConfig, GeneratorHandle)>>>,
    client: Client,
    extractor: Arc<dyn FrameExtractor>,
    reaper_handle: Option<JoinHandle<()>>,
}

impl GeneratorManager {
    /// Create the manager from a validated [`Config`], spawning a generator
    /// for each configured stream.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ThumbError::Config(format!("failed to build HTTP client: {e}")))?;

        let extractor: Arc<dyn FrameExtractor> = Arc::new(FfmpegExtractor::new(
            config.ffmpeg.binary.clone(),
            Duration::from_secs(config.ffmpeg.timeout_secs),
            std::env::temp_dir(),
        ));

        let mut map = HashMap::new();
        for stream in &config.streams {
            let handle = generator::spawn(stream.clone(), client.clone(), extractor.clone())?;
            info!(id = handle.id, url = stream.playlist_url, "Stream registered");
            map.insert(handle.id.clone(), (stream.clone(), handle));
        }

        let generators = Arc::new(parking_lot::RwLock::new(map));

        let reaper_handle = if config.server.ping_timeout_secs > 0 {
            Some(spawn_reaper(generators.clone(), config.server.ping_timeout_secs))
        } else {
            None
        };

        Ok(GeneratorManager { generators, client, extractor, reaper_handle })
    }

    /// Add a new stream at runtime. Returns an error if the ID already exists.
    pub fn add_stream(&self, stream: StreamConfig) -> Result<String> {
        let id = stream.id.clone().unwrap_or_else(|| generator::derive_id(&stream.playlist_url));
        if self.generators.read().contains_key(&id) {
            return Err(ThumbError::StreamExists { id });
        }

        let handle = generator::spawn(stream.clone(), self.client.clone(), self.extractor.clone())?;
        info!(id = handle.id, "Stream added (hot)");
        self.generators.write().insert(id.clone(), (stream, handle));
        Ok(id)
    }

    /// Remove a stream at runtime, deleting its thumbnails and manifest
    /// unless `keep_files` is set.
    pub async fn remove_stream(&self, id: &str, keep_files: bool) -> Result<()> {
        let entry = self.generators.write().remove(id);
        match entry {
            Some((_, handle)) => {
                handle.destroy(!keep_files).await;
                info!(id, "Stream removed (hot)");
                Ok(())
            }
            None => Err(ThumbError::StreamNotFound { id: id.to_string() }),
        }
    }

    pub fn manifest_path(&self, id: &str) -> Result<std::path::PathBuf> {
        let guard = self.generators.read();
        let (stream, handle) = guard
            .get(id)
            .ok_or_else(|| ThumbError::StreamNotFound { id: id.to_string() })?;
        Ok(handle.manifest_path(stream))
    }

    /// The stream's most recently built manifest, served from memory.
    pub fn manifest(&self, id: &str) -> Result<crate::manifest::Manifest> {
        let guard = self.generators.read();
        let (_, handle) = guard
            .get(id)
            .ok_or_else(|| ThumbError::StreamNotFound { id: id.to_string() })?;
        Ok(handle.manifest())
    }

    pub async fn ping(&self, id: &str) -> Result<()> {
        let handle_ping = {
            let guard = self.generators.read();
            let (_, handle) = guard
                .get(id)
                .ok_or_else(|| ThumbError::StreamNotFound { id: id.to_string() })?;
            handle.ping()
        };
        handle_ping.await;
        Ok(())
    }

    /// List currently active stream IDs and their source URL.
    pub fn list_streams(&self) -> Vec<(String, String)> {
        self.generators
            .read()
            .iter()
            .map(|(id, (cfg, _))| (id.clone(), cfg.playlist_url.clone()))
            .collect()
    }

    pub fn stream_count(&self) -> usize {
        self.generators.read().len()
    }

    /// Gracefully destroy all generators. Called on shutdown; keeps files on
    /// disk since this is a process exit, not a stream removal.
    pub async fn shutdown(self) {
        info!("Generator manager shutting down…");
        if let Some(handle) = self.reaper_handle {
            handle.abort();
        }
        let entries: Vec<_> = self.generators.write().drain().collect();
        for (id, (_, handle)) in entries {
            handle.destroy(false).await;
            info!(id, "Generator stopped");
        }
    }
}

fn spawn_reaper(
    generators: Arc<parking_lot::RwLock<HashMap<String, (StreamConfig, GeneratorHandle)>>>,
    timeout_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAPER_INTERVAL);
        loop {
            interval.tick().await;
            let stale: Vec<String> = generators
                .read()
                .iter()
                .filter(|(_, (_, handle))| handle.seconds_since_ping() >= timeout_secs)
                .map(|(id, _)| id.clone())
                .collect();

            for id in stale {
                let entry = generators.write().remove(&id);
                if let Some((_, handle)) = entry {
                    warn!(id, timeout_secs, "Stream ping timed out, destroying generator");
                    handle.destroy(true).await;
                }
            }
        }
    })
}
