// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Manifest serialization: the JSON file consumers poll to discover which
//! thumbnails currently exist for a stream.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::{Result, ThumbError};
use crate::lifecycle::LifecycleManager;

#[derive(Debug, Clone, Serialize)]
pub struct ManifestThumbnail {
    pub time: f64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestSegment {
    pub sn: u64,
    #[serde(rename = "removalTime", with = "chrono::serde::ts_milliseconds_option")]
    pub removal_time: Option<chrono::DateTime<chrono::Utc>>,
    pub thumbnails: Vec<ManifestThumbnail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub ended: bool,
    pub segments: Vec<ManifestSegment>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self { ended: false, segments: Vec::new() }
    }
}

impl Manifest {
    pub fn from_lifecycle(lifecycle: &LifecycleManager, ended: bool) -> Self {
        let segments = lifecycle
            .all_records()
            .map(|rec| ManifestSegment {
                sn: rec.sn,
                removal_time: rec.removed_at,
                thumbnails: rec
                    .thumbnails
                    .iter()
                    .map(|t| ManifestThumbnail { time: t.time_secs, name: t.name.clone() })
                    .collect(),
            })
            .collect();
        Manifest { ended, segments }
    }
}

/// Writes the manifest JSON file for a stream, always via write-temp-then-
/// rename so readers never observe a half-written file.
pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    pub fn new(output_dir: &Path, file_name: &str) -> Self {
        Self { path: output_dir.join(file_name) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, manifest: &Manifest) -> Result<()> {
        let body = serde_json::to_vec_pretty(manifest)
            .map_err(|e| ThumbError::ManifestWrite(format!("serialize: {e}")))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ThumbError::ManifestWrite(format!("create dir: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| ThumbError::ManifestWrite(format!("write temp file: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ThumbError::ManifestWrite(format!("rename into place: {e}")))?;
        Ok(())
    }

    /// Remove the manifest file. Called on stream destruction unless
    /// `never_delete` is set.
    pub async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove manifest file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn write_then_read_round_trips_through_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ManifestWriter::new(dir.path(), "thumbnails-test.json");

        let manifest = Manifest {
            ended: false,
            segments: vec![ManifestSegment {
                sn: 3,
                removal_time: None,
                thumbnails: vec![ManifestThumbnail { time: 1.5, name: "s-3-0.jpg".into() }],
            }],
        };
        writer.write(&manifest).await.unwrap();

        let raw = tokio::fs::read_to_string(writer.path()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["ended"], false);
        assert_eq!(parsed["segments"][0]["sn"], 3);
        assert_eq!(parsed["segments"][0]["thumbnails"][0]["name"], "s-3-0.jpg");

        assert!(parsed["segments"][0]["removalTime"].is_null());

        // No leftover temp file.
        let tmp = writer.path().with_extension("json.tmp");
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn removal_time_serializes_as_unix_millis_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ManifestWriter::new(dir.path(), "thumbnails-test.json");

        let removed_at = chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let manifest = Manifest {
            ended: true,
            segments: vec![ManifestSegment {
                sn: 7,
                removal_time: Some(removed_at),
                thumbnails: vec![],
            }],
        };
        writer.write(&manifest).await.unwrap();

        let raw = tokio::fs::read_to_string(writer.path()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["segments"][0]["removalTime"], 1_700_000_000_000i64);
    }

    #[tokio::test]
    async fn remove_is_a_noop_when_file_is_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ManifestWriter::new(dir.path(), "thumbnails-missing.json");
        writer.remove().await;
    }
}
