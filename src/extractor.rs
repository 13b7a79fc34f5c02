// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Frame extraction: pulling still thumbnails out of a media segment.
//!
//! [`FrameExtractor`] is the capability trait; [`FfmpegExtractor`] is the
//! real adapter that shells out to an `ffmpeg` binary. Tests substitute a
//! fake implementation so the scheduler can be exercised without a real
//! media toolchain present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, ThumbError};

/// One frame pulled out of a segment, already written to `output_dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFrame {
    pub index: usize,
    pub offset_secs: f64,
    pub file_name: String,
}

/// Capability to pull evenly-spaced still frames out of a media segment.
///
/// `base_offset_secs` is the offset of the first frame within the segment;
/// subsequent frames are spaced `interval_secs` apart until
/// `segment_duration_secs` is reached. `start_index` is the index to assign
/// the first produced frame, so repeated calls against the same segment (as
/// can happen across scheduler runs) never collide on file name.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn extract(
        &self,
        segment_url: &Url,
        base_offset_secs: f64,
        interval_secs: f64,
        segment_duration_secs: f64,
        width: Option<u32>,
        height: Option<u32>,
        output_dir: &Path,
        basename: &str,
        start_index: usize,
    ) -> Result<Vec<ExtractedFrame>>;
}

/// Extracts frames by invoking an external `ffmpeg` binary against the
/// segment URL directly (ffmpeg's own HTTP demuxer handles the fetch),
/// writing JPEGs with an `fps` filter so one process covers the whole
/// segment in one pass.
pub struct FfmpegExtractor {
    binary: String,
    timeout: Duration,
    scratch_dir: PathBuf,
}

impl FfmpegExtractor {
    pub fn new(binary: String, timeout: Duration, scratch_dir: PathBuf) -> Self {
        Self { binary, timeout, scratch_dir }
    }

    fn scale_filter(width: Option<u32>, height: Option<u32>) -> Option<String> {
        match (width, height) {
            (None, None) => None,
            (w, h) => Some(format!(
                "scale={}:{}",
                w.map_or_else(|| "-1".to_string(), |v| v.to_string()),
                h.map_or_else(|| "-1".to_string(), |v| v.to_string())
            )),
        }
    }

    /// Move `from` into `to`, falling back to copy+remove when they straddle
    /// a filesystem boundary (`rename` returning `EXDEV`).
    async fn move_into_place(from: &Path, to: &Path) -> std::io::Result<()> {
        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
                tokio::fs::copy(from, to).await?;
                tokio::fs::remove_file(from).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// `libc::EXDEV` without pulling in the `libc` crate for one constant.
fn libc_exdev() -> i32 {
    18
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract(
        &self,
        segment_url: &Url,
        base_offset_secs: f64,
        interval_secs: f64,
        segment_duration_secs: f64,
        width: Option<u32>,
        height: Option<u32>,
        output_dir: &Path,
        basename: &str,
        start_index: usize,
    ) -> Result<Vec<ExtractedFrame>> {
        if base_offset_secs >= segment_duration_secs || interval_secs <= 0.0 {
            return Ok(Vec::new());
        }

        let remaining = segment_duration_secs - base_offset_secs;
        let count = (remaining / interval_secs).floor() as usize + 1;
        let fps = 1.0 / interval_secs;

        let job_dir = self.scratch_dir.join(format!("{basename}-{start_index}"));
        tokio::fs::create_dir_all(&job_dir)
            .await
            .map_err(|e| ThumbError::Extraction(format!("create scratch dir: {e}")))?;

        let pattern = job_dir.join("frame-%05d.jpg");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(format!("{base_offset_secs:.3}"))
            .arg("-i")
            .arg(segment_url.as_str());

        let mut filter = format!("fps={fps:.6}");
        if let Some(scale) = Self::scale_filter(width, height) {
            filter = format!("{filter},{scale}");
        }

        cmd.arg("-vf")
            .arg(filter)
            .arg("-frames:v")
            .arg(count.to_string())
            .arg("-vsync")
            .arg("0")
            .arg(&pattern)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped());

        debug!(binary = %self.binary, %segment_url, base_offset_secs, count, "Spawning ffmpeg");

        let mut child = cmd
            .spawn()
            .map_err(|e| ThumbError::Extraction(format!("spawn ffmpeg: {e}")))?;

        let stderr = child.stderr.take();
        let wait = tokio::time::timeout(self.timeout, child.wait()).await;

        let status = match wait {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let _ = tokio::fs::remove_dir_all(&job_dir).await;
                return Err(ThumbError::Extraction(format!("ffmpeg wait failed: {e}")));
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = tokio::fs::remove_dir_all(&job_dir).await;
                return Err(ThumbError::Extraction("ffmpeg timed out".into()));
            }
        };

        if !status.success() {
            let mut stderr_text = String::new();
            if let Some(mut pipe) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = pipe.read_to_string(&mut stderr_text).await;
            }
            warn!(status = %status, stderr = %stderr_text, "ffmpeg exited non-zero");
            let _ = tokio::fs::remove_dir_all(&job_dir).await;
            return Err(ThumbError::Extraction(format!(
                "ffmpeg exited with {status}: {stderr_text}"
            )));
        }

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| ThumbError::Extraction(format!("create output dir: {e}")))?;

        let mut frames = Vec::with_capacity(count);
        let mut entries = tokio::fs::read_dir(&job_dir)
            .await
            .map_err(|e| ThumbError::Extraction(format!("read scratch dir: {e}")))?;
        let mut produced = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ThumbError::Extraction(format!("read scratch dir entry: {e}")))?
        {
            produced.push(entry.path());
        }
        produced.sort();

        for (i, src) in produced.into_iter().enumerate() {
            let index = start_index + i;
            let offset = base_offset_secs + i as f64 * interval_secs;
            let file_name = format!("{basename}-{index}.jpg");
            let dest = output_dir.join(&file_name);

            Self::move_into_place(&src, &dest)
                .await
                .map_err(|e| ThumbError::Extraction(format!("place frame: {e}")))?;

            frames.push(ExtractedFrame { index, offset_secs: offset, file_name });
        }

        let _ = tokio::fs::remove_dir_all(&job_dir).await;

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_filter_is_none_when_unset() {
        assert_eq!(FfmpegExtractor::scale_filter(None, None), None);
    }

    #[test]
    fn scale_filter_preserves_aspect_with_minus_one() {
        assert_eq!(
            FfmpegExtractor::scale_filter(Some(320), None),
            Some("scale=320:-1".to_string())
        );
        assert_eq!(
            FfmpegExtractor::scale_filter(None, Some(240)),
            Some("scale=-1:240".to_string())
        );
        assert_eq!(
            FfmpegExtractor::scale_filter(Some(320), Some(240)),
            Some("scale=320:240".to_string())
        );
    }
}
