//! Clip download using yt-dlp.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use clipclub_media::fs_utils::{move_file, remove_if_present, temp_sibling};
use clipclub_models::ClipDescriptor;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_download_retry;
use crate::retry::{retry_async, RetryConfig};

/// Fetches clip media to local files.
#[async_trait]
pub trait ClipDownloader: Send + Sync {
    /// Download one clip and return the local file path.
    async fn download(&self, clip: &ClipDescriptor) -> WorkerResult<PathBuf>;
}

/// Download every clip in order, returning descriptors that point at the
/// local files. Stops at the first clip that cannot be fetched.
pub async fn download_all(
    downloader: &dyn ClipDownloader,
    clips: &[ClipDescriptor],
) -> WorkerResult<Vec<ClipDescriptor>> {
    let mut downloaded = Vec::with_capacity(clips.len());
    for clip in clips {
        let path = downloader.download(clip).await?;
        downloaded.push(clip.clone().with_source_file(path));
    }
    Ok(downloaded)
}

/// Page URL for a clip, falling back to the public clip address.
pub fn clip_url(clip: &ClipDescriptor) -> String {
    if clip.url.is_empty() {
        format!("https://clips.twitch.tv/{}", clip.id)
    } else {
        clip.url.clone()
    }
}

/// [`ClipDownloader`] shelling out to yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    binary: PathBuf,
    state_dir: PathBuf,
    retry: RetryConfig,
}

impl YtDlpDownloader {
    /// Use the `yt-dlp` found in PATH.
    pub fn new(state_dir: impl Into<PathBuf>, retry: RetryConfig) -> WorkerResult<Self> {
        let binary = which::which("yt-dlp")
            .map_err(|_| WorkerError::config_error("yt-dlp not found in PATH"))?;
        Ok(Self::with_binary(binary, state_dir, retry))
    }

    pub fn with_binary(
        binary: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            binary: binary.into(),
            state_dir: state_dir.into(),
            retry,
        }
    }

    /// Local path for a clip.
    pub fn target_path(&self, clip: &ClipDescriptor) -> PathBuf {
        self.state_dir.join(format!("{}.mp4", clip.id))
    }

    async fn fetch_once(&self, url: &str, output: &Path) -> Result<(), String> {
        let partial = temp_sibling(output);

        let result = Command::new(&self.binary)
            .arg("-f")
            .arg("best[ext=mp4]/best")
            .arg("--no-part")
            .arg("-o")
            .arg(&partial)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", self.binary.display(), e))?;

        if !result.status.success() {
            remove_if_present(&partial).await;
            let stderr = String::from_utf8_lossy(&result.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            return Err(format!(
                "yt-dlp exited with {}: {}",
                result.status,
                stderr.lines().last().unwrap_or_default()
            ));
        }

        // A clean exit does not guarantee a file
        if !is_nonempty_file(&partial).await {
            remove_if_present(&partial).await;
            return Err("yt-dlp exited cleanly but wrote nothing".to_string());
        }

        move_file(&partial, output)
            .await
            .map_err(|e| format!("failed to store {}: {}", output.display(), e))
    }
}

#[async_trait]
impl ClipDownloader for YtDlpDownloader {
    async fn download(&self, clip: &ClipDescriptor) -> WorkerResult<PathBuf> {
        let output = self.target_path(clip);
        if is_nonempty_file(&output).await {
            info!(clip_id = %clip.id, "Using existing clip file: {}", output.display());
            return Ok(output);
        }

        tokio::fs::create_dir_all(&self.state_dir).await?;
        let url = clip_url(clip);
        info!(clip_id = %clip.id, "Downloading {} to {}", url, output.display());

        let result = retry_async(&self.retry, |attempt| {
            if attempt > 1 {
                record_download_retry();
            }
            self.fetch_once(&url, &output)
        })
        .await;

        match result.into_result() {
            Ok(()) => Ok(output),
            Err((message, attempts)) => Err(WorkerError::DownloadFailed {
                clip_id: clip.id.clone(),
                attempts,
                message,
            }),
        }
    }
}

async fn is_nonempty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn clip(id: &str, url: &str) -> ClipDescriptor {
        ClipDescriptor {
            id: id.into(),
            title: "title".into(),
            creator_display_name: "someone".into(),
            views: 1,
            creation_date: Utc::now(),
            url: url.into(),
            source_file_path: None,
        }
    }

    fn quick_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new("clip_download")
            .with_max_attempts(attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_clip_url_fallback() {
        assert_eq!(
            clip_url(&clip("FunnyClip-abc", "")),
            "https://clips.twitch.tv/FunnyClip-abc"
        );
        assert_eq!(
            clip_url(&clip("x", "https://example.test/x")),
            "https://example.test/x"
        );
    }

    #[tokio::test]
    async fn test_existing_file_is_reused() {
        let dir = TempDir::new().unwrap();
        let downloader =
            YtDlpDownloader::with_binary("/nonexistent/yt-dlp", dir.path(), quick_retry(3));
        let clip = clip("cached", "");
        tokio::fs::write(downloader.target_path(&clip), b"video")
            .await
            .unwrap();

        let path = downloader.download(&clip).await.unwrap();
        assert_eq!(path, dir.path().join("cached.mp4"));
    }

    #[tokio::test]
    async fn test_failing_binary_exhausts_attempts() {
        let dir = TempDir::new().unwrap();
        let downloader =
            YtDlpDownloader::with_binary("/nonexistent/yt-dlp", dir.path(), quick_retry(3));

        let err = downloader.download(&clip("gone", "")).await.unwrap_err();
        match err {
            WorkerError::DownloadFailed {
                clip_id, attempts, ..
            } => {
                assert_eq!(clip_id, "gone");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("gone.mp4").exists());
    }

    #[tokio::test]
    async fn test_clean_exit_without_file_is_failure() {
        let dir = TempDir::new().unwrap();
        // `true` ignores its arguments and writes nothing
        let Ok(binary) = which::which("true") else {
            return;
        };
        let downloader = YtDlpDownloader::with_binary(binary, dir.path(), quick_retry(2));

        let err = downloader.download(&clip("empty", "")).await.unwrap_err();
        assert!(matches!(err, WorkerError::DownloadFailed { attempts: 2, .. }));
    }
}
