//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use clipclub_media::CompositionConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// SQLite job database
    pub db_path: PathBuf,
    /// Downloaded clips and compiled outputs
    pub state_dir: PathBuf,
    /// Per-channel clip catalog files (`<channel>.json`)
    pub catalog_dir: PathBuf,
    /// Where finished compilations are delivered
    pub delivery_dir: PathBuf,
    /// Idle wait between polls for pending jobs
    pub poll_interval: Duration,
    /// yt-dlp attempts per clip
    pub download_max_attempts: u32,
    /// Base delay between download attempts (doubles, capped)
    pub download_retry_delay: Duration,
    /// Return jobs left in an in-flight status to `pending` on startup
    pub requeue_interrupted: bool,
    /// Prometheus scrape port; metrics are not exported when unset
    pub metrics_port: Option<u16>,
    /// Caption font for title cards
    pub title_font: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let path = |key: &str| lookup(key).filter(|s| !s.is_empty()).map(PathBuf::from);

        let home = lookup("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let state_dir =
            path("CLIPCLUB_STATE_DIR").unwrap_or_else(|| home.join(".local/state/clipclub"));

        Self {
            db_path: path("CLIPCLUB_DB_PATH")
                .unwrap_or_else(|| home.join(".local/share/clipclub/clipclub.sqlite")),
            catalog_dir: path("CLIPCLUB_CATALOG_DIR").unwrap_or_else(|| state_dir.join("catalog")),
            delivery_dir: path("CLIPCLUB_DELIVERY_DIR")
                .unwrap_or_else(|| state_dir.join("delivered")),
            poll_interval: Duration::from_millis(parse("WORKER_POLL_INTERVAL_MS").unwrap_or(1000)),
            download_max_attempts: parse("WORKER_DOWNLOAD_MAX_ATTEMPTS")
                .map(|n| n.clamp(1, u32::MAX as u64) as u32)
                .unwrap_or(25),
            download_retry_delay: Duration::from_millis(
                parse("WORKER_DOWNLOAD_RETRY_DELAY_MS").unwrap_or(500),
            ),
            requeue_interrupted: lookup("WORKER_REQUEUE_INTERRUPTED")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            metrics_port: parse("METRICS_PORT").and_then(|p| u16::try_from(p).ok()),
            title_font: path("CLIPCLUB_TITLE_FONT"),
            state_dir,
        }
    }

    /// Scratch space for render intermediates.
    pub fn work_dir(&self) -> PathBuf {
        self.state_dir.join("work")
    }

    /// Where the compilation for `job_id` is rendered.
    pub fn output_path(&self, job_id: clipclub_models::JobId) -> PathBuf {
        self.state_dir.join(format!("compilation_{}.mp4", job_id))
    }

    /// Composition parameters for the render stage.
    pub fn composition(&self) -> CompositionConfig {
        let config = CompositionConfig::new(self.work_dir());
        match &self.title_font {
            Some(font) => config.with_font_file(font),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("HOME", "/home/clip")]);

        assert_eq!(
            config.db_path,
            PathBuf::from("/home/clip/.local/share/clipclub/clipclub.sqlite")
        );
        assert_eq!(config.state_dir, PathBuf::from("/home/clip/.local/state/clipclub"));
        assert_eq!(config.catalog_dir, config.state_dir.join("catalog"));
        assert_eq!(config.delivery_dir, config.state_dir.join("delivered"));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.download_max_attempts, 25);
        assert!(!config.requeue_interrupted);
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("CLIPCLUB_STATE_DIR", "/srv/clipclub"),
            ("WORKER_POLL_INTERVAL_MS", "250"),
            ("WORKER_DOWNLOAD_MAX_ATTEMPTS", "3"),
            ("WORKER_REQUEUE_INTERRUPTED", "true"),
            ("METRICS_PORT", "9464"),
            ("CLIPCLUB_TITLE_FONT", "/fonts/Inter.ttf"),
        ]);

        assert_eq!(config.catalog_dir, PathBuf::from("/srv/clipclub/catalog"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.download_max_attempts, 3);
        assert!(config.requeue_interrupted);
        assert_eq!(config.metrics_port, Some(9464));
        assert_eq!(
            config.composition().title_style.font_file,
            Some(PathBuf::from("/fonts/Inter.ttf"))
        );
        assert_eq!(
            config.output_path(clipclub_models::JobId(12)),
            PathBuf::from("/srv/clipclub/compilation_12.mp4")
        );
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = config(&[
            ("WORKER_POLL_INTERVAL_MS", "soon"),
            ("WORKER_DOWNLOAD_MAX_ATTEMPTS", "0"),
            ("METRICS_PORT", "70000"),
        ]);

        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.download_max_attempts, 1);
        assert!(config.metrics_port.is_none());
    }
}
