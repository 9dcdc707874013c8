//! Clip catalog: which clips a channel has, and which ones to use.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

use clipclub_models::{ClipDescriptor, SelectionMethod};

use crate::error::{WorkerError, WorkerResult};

/// A resolved channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    /// Catalog channel ID
    pub id: String,
    /// Login name the job was submitted with
    pub login: String,
}

/// Source of clip listings.
#[async_trait]
pub trait ClipCatalog: Send + Sync {
    /// Resolve a login name to a channel; fails with `ChannelNotFound`.
    async fn resolve_channel(&self, login: &str) -> WorkerResult<ChannelRef>;

    /// Clips created in `[start, end]`; fails with `NotEnoughClips` when
    /// fewer than `min_count` exist.
    async fn get_clips(
        &self,
        channel: &ChannelRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        min_count: usize,
    ) -> WorkerResult<Vec<ClipDescriptor>>;
}

/// Look-back window ending at `now`.
pub fn date_window(now: DateTime<Utc>, range_days: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - Duration::days(i64::from(range_days)), now)
}

/// Pick `count` clips.
///
/// `Popular` takes the most viewed (ties keep catalog order); `Random`
/// takes a uniform sample.
pub fn select_clips<R: Rng + ?Sized>(
    mut clips: Vec<ClipDescriptor>,
    count: usize,
    method: SelectionMethod,
    rng: &mut R,
) -> Vec<ClipDescriptor> {
    match method {
        SelectionMethod::Popular => clips.sort_by(|a, b| b.views.cmp(&a.views)),
        SelectionMethod::Random => clips.shuffle(rng),
    }
    clips.truncate(count);
    clips
}

/// On-disk catalog file for one channel.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelFile {
    id: String,
    #[serde(default)]
    clips: Vec<ClipDescriptor>,
}

/// Catalog backed by `<dir>/<login>.json` files.
#[derive(Debug, Clone)]
pub struct JsonClipCatalog {
    dir: PathBuf,
}

impl JsonClipCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, login: &str) -> Option<PathBuf> {
        let valid = !login.is_empty()
            && login
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| self.dir.join(format!("{}.json", login.to_ascii_lowercase())))
    }

    async fn load(&self, login: &str) -> WorkerResult<ChannelFile> {
        let path = self
            .file_for(login)
            .ok_or_else(|| WorkerError::ChannelNotFound(login.to_string()))?;

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkerError::ChannelNotFound(login.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw)
            .map_err(|e| WorkerError::Catalog(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl ClipCatalog for JsonClipCatalog {
    async fn resolve_channel(&self, login: &str) -> WorkerResult<ChannelRef> {
        let file = self.load(login).await?;
        Ok(ChannelRef {
            id: file.id,
            login: login.to_string(),
        })
    }

    async fn get_clips(
        &self,
        channel: &ChannelRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        min_count: usize,
    ) -> WorkerResult<Vec<ClipDescriptor>> {
        let file = self.load(&channel.login).await?;
        let clips: Vec<ClipDescriptor> = file
            .clips
            .into_iter()
            .filter(|c| c.creation_date >= start && c.creation_date <= end)
            .collect();

        debug!(channel = %channel.login, found = clips.len(), "Listed clips");

        if clips.len() < min_count {
            return Err(WorkerError::NotEnoughClips {
                channel: channel.login.clone(),
                found: clips.len(),
                required: min_count,
            });
        }
        Ok(clips)
    }
}
