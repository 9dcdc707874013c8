//! Manifest construction from downloaded clips.

use std::path::Path;

use clipclub_models::{caption_text, ClipDescriptor, ManifestEntry};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::probe::{ProbeResult, Prober};

/// Combine a clip, its local file and its probe into a manifest entry.
pub fn manifest_entry(clip: &ClipDescriptor, file: &Path, probe: &ProbeResult) -> ManifestEntry {
    ManifestEntry {
        file: file.to_path_buf(),
        text: caption_text(clip),
        width: probe.width,
        height: probe.height,
        duration: probe.duration_seconds,
        fps: probe.fps,
    }
}

/// Probe every downloaded clip and build the manifest in clip order.
///
/// Clips without a local file are an error.
pub async fn build_manifest(
    prober: &dyn Prober,
    clips: &[ClipDescriptor],
) -> MediaResult<Vec<ManifestEntry>> {
    let mut manifest = Vec::with_capacity(clips.len());

    for clip in clips {
        let file = clip.source_file_path.as_deref().ok_or_else(|| {
            MediaError::InvalidVideo(format!("clip {} has not been downloaded", clip.id))
        })?;
        let probe = prober.probe(file).await?;
        debug!(
            clip_id = %clip.id,
            width = probe.width,
            height = probe.height,
            duration = probe.duration_seconds,
            fps = probe.fps,
            "Probed clip"
        );
        manifest.push(manifest_entry(clip, file, &probe));
    }

    Ok(manifest)
}
