//! Compilation rendering pipeline.
//!
//! [`CompositionOrchestrator::combine`] turns a manifest into one finished
//! video by walking [`RenderStage::ORDER`]. Every stage is a single encode,
//! awaited before the next one starts; a failed encode aborts the run with
//! an error tagged by its stage. Intermediates live in a scratch directory
//! that is removed when the run ends.

use metrics::histogram;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use clipclub_models::ManifestEntry;

use crate::command::{Encoder, FfmpegCommand};
use crate::error::{CompositionError, CompositionResult, GraphError, MediaError, RenderStage};
use crate::filters::{
    build_audio_graph, build_video_graph, scale_to_fit, AudioCurves, AUDIO_LABEL, VIDEO_LABEL,
};
use crate::fs_utils::{move_file, remove_if_present, temp_sibling};
use crate::title::{title_card_command, TitleStyle};

/// Histogram of per-stage wall time, labelled by `stage`.
pub const STAGE_DURATION_SECONDS: &str = "clipclub_stage_duration_seconds";

/// Frame rates closer than this are treated as equal.
const FPS_TOLERANCE: f64 = 0.01;

/// Composition parameters.
#[derive(Debug, Clone)]
pub struct CompositionConfig {
    /// Root for per-run scratch directories
    pub work_dir: PathBuf,
    pub video_crossfade: f64,
    pub video_transition: String,
    pub audio_crossfade: f64,
    pub audio_curves: AudioCurves,
    pub title_crossfade: f64,
    pub title_transition: String,
    pub title_style: TitleStyle,
    pub video_codec: String,
    pub audio_codec: String,
    pub pixel_format: String,
    pub crf: u8,
    pub preset: String,
}

impl CompositionConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            video_crossfade: 0.2,
            video_transition: "diagtr".to_string(),
            audio_crossfade: 0.2,
            audio_curves: AudioCurves::default(),
            title_crossfade: 1.0,
            title_transition: "fade".to_string(),
            title_style: TitleStyle::default(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            pixel_format: "yuv420p".to_string(),
            crf: 20,
            preset: "veryfast".to_string(),
        }
    }

    /// Use a font file for title captions.
    pub fn with_font_file(mut self, font: impl Into<PathBuf>) -> Self {
        self.title_style.font_file = Some(font.into());
        self
    }
}

/// Frame geometry every clip is brought to before crossfading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl TargetFormat {
    fn matches(&self, entry: &ManifestEntry) -> bool {
        entry.resolution() == (self.width, self.height) && (entry.fps - self.fps).abs() < FPS_TOLERANCE
    }
}

/// Most common resolution in the manifest; ties go to the one seen first.
///
/// The frame rate is taken from the first clip with that resolution.
pub fn majority_format(entries: &[ManifestEntry]) -> Option<TargetFormat> {
    let mut counts: Vec<(&ManifestEntry, usize)> = Vec::new();
    for entry in entries {
        match counts
            .iter_mut()
            .find(|(first, _)| first.resolution() == entry.resolution())
        {
            Some((_, n)) => *n += 1,
            None => counts.push((entry, 1)),
        }
    }

    counts
        .into_iter()
        .fold(None, |best: Option<(&ManifestEntry, usize)>, (entry, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((entry, n)),
        })
        .map(|(entry, _)| TargetFormat {
            width: entry.width,
            height: entry.height,
            fps: entry.fps,
        })
}

/// What a stage hands to the transition table.
enum StageOutcome {
    Advance,
    /// Manifest changed; start over from the first stage
    Restart,
}

/// Files produced by earlier stages.
#[derive(Debug, Default)]
struct Artifacts {
    title_cards: Vec<PathBuf>,
    titles: Option<PathBuf>,
    video: Option<PathBuf>,
    audio: Option<PathBuf>,
}

fn require(path: &Option<PathBuf>, stage: RenderStage) -> CompositionResult<PathBuf> {
    path.clone().ok_or_else(|| {
        CompositionError::stage(stage, MediaError::internal("previous stage produced no output"))
    })
}

/// Renders manifests into finished compilations.
pub struct CompositionOrchestrator {
    encoder: Arc<dyn Encoder>,
    config: CompositionConfig,
}

impl CompositionOrchestrator {
    pub fn new(encoder: Arc<dyn Encoder>, config: CompositionConfig) -> Self {
        Self { encoder, config }
    }

    pub fn config(&self) -> &CompositionConfig {
        &self.config
    }

    /// Render `manifest` into `output`.
    ///
    /// An existing `output` is taken as a finished render and returned
    /// without encoding anything. The final file is written under a
    /// temporary name and renamed into place.
    pub async fn combine(&self, manifest: &[ManifestEntry], output: &Path) -> CompositionResult<PathBuf> {
        if tokio::fs::try_exists(output).await.unwrap_or(false) {
            info!(output = %output.display(), "Output already rendered, skipping");
            return Ok(output.to_path_buf());
        }
        if manifest.len() < 2 {
            return Err(GraphError::InsufficientClips {
                count: manifest.len(),
            }
            .into());
        }

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(CompositionError::Workspace)?;
        let scratch = tempfile::Builder::new()
            .prefix("compose-")
            .tempdir_in(&self.config.work_dir)
            .map_err(CompositionError::Workspace)?;

        let result = self.run_stages(manifest.to_vec(), scratch.path(), output).await;

        if let Err(e) = scratch.close() {
            warn!(error = %e, "Failed to remove composition scratch directory");
        }

        result.map(|()| output.to_path_buf())
    }

    async fn run_stages(
        &self,
        mut manifest: Vec<ManifestEntry>,
        scratch: &Path,
        output: &Path,
    ) -> CompositionResult<()> {
        let mut artifacts = Artifacts::default();
        let mut stage = RenderStage::Reconcile;

        loop {
            let started = Instant::now();
            let outcome = match stage {
                RenderStage::Reconcile => self.reconcile(&mut manifest, scratch).await?,
                RenderStage::RenderTitles => {
                    artifacts.title_cards = self.render_titles(&manifest, scratch).await?;
                    StageOutcome::Advance
                }
                RenderStage::RenderTitlesMerge => {
                    artifacts.titles = Some(
                        self.merge_titles(&manifest, &artifacts.title_cards, scratch)
                            .await?,
                    );
                    StageOutcome::Advance
                }
                RenderStage::RenderVideo => {
                    artifacts.video = Some(self.render_video(&manifest, scratch).await?);
                    StageOutcome::Advance
                }
                RenderStage::RenderAudio => {
                    artifacts.audio = Some(self.render_audio(&manifest, scratch).await?);
                    StageOutcome::Advance
                }
                RenderStage::RenderCombine => {
                    let video = require(&artifacts.video, stage)?;
                    let titles = require(&artifacts.titles, stage)?;
                    let audio = require(&artifacts.audio, stage)?;
                    self.render_combine(&video, &titles, &audio, output).await?;
                    StageOutcome::Advance
                }
            };

            let elapsed = started.elapsed().as_secs_f64();
            histogram!(STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(elapsed);
            info!(stage = %stage, elapsed_secs = elapsed, "Stage finished");

            stage = match outcome {
                StageOutcome::Restart => RenderStage::Reconcile,
                StageOutcome::Advance => match stage.next() {
                    Some(next) => next,
                    None => return Ok(()),
                },
            };
        }
    }

    async fn encode(&self, stage: RenderStage, cmd: FfmpegCommand) -> CompositionResult<()> {
        self.encoder
            .encode(&cmd)
            .await
            .map_err(|e| CompositionError::stage(stage, e))
    }

    /// Bring every clip to the majority resolution and frame rate.
    async fn reconcile(
        &self,
        manifest: &mut [ManifestEntry],
        scratch: &Path,
    ) -> CompositionResult<StageOutcome> {
        let Some(target) = majority_format(manifest) else {
            return Ok(StageOutcome::Advance);
        };
        if manifest.iter().all(|e| target.matches(e)) {
            return Ok(StageOutcome::Advance);
        }

        for (i, entry) in manifest.iter_mut().enumerate() {
            if target.matches(entry) {
                continue;
            }

            let output = scratch.join(format!("reconciled_{}.mp4", i));
            info!(
                file = %entry.file.display(),
                from = ?entry.resolution(),
                to = ?(target.width, target.height),
                "Rescaling clip to majority resolution"
            );

            let filter = format!(
                "[0:v]{},fps={}[v];",
                scale_to_fit(target.width, target.height),
                target.fps
            );
            let cmd = FfmpegCommand::new(&output)
                .input(&entry.file)
                .filter_complex(filter)
                .map_label("v")
                .map("0:a?")
                .constant_frame_rate()
                .pixel_format(self.config.pixel_format.clone())
                .video_codec(self.config.video_codec.clone())
                .crf(self.config.crf)
                .preset(self.config.preset.clone())
                .audio_codec("copy")
                .expected_duration(entry.duration);
            self.encode(RenderStage::Reconcile, cmd).await?;

            entry.file = output;
            entry.width = target.width;
            entry.height = target.height;
            entry.fps = target.fps;
        }

        Ok(StageOutcome::Restart)
    }

    async fn render_titles(
        &self,
        manifest: &[ManifestEntry],
        scratch: &Path,
    ) -> CompositionResult<Vec<PathBuf>> {
        let stage = RenderStage::RenderTitles;
        let mut cards = Vec::with_capacity(manifest.len());

        for (i, entry) in manifest.iter().enumerate() {
            let text_file = scratch.join(format!("title_{}.txt", i));
            tokio::fs::write(&text_file, &entry.text)
                .await
                .map_err(|e| CompositionError::stage(stage, e))?;

            let output = scratch.join(format!("title_{}.mkv", i));
            let cmd = title_card_command(entry, &text_file, &output, &self.config.title_style)?;
            self.encode(stage, cmd).await?;
            cards.push(output);
        }

        Ok(cards)
    }

    async fn merge_titles(
        &self,
        manifest: &[ManifestEntry],
        cards: &[PathBuf],
        scratch: &Path,
    ) -> CompositionResult<PathBuf> {
        let card_entries: Vec<ManifestEntry> = manifest
            .iter()
            .zip(cards)
            .map(|(entry, card)| ManifestEntry {
                file: card.clone(),
                ..entry.clone()
            })
            .collect();
        let graph = build_video_graph(
            &card_entries,
            self.config.title_crossfade,
            &self.config.title_transition,
        )?;

        let output = scratch.join("titles.mkv");
        let cmd = FfmpegCommand::new(&output)
            .inputs(cards)
            .filter_complex(graph)
            .map_label(VIDEO_LABEL)
            .constant_frame_rate()
            .video_codec("ffv1")
            .pixel_format("yuva420p");
        self.encode(RenderStage::RenderTitlesMerge, cmd).await?;

        Ok(output)
    }

    async fn render_video(&self, manifest: &[ManifestEntry], scratch: &Path) -> CompositionResult<PathBuf> {
        let graph = build_video_graph(
            manifest,
            self.config.video_crossfade,
            &self.config.video_transition,
        )?;

        let output = scratch.join("video.mp4");
        let cmd = FfmpegCommand::new(&output)
            .inputs(manifest.iter().map(|e| &e.file))
            .filter_complex(graph)
            .map_label(VIDEO_LABEL)
            .constant_frame_rate()
            .pixel_format(self.config.pixel_format.clone())
            .video_codec(self.config.video_codec.clone())
            .crf(self.config.crf)
            .preset(self.config.preset.clone());
        self.encode(RenderStage::RenderVideo, cmd).await?;

        Ok(output)
    }

    async fn render_audio(&self, manifest: &[ManifestEntry], scratch: &Path) -> CompositionResult<PathBuf> {
        let graph = build_audio_graph(
            manifest,
            self.config.audio_crossfade,
            &self.config.audio_curves,
        )?;

        let output = scratch.join("audio.wav");
        let cmd = FfmpegCommand::new(&output)
            .inputs(manifest.iter().map(|e| &e.file))
            .filter_complex(graph)
            .map_label(AUDIO_LABEL)
            .constant_frame_rate()
            .audio_codec("pcm_s16le");
        self.encode(RenderStage::RenderAudio, cmd).await?;

        Ok(output)
    }

    async fn render_combine(
        &self,
        video: &Path,
        titles: &Path,
        audio: &Path,
        output: &Path,
    ) -> CompositionResult<()> {
        let stage = RenderStage::RenderCombine;
        let partial = temp_sibling(output);

        let cmd = FfmpegCommand::new(&partial)
            .input(video)
            .input(titles)
            .input(audio)
            .filter_complex(
                "[1:v]format=yuva420p[titles];\
                 [0:v][titles]overlay=x=0:y=0:format=auto:eof_action=pass[final];",
            )
            .map_label("final")
            .map("2:a")
            .constant_frame_rate()
            .pixel_format(self.config.pixel_format.clone())
            .video_codec(self.config.video_codec.clone())
            .crf(self.config.crf)
            .preset(self.config.preset.clone())
            .audio_codec(self.config.audio_codec.clone())
            .output_args(["-movflags", "+faststart"]);

        if let Err(e) = self.encode(stage, cmd).await {
            remove_if_present(&partial).await;
            return Err(e);
        }
        if let Err(e) = move_file(&partial, output).await {
            remove_if_present(&partial).await;
            return Err(CompositionError::stage(stage, e));
        }

        Ok(())
    }
}
