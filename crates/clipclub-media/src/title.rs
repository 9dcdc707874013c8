//! Title card overlays.
//!
//! Each clip gets a standalone alpha-channel video of the clip's size, rate
//! and length: a translucent bar slides up from below the center while the
//! caption rides on it, both held for the first few seconds, then the card
//! fades back to a fully transparent frame. The graph is built entirely from
//! `color` sources so the encode takes no inputs.

use std::path::{Path, PathBuf};

use clipclub_models::ManifestEntry;

use crate::command::FfmpegCommand;
use crate::error::GraphError;
use crate::filters::escape_filter_path;

/// Output label of a title card graph.
pub const TITLE_LABEL: &str = "title";

/// Title card timing and look.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleStyle {
    /// How long the bar and caption stay up (clamped to the clip length)
    pub hold_seconds: f64,
    /// Duration of the slide-in animation
    pub ease_seconds: f64,
    /// Fade back to transparent
    pub fade_seconds: f64,
    /// Bar opacity
    pub bar_opacity: f64,
    /// Caption opacity
    pub text_opacity: f64,
    /// Font for the caption; ffmpeg's default font when unset
    pub font_file: Option<PathBuf>,
}

impl Default for TitleStyle {
    fn default() -> Self {
        Self {
            hold_seconds: 6.0,
            ease_seconds: 3.0,
            fade_seconds: 1.0,
            bar_opacity: 0.5,
            text_opacity: 0.8,
            font_file: None,
        }
    }
}

/// Timeline of one card.
///
/// The bar and caption stay drawn for the whole clip; the closing xfade to
/// the blank stream is what takes them away, starting at `fade_start`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CardTiming {
    fade: f64,
    fade_start: f64,
}

impl CardTiming {
    fn new(duration: f64, style: &TitleStyle) -> Self {
        let hold = style.hold_seconds.min(duration);
        let fade = style.fade_seconds.min(duration);
        let fade_start = hold.min(duration - fade).max(0.0);
        Self { fade, fade_start }
    }
}

/// Build the title card graph for one clip.
///
/// `text_file` holds the caption (`entry.text`); drawtext reads it from disk
/// so the caption needs no escaping. The graph ends in `[title]`.
pub fn build_title_card_graph(
    entry: &ManifestEntry,
    text_file: &Path,
    style: &TitleStyle,
) -> Result<String, GraphError> {
    if !entry.duration.is_finite() || entry.duration <= 0.0 {
        return Err(GraphError::InvalidDuration {
            file: entry.file.clone(),
            duration: entry.duration,
        });
    }

    let (w, h) = entry.resolution();
    let fps = entry.fps;
    let d = entry.duration;
    let timing = CardTiming::new(d, style);

    let bar_h = (h / 4).max(2);
    // Eases from the low-center slot to the high-center slot
    let y_low = (h - bar_h) * 2 / 3;
    let y_high = (h - bar_h) / 3;
    let ease = format!(
        "{y0}+({y1}-{y0})*(1-pow(1-min(t/{e},1),3))",
        y0 = y_low,
        y1 = y_high,
        e = style.ease_seconds
    );
    let font_size = (h / 27).max(8);

    let font = style
        .font_file
        .as_ref()
        .map(|f| format!(":fontfile='{}'", escape_filter_path(&f.to_string_lossy())))
        .unwrap_or_default();

    let blank_duration = d - timing.fade_start;

    Ok(format!(
        "color=c=black@0.0:s={w}x{h}:r={fps}:d={d},format=yuva420p[base];\
         color=c=black@0.0:s={w}x{h}:r={fps}:d={blank},format=yuva420p[blank];\
         color=c=black@{bar_alpha}:s={w}x{bar_h}:r={fps}:d={d},format=yuva420p[bar];\
         [base][bar]overlay=x=0:y='{ease}':eval=frame:format=auto[barred];\
         [barred]drawtext=textfile='{text}'{font}:fontsize={font_size}:fontcolor=white:alpha={text_alpha}:\
         line_spacing={spacing}:x=(w-text_w)/2:y='{ease}+({bar_h}-text_h)/2'[card];\
         [card][blank]xfade=transition=fade:duration={fade}:offset={fade_start:.2}[{out}];",
        w = w,
        h = h,
        fps = fps,
        d = d,
        blank = blank_duration,
        bar_alpha = style.bar_opacity,
        bar_h = bar_h,
        ease = ease,
        text = escape_filter_path(&text_file.to_string_lossy()),
        font = font,
        font_size = font_size,
        text_alpha = style.text_opacity,
        spacing = font_size / 3,
        fade = timing.fade,
        fade_start = timing.fade_start,
        out = TITLE_LABEL,
    ))
}

/// Encode command for one title card.
///
/// Cards keep their alpha channel, so they are written losslessly as FFV1
/// in Matroska.
pub fn title_card_command(
    entry: &ManifestEntry,
    text_file: &Path,
    output: &Path,
    style: &TitleStyle,
) -> Result<FfmpegCommand, GraphError> {
    let graph = build_title_card_graph(entry, text_file, style)?;
    Ok(FfmpegCommand::new(output)
        .filter_complex(graph)
        .map_label(TITLE_LABEL)
        .constant_frame_rate()
        .video_codec("ffv1")
        .pixel_format("yuva420p")
        .expected_duration(entry.duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::parse_graph;

    fn entry(duration: f64) -> ManifestEntry {
        ManifestEntry {
            file: PathBuf::from("/clips/a.mp4"),
            text: "Title\nClipped by someone on May 1, 2023\n10 views".into(),
            width: 1920,
            height: 1080,
            duration,
            fps: 30.0,
        }
    }

    #[test]
    fn test_title_card_for_long_clip() {
        let graph =
            build_title_card_graph(&entry(15.0), Path::new("/work/0.txt"), &TitleStyle::default()).unwrap();

        assert!(graph.contains("s=1920x1080:r=30:d=15,"));
        assert!(graph.contains("color=c=black@0.5:s=1920x270"));
        assert!(graph.contains("textfile='/work/0.txt'"));
        assert!(graph.contains("alpha=0.8"));
        assert!(graph.ends_with("[card][blank]xfade=transition=fade:duration=1:offset=6.00[title];"));

        // Blank tail covers the rest of the clip
        assert!(graph.contains("d=9,format=yuva420p[blank]"));
    }

    #[test]
    fn test_title_card_for_short_clip() {
        let graph =
            build_title_card_graph(&entry(4.0), Path::new("/work/0.txt"), &TitleStyle::default()).unwrap();

        assert!(graph.contains("xfade=transition=fade:duration=1:offset=3.00[title]"));
        assert!(graph.contains("d=1,format=yuva420p[blank]"));
    }

    /// Latest time the card content is drawn, if a statement bounds it.
    fn content_cutoff(graph: &str) -> Option<f64> {
        parse_graph(graph)
            .iter()
            .filter(|s| s.outputs.iter().any(|o| o == "barred" || o == "card"))
            .filter_map(|s| {
                let (_, rest) = s.body.split_once("enable='lt(t,")?;
                rest.split(')').next()?.parse::<f64>().ok()
            })
            .reduce(f64::min)
    }

    fn fade_window(graph: &str) -> (f64, f64) {
        let statements = parse_graph(graph);
        let fade = statements
            .iter()
            .find(|s| s.filter_name() == "xfade")
            .unwrap();
        let start: f64 = fade.arg("offset").unwrap().parse().unwrap();
        let duration: f64 = fade.arg("duration").unwrap().parse().unwrap();
        (start, start + duration)
    }

    #[test]
    fn test_caption_stays_drawn_through_fade() {
        for duration in [15.0, 7.0, 6.5, 4.0, 0.8] {
            let graph = build_title_card_graph(
                &entry(duration),
                Path::new("/work/0.txt"),
                &TitleStyle::default(),
            )
            .unwrap();
            let (_, fade_end) = fade_window(&graph);

            if let Some(cutoff) = content_cutoff(&graph) {
                assert!(
                    cutoff >= fade_end,
                    "{}s clip: content cut at {} before fade ends at {}",
                    duration,
                    cutoff,
                    fade_end
                );
            }
        }
    }

    #[test]
    fn test_fade_starts_at_hold_for_long_clips() {
        let graph =
            build_title_card_graph(&entry(15.0), Path::new("/work/0.txt"), &TitleStyle::default()).unwrap();
        assert_eq!(fade_window(&graph), (6.0, 7.0));
        assert!(!graph.contains("enable="));
    }

    #[test]
    fn test_title_card_rejects_bad_duration() {
        for duration in [0.0, -1.0, f64::NAN] {
            let err = build_title_card_graph(&entry(duration), Path::new("/t.txt"), &TitleStyle::default())
                .unwrap_err();
            assert!(matches!(err, GraphError::InvalidDuration { .. }));
        }
    }

    #[test]
    fn test_title_card_graph_is_well_formed() {
        let style = TitleStyle {
            font_file: Some(PathBuf::from("/fonts/Inter Bold.ttf")),
            ..Default::default()
        };
        let graph = build_title_card_graph(&entry(12.5), Path::new("/work/1.txt"), &style).unwrap();
        let statements = parse_graph(&graph);

        assert_eq!(statements.len(), 6);
        assert_eq!(statements[3].inputs, vec!["base", "bar"]);
        assert_eq!(statements[4].filter_name(), "drawtext");
        assert_eq!(statements[5].outputs, vec![TITLE_LABEL]);
        assert!(graph.contains(":fontfile='/fonts/Inter Bold.ttf'"));
    }

    #[test]
    fn test_title_card_command() {
        let cmd = title_card_command(
            &entry(8.0),
            Path::new("/work/0.txt"),
            Path::new("/work/title_0.mkv"),
            &TitleStyle::default(),
        )
        .unwrap();

        let args = cmd.build_args();
        assert_eq!(cmd.input_paths().count(), 0);
        assert!(args.windows(2).any(|w| w == ["-c:v", "ffv1"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuva420p"]));
        assert!(args.windows(2).any(|w| w == ["-map", "[title]"]));
    }
}
