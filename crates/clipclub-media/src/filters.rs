//! FFmpeg filter graph generation for crossfade compilations.
//!
//! A compilation of N clips is a left-associated chain of N-1 crossfades:
//!
//! ```text
//! [v0][v1]xfade=...[x0];[x0][v2]xfade=...[x1];...[x{n-3}][v{n-1}]xfade=...[video];
//! ```
//!
//! Every statement is `[in]op=args[out];`. Labels are unique; the last edge
//! writes the reserved terminal label.

use std::fmt::Write as _;

use clipclub_models::ManifestEntry;

use crate::error::GraphError;

/// Terminal label of a video crossfade graph.
pub const VIDEO_LABEL: &str = "video";

/// Terminal label of an audio crossfade graph.
pub const AUDIO_LABEL: &str = "audio";

/// Crossfade filter and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum FadeKind {
    /// `xfade` with a named transition (e.g. `diagtr`, `fade`)
    Video { transition: String },
    /// `acrossfade` with per-side curves
    Audio { curves: AudioCurves },
}

/// Fade curves for `acrossfade`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCurves {
    pub curve1: String,
    pub curve2: String,
}

impl AudioCurves {
    pub fn new(curve1: impl Into<String>, curve2: impl Into<String>) -> Self {
        Self {
            curve1: curve1.into(),
            curve2: curve2.into(),
        }
    }
}

impl Default for AudioCurves {
    fn default() -> Self {
        Self::new("tri", "tri")
    }
}

/// One crossfade between two labelled streams.
#[derive(Debug, Clone, PartialEq)]
pub struct FadeEdge {
    pub input_a: String,
    pub input_b: String,
    pub kind: FadeKind,
    /// Crossfade duration in seconds
    pub duration: f64,
    /// Start of the crossfade on the accumulated timeline
    pub offset_seconds: f64,
    pub output_label: String,
}

impl FadeEdge {
    fn write_statement(&self, out: &mut String) {
        // Writing into a String cannot fail
        let _ = match &self.kind {
            FadeKind::Video { transition } => write!(
                out,
                "[{}][{}]xfade=transition={}:duration={}:offset={:.2}[{}];",
                self.input_a,
                self.input_b,
                transition,
                self.duration,
                self.offset_seconds,
                self.output_label
            ),
            FadeKind::Audio { curves } => write!(
                out,
                "[{}][{}]acrossfade=duration={}:curve1={}:curve2={}[{}];",
                self.input_a, self.input_b, self.duration, curves.curve1, curves.curve2, self.output_label
            ),
        };
    }
}

/// Plan the crossfade chain for clips of the given durations.
///
/// `inputs[i]` is the normalized label of clip `i`. Edge `k` starts at the
/// summed duration of clips `0..=k` minus `k + 1` crossfades.
fn plan_edges(
    durations: &[f64],
    inputs: &[String],
    crossfade: f64,
    kind: &FadeKind,
    terminal: &str,
) -> Result<Vec<FadeEdge>, GraphError> {
    debug_assert_eq!(durations.len(), inputs.len());
    if durations.len() < 2 {
        return Err(GraphError::InsufficientClips {
            count: durations.len(),
        });
    }

    let last = durations.len() - 2;
    let mut edges = Vec::with_capacity(durations.len() - 1);
    let mut offset = 0.0;
    let mut previous = inputs[0].clone();

    for (k, duration) in durations[..durations.len() - 1].iter().enumerate() {
        debug_assert!(*duration > crossfade);
        offset += duration - crossfade;
        let output_label = if k == last {
            terminal.to_string()
        } else {
            format!("x{}", k)
        };

        edges.push(FadeEdge {
            input_a: previous,
            input_b: inputs[k + 1].clone(),
            kind: kind.clone(),
            duration: crossfade,
            offset_seconds: offset,
            output_label: output_label.clone(),
        });
        previous = output_label;
    }

    Ok(edges)
}

/// Every clip must outlast the crossfade, otherwise offsets stop increasing.
fn check_entries(entries: &[ManifestEntry], crossfade: f64) -> Result<(), GraphError> {
    if entries.len() < 2 {
        return Err(GraphError::InsufficientClips {
            count: entries.len(),
        });
    }
    let floor = crossfade.max(0.0);
    if let Some(bad) = entries
        .iter()
        .find(|e| !e.duration.is_finite() || e.duration <= floor)
    {
        return Err(GraphError::InvalidDuration {
            file: bad.file.clone(),
            duration: bad.duration,
        });
    }
    Ok(())
}

/// Build the video crossfade graph for `entries` in manifest order.
///
/// Input `i` of the encode must be `entries[i].file`. The result ends in
/// `[video]`.
pub fn build_video_graph(
    entries: &[ManifestEntry],
    crossfade: f64,
    transition: &str,
) -> Result<String, GraphError> {
    check_entries(entries, crossfade)?;

    let mut graph = String::new();
    let mut labels = Vec::with_capacity(entries.len());
    for i in 0..entries.len() {
        let label = format!("v{}", i);
        let _ = write!(graph, "[{}]settb=AVTB[{}];", i, label);
        labels.push(label);
    }

    let durations: Vec<f64> = entries.iter().map(|e| e.duration).collect();
    let kind = FadeKind::Video {
        transition: transition.to_string(),
    };
    for edge in plan_edges(&durations, &labels, crossfade, &kind, VIDEO_LABEL)? {
        edge.write_statement(&mut graph);
    }

    Ok(graph)
}

/// Build the audio crossfade graph for `entries` in manifest order.
///
/// Each audio stream is trimmed to its clip's video duration first so the
/// audio timeline lines up with the video one. The result ends in `[audio]`.
pub fn build_audio_graph(
    entries: &[ManifestEntry],
    crossfade: f64,
    curves: &AudioCurves,
) -> Result<String, GraphError> {
    check_entries(entries, crossfade)?;

    let mut graph = String::new();
    let mut labels = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let label = format!("a{}", i);
        let _ = write!(graph, "[{}]atrim=start=0:end={}[{}];", i, entry.duration, label);
        labels.push(label);
    }

    let durations: Vec<f64> = entries.iter().map(|e| e.duration).collect();
    let kind = FadeKind::Audio {
        curves: curves.clone(),
    };
    for edge in plan_edges(&durations, &labels, crossfade, &kind, AUDIO_LABEL)? {
        edge.write_statement(&mut graph);
    }

    Ok(graph)
}

/// Scale into a `width`x`height` frame keeping aspect ratio, padding the rest.
pub fn scale_to_fit(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
        w = width,
        h = height
    )
}

/// Escape a path for use inside a single-quoted filter argument.
pub fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
}

/// One `[in]...op=args[out]` statement of a filter graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStatement {
    pub inputs: Vec<String>,
    /// Filter chain between the labels, e.g. `xfade=transition=fade:duration=1`
    pub body: String,
    pub outputs: Vec<String>,
}

impl GraphStatement {
    /// Name of the first filter in the chain.
    pub fn filter_name(&self) -> &str {
        let end = self
            .body
            .find(|c| c == '=' || c == ',')
            .unwrap_or(self.body.len());
        &self.body[..end]
    }

    /// Value of `key=` in the first filter's arguments.
    pub fn arg(&self, key: &str) -> Option<&str> {
        let (_, args) = self.body.split_once('=')?;
        let args = args.split(',').next()?;
        args.split(':').find_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

/// Split a filter graph into its statements.
///
/// Semicolons inside single-quoted arguments do not end a statement.
pub fn parse_graph(graph: &str) -> Vec<GraphStatement> {
    split_statements(graph)
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_statement(s.trim()))
        .collect()
}

fn split_statements(graph: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (idx, c) in graph.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '\'' => quoted = !quoted,
            ';' if !quoted => {
                statements.push(&graph[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    statements.push(&graph[start..]);
    statements
}

fn parse_statement(statement: &str) -> GraphStatement {
    let mut rest = statement;

    let mut inputs = Vec::new();
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(end) = stripped.find(']') else { break };
        inputs.push(stripped[..end].to_string());
        rest = &stripped[end + 1..];
    }

    let mut outputs = Vec::new();
    while let Some(stripped) = rest.strip_suffix(']') {
        let Some(start) = stripped.rfind('[') else { break };
        outputs.insert(0, stripped[start + 1..].to_string());
        rest = &stripped[..start];
    }

    GraphStatement {
        inputs,
        body: rest.to_string(),
        outputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entries(durations: &[f64]) -> Vec<ManifestEntry> {
        durations
            .iter()
            .enumerate()
            .map(|(i, &duration)| ManifestEntry {
                file: PathBuf::from(format!("/clips/{}.mp4", i)),
                text: String::new(),
                width: 1920,
                height: 1080,
                duration,
                fps: 60.0,
            })
            .collect()
    }

    fn offsets(graph: &str) -> Vec<String> {
        parse_graph(graph)
            .iter()
            .filter_map(|s| s.arg("offset").map(str::to_string))
            .collect()
    }

    #[test]
    fn test_two_clip_video_graph() {
        let graph = build_video_graph(&entries(&[15.0, 8.0]), 0.2, "diagtr").unwrap();
        assert_eq!(
            graph,
            "[0]settb=AVTB[v0];[1]settb=AVTB[v1];\
             [v0][v1]xfade=transition=diagtr:duration=0.2:offset=14.80[video];"
        );
    }

    #[test]
    fn test_three_clip_offsets() {
        let graph = build_video_graph(&entries(&[5.0, 3.0, 8.0]), 0.2, "diagtr").unwrap();
        assert_eq!(offsets(&graph), vec!["4.80", "7.60"]);
        assert!(graph.ends_with("[x0][v2]xfade=transition=diagtr:duration=0.2:offset=7.60[video];"));
    }

    #[test]
    fn test_offsets_strictly_increase() {
        let graph = build_video_graph(&entries(&[5.0, 5.0, 5.0, 5.0]), 0.2, "diagtr").unwrap();
        assert_eq!(offsets(&graph), vec!["4.80", "9.60", "14.40"]);
    }

    #[test]
    fn test_audio_graph_literal() {
        let graph = build_audio_graph(&entries(&[5.0, 5.0]), 0.2, &AudioCurves::default()).unwrap();
        assert_eq!(
            graph,
            "[0]atrim=start=0:end=5[a0];[1]atrim=start=0:end=5[a1];\
             [a0][a1]acrossfade=duration=0.2:curve1=tri:curve2=tri[audio];"
        );
    }

    #[test]
    fn test_single_clip_fails_fast() {
        assert_eq!(
            build_video_graph(&entries(&[12.0]), 0.2, "diagtr"),
            Err(GraphError::InsufficientClips { count: 1 })
        );
        assert_eq!(
            build_audio_graph(&[], 0.2, &AudioCurves::default()),
            Err(GraphError::InsufficientClips { count: 0 })
        );
    }

    #[test]
    fn test_zero_duration_rejected() {
        let err = build_video_graph(&entries(&[5.0, 0.0]), 0.2, "diagtr").unwrap_err();
        assert!(matches!(err, GraphError::InvalidDuration { duration, .. } if duration == 0.0));
    }

    #[test]
    fn test_clip_not_longer_than_crossfade_rejected() {
        let err = build_video_graph(&entries(&[5.0, 0.5, 5.0]), 1.0, "fade").unwrap_err();
        assert!(matches!(err, GraphError::InvalidDuration { duration, .. } if duration == 0.5));

        // Exactly the crossfade length would repeat the previous offset
        let err = build_audio_graph(&entries(&[5.0, 0.2, 5.0]), 0.2, &AudioCurves::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidDuration { .. }));

        // The same clip is fine under a shorter crossfade
        let graph = build_video_graph(&entries(&[5.0, 0.5, 5.0]), 0.2, "diagtr").unwrap();
        assert_eq!(offsets(&graph), vec!["4.80", "5.10"]);
    }

    #[test]
    fn test_graph_round_trip_recovers_chain() {
        let n = 6;
        let graph = build_video_graph(&entries(&vec![10.0; n]), 1.0, "fade").unwrap();
        let statements = parse_graph(&graph);

        let normalize: Vec<_> = statements
            .iter()
            .filter(|s| s.filter_name() == "settb")
            .collect();
        let fades: Vec<_> = statements
            .iter()
            .filter(|s| s.filter_name() == "xfade")
            .collect();
        assert_eq!(normalize.len(), n);
        assert_eq!(fades.len(), n - 1);

        // Each edge consumes the previous edge's output
        for pair in fades.windows(2) {
            assert_eq!(pair[1].inputs[0], pair[0].outputs[0]);
        }
        assert_eq!(fades[0].inputs, vec!["v0", "v1"]);
        assert_eq!(fades.last().unwrap().outputs, vec![VIDEO_LABEL]);

        let mut labels: Vec<&String> = statements.iter().flat_map(|s| s.outputs.iter()).collect();
        let total = labels.len();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), total, "output labels must be unique");
    }

    #[test]
    fn test_parse_graph_respects_quotes() {
        let statements = parse_graph("color=c=black[base];[base]drawtext=textfile='/tmp/a;b.txt'[out];");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].inputs.is_empty());
        assert_eq!(statements[1].inputs, vec!["base"]);
        assert_eq!(statements[1].outputs, vec!["out"]);
        assert_eq!(statements[1].filter_name(), "drawtext");
    }

    #[test]
    fn test_scale_to_fit() {
        assert_eq!(
            scale_to_fit(1280, 720),
            "scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2,setsar=1"
        );
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path("/tmp/it's:here"), "/tmp/it\\'s\\:here");
    }
}
