//! ffmpeg-backed assembly of clip selections into finished videos.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{GeneratedArtifact, MediaSegment, SelectionResult};

static SAFE_TEMP_ROOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[^\s'"\\]+$"#).expect("valid temp root pattern"));

/// Result of one encoder invocation. `diagnostics` is stderr as produced.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub status: Option<i32>,
    pub success: bool,
    pub diagnostics: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaProbe {
    pub duration: f64,
    pub has_audio: bool,
}

#[async_trait]
pub trait Encoder: Send + Sync {
    async fn invoke(&self, args: Vec<OsString>) -> Result<EncoderOutput>;
    async fn probe(&self, path: &Path) -> Result<MediaProbe>;
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Check both binaries answer `-version`.
    pub async fn ensure_available(&self) -> Result<()> {
        for bin in [&self.ffmpeg, &self.ffprobe] {
            let status = Command::new(bin)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await;
            match status {
                Ok(s) if s.success() => {}
                Ok(s) => {
                    return Err(CoreError::Configuration(format!(
                        "{bin} not available (exit status {s})"
                    )))
                }
                Err(e) => {
                    return Err(CoreError::Configuration(format!("{bin} not available: {e}")))
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn invoke(&self, args: Vec<OsString>) -> Result<EncoderOutput> {
        debug!(tool = %self.ffmpeg, ?args, "invoking encoder");
        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CoreError::encoding(format!("failed to spawn {}: {e}", self.ffmpeg)))?;
        Ok(EncoderOutput {
            status: output.status.code(),
            success: output.status.success(),
            diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn probe(&self, path: &Path) -> Result<MediaProbe> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CoreError::encoding(format!("failed to spawn {}: {e}", self.ffprobe)))?;

        if !output.status.success() {
            return Err(CoreError::Encoding {
                status: output.status.code(),
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Read duration and audio presence out of `ffprobe -of json` output.
pub fn parse_probe(json: &str) -> Result<MediaProbe> {
    let parsed: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| CoreError::encoding(format!("unreadable probe output: {e}")))?;
    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .ok_or_else(|| CoreError::encoding("probe reported no duration"))?;
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));
    Ok(MediaProbe {
        duration,
        has_audio,
    })
}

/// Encode parameters for a single assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyOptions {
    pub fade_in_secs: f64,
    pub fade_out_secs: f64,
    pub segment_track_volume: f64,
    pub audio_track_volume: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u32,
    pub preset: String,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            fade_in_secs: 1.0,
            fade_out_secs: 1.0,
            segment_track_volume: 0.7,
            audio_track_volume: 0.5,
            width: 1920,
            height: 1080,
            fps: 30,
            crf: 23,
            preset: "medium".into(),
        }
    }
}

/// How the joined segments and the background track are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblyPlan {
    pub duration: f64,
    pub mix_segment_audio: bool,
    pub loop_video: bool,
}

pub fn planned_duration(selection: &SelectionResult, audio_duration: f64) -> AssemblyPlan {
    let segments = selection.total_duration;
    if selection.all_have_audio() {
        AssemblyPlan {
            duration: segments.min(audio_duration),
            mix_segment_audio: true,
            loop_video: false,
        }
    } else {
        AssemblyPlan {
            duration: audio_duration,
            mix_segment_audio: false,
            loop_video: segments < audio_duration,
        }
    }
}

fn secs(value: f64) -> String {
    format!("{value:.3}")
}

/// Concat-demuxer list: one `file '<path>'` line per segment, single quotes escaped.
pub fn build_concat_list<'a>(paths: impl IntoIterator<Item = &'a Path>) -> String {
    let mut out = String::new();
    for path in paths {
        let escaped = path.to_string_lossy().replace('\'', r"'\''");
        out.push_str("file '");
        out.push_str(&escaped);
        out.push_str("'\n");
    }
    out
}

/// Filter graph producing `[vout]` and `[aout]` from input 0 (joined segments)
/// and input 1 (background audio).
pub fn build_filter_graph(plan: &AssemblyPlan, opts: &AssemblyOptions) -> String {
    let (w, h) = (opts.width, opts.height);
    let mut video = format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={}",
        opts.fps
    );
    if opts.fade_in_secs > 0.0 {
        video.push_str(&format!(",fade=t=in:st=0:d={}", secs(opts.fade_in_secs)));
    }
    if opts.fade_out_secs > 0.0 {
        let start = (plan.duration - opts.fade_out_secs).max(0.0);
        video.push_str(&format!(
            ",fade=t=out:st={}:d={}",
            secs(start),
            secs(opts.fade_out_secs)
        ));
    }
    video.push_str("[vout]");

    let audio = if plan.mix_segment_audio {
        format!(
            "[0:a]volume={}[segaudio];[1:a]volume={}[bgaudio];[segaudio][bgaudio]amix=inputs=2:duration=shortest:dropout_transition=2[aout]",
            opts.segment_track_volume, opts.audio_track_volume
        )
    } else {
        format!("[1:a]volume={}[aout]", opts.audio_track_volume)
    };

    format!("{video};{audio}")
}

fn build_assembly_args(
    list: &Path,
    audio: &Path,
    output: &Path,
    plan: &AssemblyPlan,
    opts: &AssemblyOptions,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-hide_banner".into()];
    if plan.loop_video {
        args.extend(["-stream_loop".into(), "-1".into()]);
    }
    args.extend([
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.as_os_str().to_owned(),
        "-i".into(),
        audio.as_os_str().to_owned(),
        "-filter_complex".into(),
        build_filter_graph(plan, opts).into(),
        "-map".into(),
        "[vout]".into(),
        "-map".into(),
        "[aout]".into(),
        "-t".into(),
        secs(plan.duration).into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        opts.preset.clone().into(),
        "-crf".into(),
        opts.crf.to_string().into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-r".into(),
        opts.fps.to_string().into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "192k".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.as_os_str().to_owned(),
    ]);
    args
}

fn build_copy_concat_args(list: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.as_os_str().to_owned(),
        "-c".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.as_os_str().to_owned(),
    ]
}

/// True when `path` can be handed to the encoder verbatim.
pub fn is_safe_temp_root(path: &Path) -> bool {
    path.to_str().is_some_and(|s| SAFE_TEMP_ROOT.is_match(s))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Builds finished artifacts through an [`Encoder`], keeping every
/// intermediate file inside a scoped directory under `temp_root`.
#[derive(Clone)]
pub struct Assembler {
    encoder: Arc<dyn Encoder>,
    temp_root: PathBuf,
    output_dir: PathBuf,
}

impl Assembler {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        temp_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let temp_root = temp_root.into();
        if !is_safe_temp_root(&temp_root) {
            return Err(CoreError::Configuration(format!(
                "temp root '{}' must be free of whitespace, quotes and backslashes",
                temp_root.display()
            )));
        }
        Ok(Self {
            encoder,
            temp_root,
            output_dir: output_dir.into(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        tokio::fs::create_dir_all(&self.temp_root).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        Ok(tempfile::Builder::new()
            .prefix("assemble_")
            .tempdir_in(&self.temp_root)?)
    }

    async fn write_concat_list(&self, dir: &Path, paths: &[&Path]) -> Result<PathBuf> {
        let mut absolute_paths = Vec::with_capacity(paths.len());
        for p in paths {
            absolute_paths.push(absolute(p)?);
        }
        let list = dir.join(format!("concat_{}.txt", Uuid::new_v4()));
        tokio::fs::write(
            &list,
            build_concat_list(absolute_paths.iter().map(PathBuf::as_path)),
        )
        .await?;
        Ok(list)
    }

    async fn run_encoder(&self, args: Vec<OsString>, temp_output: &Path) -> Result<MediaProbe> {
        let output = self.encoder.invoke(args).await?;
        if !output.success {
            return Err(CoreError::Encoding {
                status: output.status,
                diagnostics: output.diagnostics,
            });
        }
        if !tokio::fs::try_exists(temp_output).await.unwrap_or(false) {
            return Err(CoreError::encoding("encoder reported success but wrote no output"));
        }
        self.encoder
            .probe(temp_output)
            .await
            .map_err(|e| CoreError::encoding(format!("malformed output: {e}")))
    }

    async fn publish_output(&self, temp_output: &Path) -> Result<PathBuf> {
        let dest = self
            .output_dir
            .join(format!("video_{}.mp4", Uuid::new_v4()));
        if tokio::fs::rename(temp_output, &dest).await.is_err() {
            // crossing filesystems
            tokio::fs::copy(temp_output, &dest).await?;
            tokio::fs::remove_file(temp_output).await?;
        }
        Ok(dest)
    }

    /// Join `selection` over `audio`, apply fades, encode, and move the verified
    /// result into the output directory.
    #[instrument(skip_all, fields(segments = selection.segments.len()))]
    pub async fn assemble(
        &self,
        selection: &SelectionResult,
        audio: &MediaSegment,
        overlay_image: Option<&Path>,
        options: &AssemblyOptions,
    ) -> Result<GeneratedArtifact> {
        if selection.segments.is_empty() {
            return Err(CoreError::EmptyPool("selection has no segments".into()));
        }
        let plan = planned_duration(selection, audio.duration);
        if !(plan.duration > 0.0) {
            return Err(CoreError::EmptyPool(format!(
                "background audio {} has no usable duration",
                audio.path.display()
            )));
        }

        let scratch = self.scratch_dir().await?;
        let paths: Vec<&Path> = selection.segments.iter().map(|s| s.path.as_path()).collect();
        let list = self.write_concat_list(scratch.path(), &paths).await?;
        let temp_output = scratch.path().join("output.mp4");
        let audio_path = absolute(&audio.path)?;

        let args = build_assembly_args(&list, &audio_path, &temp_output, &plan, options);
        let probe = self.run_encoder(args, &temp_output).await?;
        let path = self.publish_output(&temp_output).await?;
        drop(scratch);

        info!(
            path = %path.display(),
            duration = probe.duration,
            planned = plan.duration,
            mixed = plan.mix_segment_audio,
            "assembled video"
        );
        Ok(GeneratedArtifact {
            path,
            duration: probe.duration,
            selection: selection.clone(),
            cover_image: overlay_image.map(Path::to_path_buf),
        })
    }

    /// Stream-copy concatenation of already encoded artifacts.
    #[instrument(skip_all, fields(parts = parts.len()))]
    pub async fn concat(&self, parts: &[GeneratedArtifact]) -> Result<GeneratedArtifact> {
        if parts.is_empty() {
            return Err(CoreError::EmptyPool("no parts to concatenate".into()));
        }
        let scratch = self.scratch_dir().await?;
        let paths: Vec<&Path> = parts.iter().map(|p| p.path.as_path()).collect();
        let list = self.write_concat_list(scratch.path(), &paths).await?;
        let temp_output = scratch.path().join("output.mp4");

        let probe = self
            .run_encoder(build_copy_concat_args(&list, &temp_output), &temp_output)
            .await?;
        let path = self.publish_output(&temp_output).await?;
        drop(scratch);

        let mut selection = SelectionResult::default();
        for part in parts {
            selection.segments.extend(part.selection.segments.iter().cloned());
            selection.total_duration += part.selection.total_duration;
            selection.passes = selection.passes.max(part.selection.passes);
        }
        info!(path = %path.display(), duration = probe.duration, "concatenated parts");
        Ok(GeneratedArtifact {
            path,
            duration: probe.duration,
            selection,
            cover_image: parts.iter().find_map(|p| p.cover_image.clone()),
        })
    }

    /// Remove intermediate artifacts; failures are only logged.
    pub async fn discard(&self, parts: &[GeneratedArtifact]) {
        for part in parts {
            if let Err(err) = tokio::fs::remove_file(&part.path).await {
                warn!(path = %part.path.display(), ?err, "failed to remove intermediate part");
            }
        }
    }
}
