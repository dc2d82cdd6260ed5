//! Asset discovery: folder scanning, random picks and concurrent probing.
use futures::stream::{self, StreamExt};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::encoder::Encoder;
use crate::error::Result;
use crate::model::MediaSegment;

pub const CLIP_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Regular files directly inside `dir` matching `extensions`, sorted by name.
/// A missing directory yields an empty list.
pub async fn scan_folder(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %dir.display(), "asset folder does not exist");
            return Ok(Vec::new());
        }
        Err(err) => return Err(err.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Explicit files win over the folder; both are filtered by extension.
pub async fn resolve_files(
    explicit: &[PathBuf],
    folder: Option<&Path>,
    extensions: &[&str],
) -> Result<Vec<PathBuf>> {
    if !explicit.is_empty() {
        return Ok(explicit
            .iter()
            .filter(|p| has_extension(p, extensions))
            .cloned()
            .collect());
    }
    match folder {
        Some(dir) => scan_folder(dir, extensions).await,
        None => Ok(Vec::new()),
    }
}

pub fn pick<'a, R>(files: &'a [PathBuf], rng: &mut R) -> Option<&'a PathBuf>
where
    R: Rng + ?Sized,
{
    files.choose(rng)
}

/// Probe `files` with at most `concurrency` probes in flight. Files that fail
/// to probe are logged and left out of the pool.
pub async fn probe_pool(
    encoder: &dyn Encoder,
    files: Vec<PathBuf>,
    concurrency: usize,
) -> Vec<MediaSegment> {
    stream::iter(files)
        .map(|path| async move {
            match encoder.probe(&path).await {
                Ok(probe) => Some(MediaSegment::new(path, probe.duration, probe.has_audio)),
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unprobeable clip");
                    None
                }
            }
        })
        .buffered(concurrency.max(1))
        .filter_map(|segment| async move { segment })
        .collect()
        .await
}
