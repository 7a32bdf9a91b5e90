//! Media asset conversion
//!
//! Sources under the `.assets` tree are converted to web-friendly formats
//! with an external ffmpeg binary: images to AVIF, video to WebM, audio to
//! MP3. Anything else (fonts, PDFs, favicons) is copied through verbatim.
//! Output files mirror the source layout under the assets output root and
//! are rebuilt only when the source is newer (incremental build).

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::process::launcher;

use super::ConvertError;

/// Broad media classification by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    /// Classify a source file; `None` means not a convertible media file
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tiff" => Some(Self::Image),
            "mp4" | "mov" | "mkv" | "avi" | "webm" => Some(Self::Video),
            "mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Target container/codec extension
    #[must_use]
    pub fn target_extension(self) -> &'static str {
        match self {
            Self::Image => "avif",
            Self::Video => "webm",
            Self::Audio => "mp3",
        }
    }
}

/// What a media task did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOutcome {
    /// Derived asset (re)built through the converter
    Converted,

    /// Non-media file copied through verbatim
    Copied,

    /// Output exists and is newer than the source
    UpToDate,

    /// Source gone, output removed
    Removed,

    /// Source outside the assets tree
    Skipped,
}

/// Output path for a source: same relative location under the output
/// root, extension swapped to the target format for convertible media
/// and kept as-is for files that are copied through.
#[must_use]
pub fn output_path(assets_root: &Path, output_root: &Path, source: &Path) -> Option<PathBuf> {
    let rel = source.strip_prefix(assets_root).ok()?;
    Some(match MediaKind::from_path(source) {
        Some(kind) => output_root.join(rel).with_extension(kind.target_extension()),
        None => output_root.join(rel),
    })
}

/// Process one media source end to end
pub async fn process_media(
    assets_root: &Path,
    output_root: &Path,
    source: &Path,
    ffmpeg: &Path,
) -> Result<MediaOutcome, ConvertError> {
    let Some(target) = output_path(assets_root, output_root, source) else {
        return Ok(MediaOutcome::Skipped);
    };

    if !source.exists() {
        if target.exists() {
            tokio::fs::remove_file(&target).await?;
            tracing::info!(target = %target.display(), "Orphaned asset removed");
        }
        return Ok(MediaOutcome::Removed);
    }

    if is_up_to_date(source, &target) {
        tracing::debug!(source = %source.display(), "Output up to date");
        return Ok(MediaOutcome::UpToDate);
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if MediaKind::from_path(source).is_none() {
        tokio::fs::copy(source, &target).await?;
        tracing::info!(source = %source.display(), target = %target.display(), "Static asset copied");
        return Ok(MediaOutcome::Copied);
    }

    // Convert into a temp file so a failed run never clobbers the prior asset
    let partial = target.with_extension("partial");
    let args: Vec<&OsStr> = vec![
        OsStr::new("-y"),
        OsStr::new("-loglevel"),
        OsStr::new("error"),
        OsStr::new("-i"),
        source.as_os_str(),
        OsStr::new("-f"),
        OsStr::new(container_format(&target)),
        partial.as_os_str(),
    ];
    let output = launcher::run_once("ffmpeg", ffmpeg, args, None)
        .await
        .map_err(|e| ConvertError::MediaConverterFailed {
            path: source.display().to_string(),
            detail: format!("failed to launch converter: {e}"),
        })?;

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(ConvertError::MediaConverterFailed {
            path: source.display().to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    tokio::fs::rename(&partial, &target).await?;
    tracing::info!(source = %source.display(), target = %target.display(), "Asset converted");
    Ok(MediaOutcome::Converted)
}

/// Remove output files whose source no longer exists.
///
/// Walks the sources once to build the expected output set (derived
/// media and static copies alike), then deletes anything else found
/// under the output root. Returns the removal count.
pub fn cleanup_orphans(assets_root: &Path, output_root: &Path) -> std::io::Result<usize> {
    if !output_root.is_dir() {
        return Ok(0);
    }

    let mut expected = std::collections::HashSet::new();
    for source in walk_files(assets_root)? {
        if let Some(target) = output_path(assets_root, output_root, &source) {
            expected.insert(target);
        }
    }

    let mut removed = 0;
    for derived in walk_files(output_root)? {
        if !expected.contains(&derived) {
            std::fs::remove_file(&derived)?;
            tracing::info!(path = %derived.display(), "Orphaned asset removed");
            removed += 1;
        }
    }
    Ok(removed)
}

/// All regular files under `root`, in no particular order
pub fn walk_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

fn is_up_to_date(source: &Path, target: &Path) -> bool {
    let source_mtime = mtime(source);
    let target_mtime = mtime(target);
    match (source_mtime, target_mtime) {
        (Some(src), Some(dst)) => dst >= src,
        _ => false,
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn container_format(target: &Path) -> &'static str {
    match target.extension().and_then(|e| e.to_str()) {
        Some("avif") => "avif",
        Some("webm") => "webm",
        _ => "mp3",
    }
}
