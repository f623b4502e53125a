//! Local file frame source.
//!
//! `FileSource` reads frames from local media:
//! - `stub://...` synthetic frames (tests, demo)
//! - a directory of still images, read in file-name order
//! - a single still image (one-frame stream)
//! - a video file, when built with the ingest-file-ffmpeg feature
//!
//! The file source never fetches remote URLs.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::SyntheticSource;
use super::{FrameSource, SourceKind, SourceStats};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
    fallback_fps: f32,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Images(ImageSequenceSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// `fallback_fps` paces sources that report no usable rate.
    pub fn new(path: &str, fallback_fps: f32) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticSource::from_url(path)?)
        } else {
            let local = Path::new(path);
            if local.is_dir() || is_image_file(local) {
                FileBackend::Images(ImageSequenceSource::new(local.to_path_buf()))
            } else {
                video_backend(path)?
            }
        };
        Ok(Self {
            backend,
            fallback_fps,
        })
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn video_backend(path: &str) -> Result<FileBackend> {
    Ok(FileBackend::Ffmpeg(FfmpegFileSource::new(path)?))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn video_backend(path: &str) -> Result<FileBackend> {
    Err(anyhow!(
        "{} is not an image or image directory; video files require the ingest-file-ffmpeg feature",
        path
    ))
}

impl FrameSource for FileSource {
    fn name(&self) -> String {
        self.stats().source
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            FileBackend::Images(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::Images(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.rewind(),
            FileBackend::Images(source) => {
                source.cursor = 0;
                Ok(())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.rewind(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(source) => source.is_healthy(),
            FileBackend::Images(source) => source.last_error.is_none(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            FileBackend::Images(source) => SourceStats {
                frames_captured: source.frame_count,
                source: source.root.display().to_string(),
            },
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }

    /// Reported rate when it is plausible (0 < fps <= 120), else the fallback.
    fn nominal_fps(&self) -> Option<f32> {
        let reported = match &self.backend {
            FileBackend::Synthetic(source) => source.nominal_fps(),
            FileBackend::Images(_) => None,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.nominal_fps(),
        };
        Some(
            reported
                .filter(|fps| *fps > 0.0 && *fps <= 120.0)
                .unwrap_or(self.fallback_fps),
        )
    }

    fn release(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.release(),
            FileBackend::Images(source) => source.files.clear(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(_) => {}
        }
    }
}

/// Still images read in file-name order.
struct ImageSequenceSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            last_error: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.files = if self.root.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&self.root)
                .with_context(|| format!("read image directory {}", self.root.display()))?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| is_image_file(path))
                .collect();
            files.sort();
            files
        } else {
            vec![self.root.clone()]
        };
        if self.files.is_empty() {
            return Err(anyhow!("no images found in {}", self.root.display()));
        }
        self.cursor = 0;
        self.last_error = None;
        log::info!(
            "FileSource: connected to {} ({} images)",
            self.root.display(),
            self.files.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        match image::open(path) {
            Ok(image) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(Some(image.into_rgb8()))
            }
            Err(e) => {
                let message = format!("decode {}: {}", path.display(), e);
                self.last_error = Some(message.clone());
                Err(anyhow!(message))
            }
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
