//! Frame ingestion sources.
//!
//! This module provides the sources frames are read from:
//! - Local files: image directories, the synthetic `stub://` source, and
//!   video files (feature: ingest-file-ffmpeg)
//! - HTTP MJPEG/JPEG camera streams
//!
//! Sources only hand out decoded images. `FrameAcquirer` wraps a source with
//! the recovery policy: file sources restart from the beginning at end of
//! stream, live sources retry after a short delay and reconnect after
//! repeated failures. The acquirer also assigns the monotonic frame index.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod http;
pub mod synthetic;

use anyhow::Result;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::SentinelConfig;
use crate::error::SentinelError;
use crate::frame::Frame;

pub use file::FileSource;
pub use http::{HttpSource, HttpSourceConfig};
pub use synthetic::SyntheticSource;

/// Whether a source is replayable (file) or a live stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Live,
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

pub trait FrameSource {
    fn name(&self) -> String;

    fn kind(&self) -> SourceKind;

    /// Open the source. Failing here at startup is fatal for a run.
    fn connect(&mut self) -> Result<()>;

    /// Read the next image. `Ok(None)` means end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Restart from the first frame. Live sources reconnect.
    fn rewind(&mut self) -> Result<()> {
        self.connect()
    }

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Frame rate the source reports, if any.
    fn nominal_fps(&self) -> Option<f32> {
        None
    }

    /// Drop any open handles. Called once when a run ends.
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }

    fn nominal_fps(&self) -> Option<f32> {
        (**self).nominal_fps()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Recovery policy applied by `FrameAcquirer`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcquirePolicy {
    /// Restart file sources at end of stream instead of finishing.
    pub loop_file: bool,
    pub retry_delay: Duration,
    /// Consecutive failed reads before a reconnect (live) or giving up (file).
    pub reconnect_after: u32,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            loop_file: true,
            retry_delay: Duration::from_millis(100),
            reconnect_after: 3,
        }
    }
}

impl AcquirePolicy {
    pub fn from_config(cfg: &SentinelConfig) -> Self {
        Self {
            loop_file: cfg.source.loop_file,
            retry_delay: cfg.source.retry_delay,
            reconnect_after: cfg.source.reconnect_after.max(1),
        }
    }
}

/// Counters kept by the acquirer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcquireStats {
    pub frames: u64,
    pub restarts: u64,
    pub failures: u64,
    pub reconnects: u64,
}

pub struct FrameAcquirer<S: FrameSource> {
    source: S,
    policy: AcquirePolicy,
    next_index: u64,
    consecutive_failures: u32,
    stats: AcquireStats,
}

impl<S: FrameSource> FrameAcquirer<S> {
    pub fn new(source: S, policy: AcquirePolicy) -> Self {
        Self {
            source,
            policy,
            next_index: 1,
            consecutive_failures: 0,
            stats: AcquireStats::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stats(&self) -> AcquireStats {
        self.stats
    }

    /// Connect the source, mapping failure to `SourceUnavailable`.
    pub fn start(&mut self) -> Result<(), SentinelError> {
        self.source
            .connect()
            .map_err(|e| SentinelError::source_unavailable(self.source.name(), format!("{e:#}")))
    }

    /// Next frame, applying the recovery policy.
    ///
    /// Returns `Ok(None)` when a non-looping file ends or `stop` is raised
    /// while waiting. A file source that keeps failing without producing a
    /// frame is reported as `SourceUnavailable`.
    pub fn acquire(&mut self, stop: &AtomicBool) -> Result<Option<Frame>, SentinelError> {
        while !stop.load(Ordering::SeqCst) {
            match self.source.next_frame() {
                Ok(Some(image)) => {
                    self.consecutive_failures = 0;
                    let frame = Frame::new(image, self.next_index);
                    self.next_index += 1;
                    self.stats.frames += 1;
                    return Ok(Some(frame));
                }
                Ok(None) => match self.source.kind() {
                    SourceKind::File if !self.policy.loop_file => return Ok(None),
                    SourceKind::File => self.restart_file()?,
                    SourceKind::Live => self.live_failure("stream ended"),
                },
                Err(e) => match self.source.kind() {
                    SourceKind::File => {
                        log::warn!("{}: read failed: {:#}", self.source.name(), e);
                        self.restart_file()?;
                    }
                    SourceKind::Live => self.live_failure(&format!("{e:#}")),
                },
            }
        }
        Ok(None)
    }

    fn restart_file(&mut self) -> Result<(), SentinelError> {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.policy.reconnect_after {
            return Err(SentinelError::source_unavailable(
                self.source.name(),
                "file produced no frames after restart",
            ));
        }
        self.stats.restarts += 1;
        log::info!("{}: restarting from the beginning", self.source.name());
        self.source
            .rewind()
            .map_err(|e| SentinelError::source_unavailable(self.source.name(), format!("{e:#}")))
    }

    fn live_failure(&mut self, reason: &str) {
        self.consecutive_failures += 1;
        self.stats.failures += 1;
        log::warn!(
            "{}: frame read failed ({}), retrying in {:?}",
            self.source.name(),
            reason,
            self.policy.retry_delay
        );
        std::thread::sleep(self.policy.retry_delay);

        if self.consecutive_failures % self.policy.reconnect_after.max(1) == 0 {
            self.stats.reconnects += 1;
            match self.source.connect() {
                Ok(()) => log::info!("{}: reconnected", self.source.name()),
                Err(e) => log::warn!("{}: reconnect failed: {:#}", self.source.name(), e),
            }
        }
    }

    pub fn release(&mut self) {
        self.source.release();
    }
}

/// Open the source named by the configuration: a video file/directory or a
/// live stream URL.
pub fn open_source(cfg: &SentinelConfig) -> Result<Box<dyn FrameSource>, SentinelError> {
    if let Some(video) = &cfg.source.video {
        let path = video.to_string_lossy().into_owned();
        let source = FileSource::new(&path, cfg.source.fallback_fps)
            .map_err(|e| SentinelError::source_unavailable(path.clone(), format!("{e:#}")))?;
        return Ok(Box::new(source));
    }
    if let Some(url) = cfg.stream_url() {
        let source = HttpSource::new(HttpSourceConfig {
            url: url.clone(),
            timeout: Duration::from_secs(10),
        })
        .map_err(|e| SentinelError::source_unavailable(url, format!("{e:#}")))?;
        return Ok(Box::new(source));
    }
    Err(SentinelError::source_unavailable(
        "none",
        "no video file or stream url configured",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source that fails a scripted number of times before each frame.
    struct Flaky {
        kind: SourceKind,
        script: Vec<Option<bool>>,
        cursor: usize,
        connects: u32,
        rewinds: u32,
    }

    impl Flaky {
        fn new(kind: SourceKind, script: Vec<Option<bool>>) -> Self {
            Self {
                kind,
                script,
                cursor: 0,
                connects: 0,
                rewinds: 0,
            }
        }
    }

    impl FrameSource for Flaky {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            let step = self.script.get(self.cursor).copied().flatten();
            self.cursor += 1;
            match step {
                // Some(true): frame, Some(false): error, None: end of stream
                Some(true) => Ok(Some(RgbImage::new(4, 4))),
                Some(false) => anyhow::bail!("transient"),
                None => Ok(None),
            }
        }

        fn rewind(&mut self) -> Result<()> {
            self.rewinds += 1;
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    fn fast_policy() -> AcquirePolicy {
        AcquirePolicy {
            loop_file: true,
            retry_delay: Duration::from_millis(1),
            reconnect_after: 2,
        }
    }

    #[test]
    fn file_source_restarts_at_end_of_stream() {
        let source = Flaky::new(SourceKind::File, vec![Some(true), None, Some(true)]);
        let mut acquirer = FrameAcquirer::new(source, fast_policy());
        let stop = AtomicBool::new(false);

        assert_eq!(acquirer.acquire(&stop).unwrap().unwrap().index, 1);
        assert_eq!(acquirer.acquire(&stop).unwrap().unwrap().index, 2);
        assert_eq!(acquirer.source().rewinds, 1);
        assert_eq!(acquirer.stats().restarts, 1);
    }

    #[test]
    fn non_looping_file_finishes() {
        let source = Flaky::new(SourceKind::File, vec![Some(true), None]);
        let policy = AcquirePolicy {
            loop_file: false,
            ..fast_policy()
        };
        let mut acquirer = FrameAcquirer::new(source, policy);
        let stop = AtomicBool::new(false);
        assert!(acquirer.acquire(&stop).unwrap().is_some());
        assert!(acquirer.acquire(&stop).unwrap().is_none());
    }

    #[test]
    fn empty_file_is_unavailable() {
        let source = Flaky::new(SourceKind::File, vec![]);
        let mut acquirer = FrameAcquirer::new(source, fast_policy());
        let stop = AtomicBool::new(false);
        assert!(matches!(
            acquirer.acquire(&stop),
            Err(SentinelError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn live_source_retries_then_reconnects() {
        let source = Flaky::new(
            SourceKind::Live,
            vec![Some(false), Some(false), Some(false), Some(true)],
        );
        let mut acquirer = FrameAcquirer::new(source, fast_policy());
        let stop = AtomicBool::new(false);

        let frame = acquirer.acquire(&stop).unwrap().unwrap();
        assert_eq!(frame.index, 1);
        assert_eq!(acquirer.stats().failures, 3);
        assert_eq!(acquirer.stats().reconnects, 1);
        assert_eq!(acquirer.source().connects, 1);
    }

    #[test]
    fn stop_flag_ends_acquisition() {
        let source = Flaky::new(SourceKind::Live, vec![Some(true)]);
        let mut acquirer = FrameAcquirer::new(source, fast_policy());
        let stop = AtomicBool::new(true);
        assert!(acquirer.acquire(&stop).unwrap().is_none());
    }
}
