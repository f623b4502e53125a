//! Frame loop and cadence scheduling.
//!
//! One frame is fully handled before the next is acquired:
//! acquire -> maybe detect -> maybe recognize -> classify/rank -> log,
//! overlay, priority signal. Frames where detection is skipped reuse the
//! last annotated output so consumers never flicker back to a bare frame.

use anyhow::{Context, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actuator::Actuator;
use crate::cache::{CacheStats, RecognitionCache};
use crate::classify::{Classifier, DetectionMode};
use crate::config::SentinelConfig;
use crate::detect::{self, DetectorBackend};
use crate::detection_log::{DetectionLog, LogRecord, NOT_AVAILABLE};
use crate::error::SentinelError;
use crate::frame::Frame;
use crate::ingest::{FrameAcquirer, FrameSource, SourceKind};
use crate::priority::{Priority, PriorityAggregator, PriorityCell};
use crate::rank::{ClassifiedEntity, TrackedSet, DEFAULT_MAX_VEHICLES};
use crate::recognize::{self, plate_region, RecognitionBackend};
use crate::render::{annotate, Overlay, OverlayContext};

/// Period of the health line logged by `Pipeline::run`.
pub const HEALTH_LOG_PERIOD: Duration = Duration::from_secs(5);

/// Frame-count periods of the expensive stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cadence {
    /// Detect on raw frame indices divisible by this.
    pub detection_interval: u64,
    /// Recognize when the processed-frame count is divisible by this.
    pub recognition_interval: u64,
    /// Purge the recognition cache on raw frame indices divisible by this.
    pub maintenance_interval: u64,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            detection_interval: 3,
            recognition_interval: 15,
            maintenance_interval: 30,
        }
    }
}

impl Cadence {
    pub fn should_detect(&self, frame_index: u64) -> bool {
        frame_index % self.detection_interval.max(1) == 0
    }

    pub fn should_recognize(&self, processed: u64) -> bool {
        processed % self.recognition_interval.max(1) == 0
    }

    pub fn should_purge(&self, frame_index: u64) -> bool {
        frame_index % self.maintenance_interval.max(1) == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineOptions {
    pub cadence: Cadence,
    pub max_vehicles: usize,
    /// Detections below this confidence are dropped before classification.
    pub min_confidence: f32,
    pub process_scale: f32,
    /// Pause after a failed detection call.
    pub failure_backoff: Duration,
    /// Multiplier on a file source's frame rate when pacing playback.
    pub playback_speed: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            max_vehicles: DEFAULT_MAX_VEHICLES,
            min_confidence: 0.25,
            process_scale: 1.0,
            failure_backoff: Duration::from_millis(500),
            playback_speed: 1.0,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(cfg: &SentinelConfig) -> Self {
        Self {
            cadence: cfg.cadence(),
            max_vehicles: cfg.detection.max_vehicles,
            min_confidence: cfg.detection.min_confidence,
            process_scale: cfg.source.process_scale,
            failure_backoff: cfg.detection.failure_backoff,
            playback_speed: cfg.source.playback_speed,
        }
    }
}

/// Fully annotated result of one processed frame.
#[derive(Clone, Debug)]
pub struct FrameOutput {
    pub frame_index: u64,
    pub image: RgbImage,
    pub tracked: TrackedSet,
    /// Recognized text per tracked vehicle, aligned with `tracked.vehicles`.
    pub vehicle_texts: Vec<Option<String>>,
    pub overlay: Overlay,
    pub priority: Priority,
}

impl FrameOutput {
    fn bare(frame: Frame, priority: Priority) -> Self {
        Self {
            frame_index: frame.index,
            image: frame.into_image(),
            tracked: TrackedSet::default(),
            vehicle_texts: Vec::new(),
            overlay: Overlay::default(),
            priority,
        }
    }
}

/// What happened to one acquired frame.
#[derive(Clone, Debug)]
pub struct StepReport {
    pub frame_index: u64,
    pub detected: bool,
    pub recognized: bool,
    pub detection_failed: bool,
    pub purged: usize,
    /// Output to display for this frame.
    pub output: Arc<FrameOutput>,
    /// Priority command issued on this frame, if any.
    pub signal: Option<Priority>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub processed: u64,
    pub skipped: u64,
    pub detection_failures: u64,
    pub recognition_calls: u64,
    pub records_logged: u64,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEnd {
    Stopped,
    EndOfStream,
    FrameLimit,
}

pub struct Pipeline {
    detector: Box<dyn DetectorBackend>,
    recognizer: Option<Box<dyn RecognitionBackend>>,
    classifier: Classifier,
    cache: RecognitionCache,
    aggregator: PriorityAggregator,
    log: DetectionLog,
    options: PipelineOptions,
    processed: u64,
    last_output: Option<Arc<FrameOutput>>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        classifier: Classifier,
        aggregator: PriorityAggregator,
        log: DetectionLog,
        options: PipelineOptions,
    ) -> Self {
        Self {
            detector,
            recognizer: None,
            classifier,
            cache: RecognitionCache::default(),
            aggregator,
            log,
            options,
            processed: 0,
            last_output: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_recognizer(
        mut self,
        recognizer: Box<dyn RecognitionBackend>,
        cache: RecognitionCache,
    ) -> Self {
        self.recognizer = Some(recognizer);
        self.cache = cache;
        self
    }

    /// Assemble a pipeline from configuration and warm up its backends.
    pub fn from_config(cfg: &SentinelConfig, actuator: Box<dyn Actuator>) -> Result<Self> {
        let mut detector = detect::build_backend(&cfg.detector)?;
        detector
            .warm_up()
            .with_context(|| format!("warm up {} detector", detector.name()))?;
        log::info!("detector backend: {}", detector.name());

        let mut pipeline = Self::new(
            detector,
            cfg.build_classifier(),
            PriorityAggregator::new(actuator),
            DetectionLog::new(cfg.log.max_entries),
            PipelineOptions::from_config(cfg),
        );

        if let Some(mut recognizer) = recognize::build_backend(&cfg.recognition)? {
            recognizer
                .warm_up()
                .with_context(|| format!("warm up {} recognizer", recognizer.name()))?;
            log::info!("recognition backend: {}", recognizer.name());
            let cache = RecognitionCache::new(cfg.recognition.cache_ttl(), cfg.recognition.qualifier());
            pipeline = pipeline.with_recognizer(recognizer, cache);
        }
        Ok(pipeline)
    }

    /// Shared handle to the detection log.
    pub fn log(&self) -> DetectionLog {
        self.log.clone()
    }

    pub fn priority_cell(&self) -> PriorityCell {
        self.aggregator.cell()
    }

    pub fn priority(&self) -> Priority {
        self.aggregator.current()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn last_output(&self) -> Option<Arc<FrameOutput>> {
        self.last_output.clone()
    }

    /// Handle one acquired frame.
    pub fn process_frame(&mut self, frame: Frame) -> StepReport {
        let frame_index = frame.index;
        self.stats.frames += 1;

        let purged = if self.options.cadence.should_purge(frame_index) {
            self.cache.purge_expired()
        } else {
            0
        };

        if !self.options.cadence.should_detect(frame_index) {
            self.stats.skipped += 1;
            return self.skipped(frame, purged, false);
        }

        let raw = {
            let input = frame.detection_input(self.options.process_scale);
            self.detector
                .detect(&input.image)
                .map(|raw| (raw, input.scale_back))
        };
        let (raw, scale_back) = match raw {
            Ok(result) => result,
            Err(e) => {
                self.stats.detection_failures += 1;
                log::warn!(
                    "{}",
                    SentinelError::adapter("detection", format!("frame {}: {:#}", frame_index, e))
                );
                std::thread::sleep(self.options.failure_backoff);
                return self.skipped(frame, purged, true);
            }
        };

        self.processed += 1;
        self.stats.processed += 1;
        let recognize_now =
            self.recognizer.is_some() && self.options.cadence.should_recognize(self.processed);

        let frame_height = frame.height();
        let entities: Vec<ClassifiedEntity> = raw
            .into_iter()
            .map(|raw| raw.into_detection(scale_back))
            .filter(|detection| detection.confidence >= self.options.min_confidence)
            .filter_map(|detection| {
                let category = self.classifier.classify(&detection.raw_label)?;
                Some(ClassifiedEntity::new(detection, category, frame_height))
            })
            .collect();
        let tracked = TrackedSet::build(entities, self.options.max_vehicles);

        let vehicle_texts = if recognize_now {
            self.recognize_vehicles(&frame, &tracked)
        } else {
            vec![None; tracked.vehicles.len()]
        };

        let signal = if self.classifier.mode() == DetectionMode::Vehicle {
            self.aggregator.observe(&tracked.vehicles)
        } else {
            None
        };
        let priority = self.aggregator.current();

        self.append_records(&tracked, &vehicle_texts);

        let overlay = Overlay::build(
            &tracked,
            OverlayContext {
                mode: self.classifier.mode(),
                pedestrians: self.classifier.pedestrians(),
                priority,
                vehicle_texts: &vehicle_texts,
            },
        );
        let image = annotate(frame.image(), &overlay);
        let output = Arc::new(FrameOutput {
            frame_index,
            image,
            tracked,
            vehicle_texts,
            overlay,
            priority,
        });
        self.last_output = Some(Arc::clone(&output));

        StepReport {
            frame_index,
            detected: true,
            recognized: recognize_now,
            detection_failed: false,
            purged,
            output,
            signal,
        }
    }

    fn skipped(&mut self, frame: Frame, purged: usize, detection_failed: bool) -> StepReport {
        let frame_index = frame.index;
        let output = match &self.last_output {
            Some(last) => Arc::clone(last),
            None => Arc::new(FrameOutput::bare(frame, self.aggregator.current())),
        };
        StepReport {
            frame_index,
            detected: false,
            recognized: false,
            detection_failed,
            purged,
            output,
            signal: None,
        }
    }

    fn recognize_vehicles(&mut self, frame: &Frame, tracked: &TrackedSet) -> Vec<Option<String>> {
        let Some(recognizer) = self.recognizer.as_mut() else {
            return vec![None; tracked.vehicles.len()];
        };
        let mut calls = 0u64;
        let texts: Vec<Option<String>> = tracked
            .vehicles
            .iter()
            .map(|vehicle| {
                let bbox = &vehicle.detection.bbox;
                let region = plate_region(frame.image(), bbox)?;
                self.cache.get_or_recognize(&bbox.spatial_key(), || {
                    calls += 1;
                    recognizer.recognize(&region)
                })
            })
            .collect();
        self.stats.recognition_calls += calls;
        texts
    }

    fn append_records(&mut self, tracked: &TrackedSet, vehicle_texts: &[Option<String>]) {
        match self.classifier.mode() {
            DetectionMode::General => {
                for object in &tracked.objects {
                    self.log.append(
                        LogRecord::new(&object.detection.raw_label, NOT_AVAILABLE)
                            .with_pedestrians(Some(0)),
                    );
                    self.stats.records_logged += 1;
                }
            }
            DetectionMode::Vehicle => {
                let pedestrians = self
                    .classifier
                    .pedestrians()
                    .then_some(tracked.pedestrians.len());
                for (vehicle, text) in tracked.vehicles.iter().zip(vehicle_texts) {
                    self.log.append(
                        LogRecord::new(&vehicle.detection.raw_label, vehicle.category.log_value())
                            .with_text(text.clone())
                            .with_pedestrians(pedestrians),
                    );
                    self.stats.records_logged += 1;
                }
            }
        }
    }

    /// Drive the loop until `stop` is raised, the source ends, or
    /// `max_frames` frames were handled.
    ///
    /// The source is connected first; failing that is the only fatal error.
    /// A stop request lets the current frame finish, then the source is
    /// released.
    pub fn run<S, F>(
        &mut self,
        acquirer: &mut FrameAcquirer<S>,
        stop: &AtomicBool,
        max_frames: Option<u64>,
        mut on_step: F,
    ) -> Result<RunEnd, SentinelError>
    where
        S: FrameSource,
        F: FnMut(&StepReport),
    {
        acquirer.start()?;
        let frame_period = self.frame_period(acquirer.source());
        if let Some(period) = frame_period {
            log::info!("pacing file playback at {:?} per frame", period);
        }

        let mut handled = 0u64;
        let mut last_health_log = Instant::now();
        let end = loop {
            if stop.load(Ordering::SeqCst) {
                break RunEnd::Stopped;
            }
            if max_frames.is_some_and(|max| handled >= max) {
                break RunEnd::FrameLimit;
            }
            let started = Instant::now();
            let frame = match acquirer.acquire(stop) {
                Ok(Some(frame)) => frame,
                Ok(None) if stop.load(Ordering::SeqCst) => break RunEnd::Stopped,
                Ok(None) => break RunEnd::EndOfStream,
                Err(e) => {
                    acquirer.release();
                    return Err(e);
                }
            };

            let report = self.process_frame(frame);
            handled += 1;
            on_step(&report);

            if last_health_log.elapsed() >= HEALTH_LOG_PERIOD {
                log::info!(
                    "health: source={} healthy={} captured={} processed={} priority={}",
                    acquirer.source().name(),
                    acquirer.source().is_healthy(),
                    acquirer.stats().frames,
                    self.stats.processed,
                    self.aggregator.current()
                );
                last_health_log = Instant::now();
            }

            if let Some(period) = frame_period {
                if let Some(remaining) = period.checked_sub(started.elapsed()) {
                    std::thread::sleep(remaining);
                }
            }
        };

        acquirer.release();
        log::info!(
            "pipeline finished ({:?}): {} frames, {} processed, {} records",
            end,
            self.stats.frames,
            self.stats.processed,
            self.stats.records_logged
        );
        Ok(end)
    }

    fn frame_period<S: FrameSource>(&self, source: &S) -> Option<Duration> {
        if source.kind() != SourceKind::File {
            return None;
        }
        let fps = source.nominal_fps()? * self.options.playback_speed;
        (fps > 0.0).then(|| Duration::from_secs_f32(1.0 / fps))
    }
}
