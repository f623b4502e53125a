//! Traffic Sentinel
//!
//! Real-time vehicle detection and prioritization over camera streams and
//! video files.
//!
//! # Architecture
//!
//! Frames flow through a single cooperative loop:
//!
//! 1. **Ingest**: a `FrameSource` hands out decoded frames; `FrameAcquirer`
//!    restarts files at end of stream and retries live streams.
//! 2. **Detect**: every `detection_interval`-th frame goes to a
//!    `DetectorBackend`; other frames reuse the last annotated output.
//! 3. **Classify and rank**: labels map to HIGH/MEDIUM/LOW vehicles,
//!    pedestrians, or generic objects; vehicles are ranked by proximity to
//!    the frame bottom and capped.
//! 4. **Recognize**: on recognition frames, tracked vehicles get text
//!    recognition through a short-lived spatial cache.
//! 5. **Signal**: the highest tier of the tracked vehicles drives a debounced
//!    priority state; changes go to the LED actuator.
//! 6. **Log**: tracked entities are appended to a ring-buffered log that can
//!    be snapshotted and exported while the loop runs.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames and detector input preparation
//! - `ingest`: frame sources (image files, video files, HTTP cameras, synthetic)
//! - `detect`, `recognize`: model backends
//! - `classify`, `rank`, `cache`, `priority`: per-frame decision logic
//! - `detection_log`, `export`: record keeping
//! - `pipeline`: the frame loop

pub mod actuator;
pub mod cache;
pub mod classify;
pub mod config;
pub mod detect;
pub mod detection_log;
pub mod error;
pub mod export;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod priority;
pub mod rank;
pub mod recognize;
pub mod render;

pub use actuator::{Actuator, HttpLedActuator, NoopActuator, RecordingActuator};
pub use cache::{CacheStats, RecognitionCache};
pub use classify::{Category, Classifier, DetectionMode, PriorityRule, Tier};
pub use config::SentinelConfig;
pub use detect::{BoundingBox, Detection, DetectorBackend, RawDetection, ReplayBackend};
pub use detection_log::{DetectionLog, LogRecord};
pub use error::SentinelError;
pub use export::{export_log, ExportFormat, ExportOptions};
pub use frame::Frame;
pub use ingest::{AcquirePolicy, FileSource, FrameAcquirer, FrameSource, HttpSource, SourceKind};
pub use pipeline::{Cadence, Pipeline, PipelineOptions, RunEnd, StepReport};
pub use priority::{Priority, PriorityAggregator, PriorityCell};
pub use rank::{ClassifiedEntity, TrackedSet};
pub use recognize::{FixedRecognizer, RecognitionBackend, TextCandidate, TextQualifier};
