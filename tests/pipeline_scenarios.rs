use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::RgbImage;

use traffic_sentinel::cache::{RecognitionCache, DEFAULT_CACHE_TTL};
use traffic_sentinel::ingest::SyntheticSource;
use traffic_sentinel::{
    AcquirePolicy, BoundingBox, Cadence, Category, Classifier, DetectionLog, DetectionMode,
    DetectorBackend, FixedRecognizer, Frame, FrameAcquirer, Pipeline, PipelineOptions, Priority,
    PriorityAggregator, RawDetection, RecordingActuator, ReplayBackend, RunEnd, TextCandidate,
    TextQualifier,
};

/// Detector fed from a queue of per-call results; `None` entries fail.
/// Once the queue is drained every call returns no detections.
struct ScriptedDetector {
    calls: VecDeque<Option<Vec<RawDetection>>>,
}

impl ScriptedDetector {
    fn new(calls: Vec<Option<Vec<RawDetection>>>) -> Self {
        Self {
            calls: calls.into(),
        }
    }
}

impl DetectorBackend for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _: &RgbImage) -> Result<Vec<RawDetection>> {
        match self.calls.pop_front() {
            Some(Some(detections)) => Ok(detections),
            Some(None) => Err(anyhow!("detector timed out")),
            None => Ok(Vec::new()),
        }
    }
}

fn every_frame() -> PipelineOptions {
    PipelineOptions {
        cadence: Cadence {
            detection_interval: 1,
            recognition_interval: 1,
            maintenance_interval: 30,
        },
        failure_backoff: Duration::from_millis(1),
        playback_speed: 1000.0,
        ..PipelineOptions::default()
    }
}

fn pipeline(
    detector: Box<dyn DetectorBackend>,
    classifier: Classifier,
    options: PipelineOptions,
) -> (Pipeline, RecordingActuator) {
    let recorder = RecordingActuator::new();
    let pipeline = Pipeline::new(
        detector,
        classifier,
        PriorityAggregator::new(Box::new(recorder.clone())),
        DetectionLog::default(),
        options,
    );
    (pipeline, recorder)
}

fn frame(index: u64) -> Frame {
    Frame::new(RgbImage::new(200, 200), index)
}

fn colors(recorder: &RecordingActuator) -> Vec<&'static str> {
    recorder
        .commands()
        .into_iter()
        .map(|priority| priority.color())
        .collect()
}

#[test]
fn emergency_vehicle_raises_high_priority() {
    let detector = ReplayBackend::new(vec![vec![RawDetection::new(
        [0.1, 0.4, 0.5, 0.9],
        0.9,
        "fire truck",
    )]]);
    let (mut pipeline, recorder) = pipeline(Box::new(detector), Classifier::default(), every_frame());

    let report = pipeline.process_frame(frame(1));

    assert!(report.detected);
    assert_eq!(report.signal, Some(Priority::High));
    assert_eq!(report.output.tracked.vehicles[0].category, Category::High);
    assert_eq!(pipeline.priority(), Priority::High);
    assert_eq!(colors(&recorder), vec!["red"]);

    let records = pipeline.log().snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].label, "fire truck");
    assert_eq!(records[0].category, "HIGH");
}

#[test]
fn priority_drops_to_none_when_vehicles_leave() {
    let detector = ScriptedDetector::new(vec![
        Some(vec![RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.8, "bus")]),
        Some(vec![RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.8, "bus")]),
        Some(Vec::new()),
    ]);
    let (mut pipeline, recorder) = pipeline(Box::new(detector), Classifier::default(), every_frame());

    let signals: Vec<Option<Priority>> = (1..=3)
        .map(|n| pipeline.process_frame(frame(n)).signal)
        .collect();

    assert_eq!(signals, vec![Some(Priority::Medium), None, Some(Priority::None)]);
    assert_eq!(colors(&recorder), vec!["yellow", "off"]);
}

#[test]
fn recognized_text_is_cleaned_and_cached() {
    let detector = ReplayBackend::new(vec![vec![RawDetection::new(
        [0.1, 0.1, 0.6, 0.8],
        0.9,
        "car",
    )]]);
    let (pipeline, _) = pipeline(Box::new(detector), Classifier::default(), every_frame());
    let mut pipeline = pipeline.with_recognizer(
        Box::new(FixedRecognizer::new(vec![
            TextCandidate::new("a b-1234!", 0.9),
            TextCandidate::new("??", 0.99),
        ])),
        RecognitionCache::new(DEFAULT_CACHE_TTL, TextQualifier::default()),
    );

    let first = pipeline.process_frame(frame(1));
    let second = pipeline.process_frame(frame(2));

    assert!(first.recognized && second.recognized);
    assert_eq!(first.output.vehicle_texts, vec![Some("AB-1234".to_string())]);
    assert_eq!(second.output.vehicle_texts, vec![Some("AB-1234".to_string())]);
    assert_eq!(pipeline.stats().recognition_calls, 1);
    assert_eq!(pipeline.cache_stats().hits, 1);
    assert_eq!(pipeline.cache_stats().misses, 1);

    let records = pipeline.log().snapshot();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|record| record.recognized_text.as_deref() == Some("AB-1234")));
    assert!(second.output.overlay.elements[0].label.ends_with("| Plate: AB-1234"));
}

#[test]
fn keeps_the_five_nearest_vehicles_in_stable_order() {
    // Frame height 200, so y2 = 200 - proximity.
    let proximities = [5, 1, 9, 1, 3, 7];
    let detections = proximities
        .iter()
        .enumerate()
        .map(|(i, proximity)| {
            let y2 = (200 - proximity) as f32;
            RawDetection::new(
                [i as f32 * 30.0, y2 - 40.0, i as f32 * 30.0 + 25.0, y2],
                0.5 + i as f32 / 100.0,
                "car",
            )
        })
        .collect();
    let detector = ScriptedDetector::new(vec![Some(detections)]);
    let (mut pipeline, _) = pipeline(Box::new(detector), Classifier::default(), every_frame());

    let report = pipeline.process_frame(frame(1));
    let vehicles = &report.output.tracked.vehicles;

    let kept: Vec<u32> = vehicles.iter().map(|v| v.proximity).collect();
    assert_eq!(kept, vec![1, 1, 3, 5, 7]);
    let lefts: Vec<i32> = vehicles.iter().map(|v| v.detection.bbox.x1).collect();
    assert_eq!(lefts, vec![30, 90, 120, 0, 150]);
    assert_eq!(pipeline.log().len(), 5);
}

#[test]
fn downscaled_detections_map_back_to_source_pixels() {
    let detector = ScriptedDetector::new(vec![Some(vec![RawDetection::new(
        [10.0, 5.0, 60.0, 40.0],
        0.9,
        "car",
    )])]);
    let options = PipelineOptions {
        process_scale: 0.5,
        ..every_frame()
    };
    let (mut pipeline, _) = pipeline(Box::new(detector), Classifier::default(), options);

    let report = pipeline.process_frame(Frame::new(RgbImage::new(200, 100), 1));

    let vehicle = &report.output.tracked.vehicles[0];
    assert_eq!(vehicle.detection.bbox, BoundingBox::new(20, 10, 120, 80));
    assert_eq!(vehicle.proximity, 20);
    assert_eq!(report.output.image.dimensions(), (200, 100));
}

#[test]
fn cache_purge_runs_on_the_maintenance_cadence() {
    let detector = ReplayBackend::new(vec![vec![RawDetection::new(
        [0.1, 0.1, 0.6, 0.8],
        0.9,
        "car",
    )]]);
    let (pipeline, _) = pipeline(Box::new(detector), Classifier::default(), every_frame());
    let mut pipeline = pipeline.with_recognizer(
        Box::new(FixedRecognizer::new(vec![TextCandidate::new("XYZ-99", 0.8)])),
        RecognitionCache::new(Duration::from_millis(1), TextQualifier::default()),
    );

    let mut purges = Vec::new();
    for n in 1..=60 {
        if n % 30 == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        let report = pipeline.process_frame(frame(n));
        if report.purged > 0 {
            purges.push((report.frame_index, report.purged));
        }
    }

    assert_eq!(purges, vec![(30, 1), (60, 1)]);
    assert_eq!(pipeline.cache_stats().purged, 2);
}

#[test]
fn skipped_frames_reuse_the_last_output() {
    let detector = ReplayBackend::new(vec![vec![RawDetection::new(
        [0.1, 0.1, 0.6, 0.8],
        0.9,
        "car",
    )]]);
    let options = PipelineOptions {
        cadence: Cadence {
            detection_interval: 3,
            recognition_interval: 2,
            maintenance_interval: 30,
        },
        ..every_frame()
    };
    let (pipeline, _) = pipeline(Box::new(detector), Classifier::default(), options);
    let mut pipeline = pipeline.with_recognizer(
        Box::new(FixedRecognizer::new(vec![TextCandidate::new("XYZ-99", 0.8)])),
        RecognitionCache::default(),
    );

    let reports: Vec<_> = (1..=12).map(|n| pipeline.process_frame(frame(n))).collect();

    let detected: Vec<u64> = reports
        .iter()
        .filter(|r| r.detected)
        .map(|r| r.frame_index)
        .collect();
    assert_eq!(detected, vec![3, 6, 9, 12]);
    let recognized: Vec<u64> = reports
        .iter()
        .filter(|r| r.recognized)
        .map(|r| r.frame_index)
        .collect();
    assert_eq!(recognized, vec![6, 12]);

    // Nothing processed yet: bare frames.
    assert_eq!(reports[0].output.frame_index, 1);
    assert!(reports[1].output.tracked.is_empty());
    // Frames 4 and 5 show frame 3's annotated output.
    assert!(Arc::ptr_eq(&reports[3].output, &reports[2].output));
    assert!(Arc::ptr_eq(&reports[4].output, &reports[2].output));
    assert_eq!(reports[4].frame_index, 5);

    let stats = pipeline.stats();
    assert_eq!(stats.frames, 12);
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.skipped, 8);
    assert_eq!(stats.records_logged, 4);
}

#[test]
fn detection_failure_is_skipped_and_loop_continues() {
    let detector = ScriptedDetector::new(vec![
        Some(vec![RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.8, "car")]),
        None,
        Some(vec![RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.8, "truck")]),
    ]);
    let (mut pipeline, recorder) = pipeline(Box::new(detector), Classifier::default(), every_frame());

    let first = pipeline.process_frame(frame(1));
    let failed = pipeline.process_frame(frame(2));
    let third = pipeline.process_frame(frame(3));

    assert!(failed.detection_failed);
    assert!(!failed.detected);
    assert!(Arc::ptr_eq(&failed.output, &first.output));
    assert_eq!(failed.signal, None);
    assert!(third.detected);
    assert_eq!(pipeline.stats().detection_failures, 1);
    assert_eq!(pipeline.stats().processed, 2);
    assert_eq!(colors(&recorder), vec!["green", "yellow"]);
}

#[test]
fn low_confidence_and_unknown_labels_are_dropped() {
    let detector = ScriptedDetector::new(vec![Some(vec![
        RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.2, "car"),
        RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.9, "traffic light"),
        RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.25, "motorcycle"),
    ])]);
    let (mut pipeline, _) = pipeline(Box::new(detector), Classifier::default(), every_frame());

    let report = pipeline.process_frame(frame(1));

    assert_eq!(report.output.tracked.len(), 1);
    assert_eq!(report.output.tracked.vehicles[0].detection.raw_label, "motorcycle");
    assert_eq!(report.signal, Some(Priority::Low));
}

#[test]
fn pedestrian_mode_counts_people_per_record() {
    let detector = ScriptedDetector::new(vec![Some(vec![
        RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.8, "car"),
        RawDetection::new([100.0, 10.0, 120.0, 90.0], 0.7, "person"),
        RawDetection::new([130.0, 10.0, 150.0, 90.0], 0.6, "person"),
    ])]);
    let (mut pipeline, _) = pipeline(
        Box::new(detector),
        Classifier::new(DetectionMode::Vehicle, true),
        every_frame(),
    );

    let report = pipeline.process_frame(frame(1));

    assert_eq!(report.output.tracked.pedestrians.len(), 2);
    let records = pipeline.log().snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pedestrians_nearby, Some(2));
    assert!(report.output.overlay.status[0].contains("Pedestrians: 2"));
}

#[test]
fn general_mode_logs_objects_without_signalling() {
    let detector = ScriptedDetector::new(vec![Some(vec![
        RawDetection::new([10.0, 10.0, 90.0, 150.0], 0.6, "dog"),
        RawDetection::new([100.0, 10.0, 190.0, 150.0], 0.9, "ambulance"),
    ])]);
    let (mut pipeline, recorder) = pipeline(
        Box::new(detector),
        Classifier::new(DetectionMode::General, false),
        every_frame(),
    );

    let report = pipeline.process_frame(frame(1));

    assert_eq!(report.signal, None);
    assert!(recorder.commands().is_empty());
    let labels: Vec<&str> = report
        .output
        .tracked
        .objects
        .iter()
        .map(|o| o.detection.raw_label.as_str())
        .collect();
    assert_eq!(labels, vec!["ambulance", "dog"]);

    let records = pipeline.log().snapshot();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.category == "N/A"));
    assert!(records.iter().all(|r| r.pedestrians_nearby == Some(0)));
}

#[test]
fn run_ends_with_a_finite_file_source() {
    let detector = ReplayBackend::new(vec![vec![]]);
    let (mut pipeline, _) = pipeline(Box::new(detector), Classifier::default(), every_frame());
    let policy = AcquirePolicy {
        loop_file: false,
        ..AcquirePolicy::default()
    };
    let mut acquirer = FrameAcquirer::new(SyntheticSource::new(32, 24, Some(5)), policy);
    let stop = AtomicBool::new(false);

    let mut seen = Vec::new();
    let end = pipeline
        .run(&mut acquirer, &stop, None, |report| seen.push(report.frame_index))
        .unwrap();

    assert_eq!(end, RunEnd::EndOfStream);
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[test]
fn run_honours_frame_limit_and_stop_requests() {
    let detector = ReplayBackend::new(vec![vec![]]);
    let (mut pipeline, _) = pipeline(Box::new(detector), Classifier::default(), every_frame());
    let mut acquirer =
        FrameAcquirer::new(SyntheticSource::new(32, 24, Some(4)), AcquirePolicy::default());
    let stop = AtomicBool::new(false);

    let end = pipeline.run(&mut acquirer, &stop, Some(6), |_| {}).unwrap();
    assert_eq!(end, RunEnd::FrameLimit);
    assert_eq!(pipeline.stats().frames, 6);

    let mut acquirer =
        FrameAcquirer::new(SyntheticSource::new(32, 24, None), AcquirePolicy::default());
    let end = pipeline
        .run(&mut acquirer, &stop, None, |report| {
            if report.frame_index == 2 {
                stop.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();
    assert_eq!(end, RunEnd::Stopped);
    assert_eq!(pipeline.stats().frames, 8);
}
