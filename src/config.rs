use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::{
    Classifier, DetectionMode, PriorityRule, DEFAULT_CUSTOM_EMERGENCY_KEYWORDS,
};
use crate::error::SentinelError;
use crate::export::{ExportFormat, ExportOptions};
use crate::pipeline::Cadence;
use crate::recognize::{TextCandidate, TextQualifier};

const DEFAULT_STREAM_PATH: &str = "/stream";
const DEFAULT_RETRY_DELAY_MS: u64 = 100;
const DEFAULT_RECONNECT_AFTER: u32 = 3;
const DEFAULT_PLAYBACK_SPEED: f32 = 1.0;
const DEFAULT_FALLBACK_FPS: f32 = 30.0;
const DEFAULT_PROCESS_SCALE: f32 = 0.75;
const DEFAULT_RECOGNITION_INTERVAL: u64 = 15;
const DEFAULT_MAINTENANCE_INTERVAL: u64 = 30;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;
const DEFAULT_FAILURE_BACKOFF_MS: u64 = 500;
const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 3;
const DEFAULT_ACTUATOR_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_EXPORT_PREFIX: &str = "vehicle_detections";

/// Detection interval when recognition is on; every frame is detected otherwise.
const RECOGNITION_DETECTION_INTERVAL: u64 = 3;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    recognition: Option<RecognitionConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    actuator: Option<ActuatorConfigFile>,
    log: Option<LogConfigFile>,
    export: Option<ExportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    video: Option<PathBuf>,
    url: Option<String>,
    stream_path: Option<String>,
    loop_file: Option<bool>,
    retry_delay_ms: Option<u64>,
    reconnect_after: Option<u32>,
    playback_speed: Option<f32>,
    fallback_fps: Option<f32>,
    process_scale: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    mode: Option<DetectionMode>,
    pedestrians: Option<bool>,
    detection_interval: Option<u64>,
    recognition_interval: Option<u64>,
    maintenance_interval: Option<u64>,
    min_confidence: Option<f32>,
    max_vehicles: Option<usize>,
    failure_backoff_ms: Option<u64>,
    backend: Option<DetectorBackendKind>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognitionConfigFile {
    enabled: Option<bool>,
    backend: Option<RecognitionBackendKind>,
    timeout_ms: Option<u64>,
    min_confidence: Option<f32>,
    min_len: Option<usize>,
    max_len: Option<usize>,
    cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    emergency_keywords: Option<Vec<String>>,
    priority_table: Option<Vec<PriorityRule>>,
}

#[derive(Debug, Deserialize, Default)]
struct ActuatorConfigFile {
    enabled: Option<bool>,
    host: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LogConfigFile {
    max_entries: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ExportConfigFile {
    dir: Option<PathBuf>,
    prefix: Option<String>,
    format: Option<ExportFormat>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    pub detector: DetectorSettings,
    pub recognition: RecognitionSettings,
    pub classifier: ClassifierSettings,
    pub actuator: ActuatorSettings,
    pub log: LogSettings,
    pub export: ExportSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub video: Option<PathBuf>,
    /// Host, `host:port`, or full stream URL.
    pub url: Option<String>,
    pub stream_path: String,
    pub loop_file: bool,
    pub retry_delay: Duration,
    /// Consecutive failed reads before a live source reconnects.
    pub reconnect_after: u32,
    pub playback_speed: f32,
    /// Used when a file reports no usable frame rate.
    pub fallback_fps: f32,
    pub process_scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub mode: DetectionMode,
    pub pedestrians: bool,
    pub detection_interval: Option<u64>,
    pub recognition_interval: u64,
    pub maintenance_interval: u64,
    pub min_confidence: f32,
    pub max_vehicles: usize,
    pub failure_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DetectorBackendKind {
    /// Replays a JSON detection script; an empty script detects nothing.
    Replay {
        #[serde(default)]
        script: Option<PathBuf>,
    },
    Http { endpoint: String },
}

impl Default for DetectorBackendKind {
    fn default() -> Self {
        DetectorBackendKind::Replay { script: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: DetectorBackendKind,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecognitionBackendKind {
    Noop,
    Fixed {
        #[serde(default)]
        candidates: Vec<TextCandidate>,
    },
    Http { endpoint: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionSettings {
    pub enabled: bool,
    pub backend: RecognitionBackendKind,
    pub timeout_ms: u64,
    pub min_confidence: f32,
    pub min_len: usize,
    pub max_len: usize,
    pub cache_ttl_secs: u64,
}

impl RecognitionSettings {
    pub fn qualifier(&self) -> TextQualifier {
        TextQualifier {
            min_confidence: self.min_confidence,
            min_len: self.min_len,
            max_len: self.max_len,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierSettings {
    /// Added to the built-in emergency keywords. Defaults to
    /// `emergency`, `patrol` and `rescue`.
    pub emergency_keywords: Vec<String>,
    /// Replaces the built-in priority table when set.
    pub priority_table: Option<Vec<PriorityRule>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorSettings {
    pub enabled: bool,
    pub host: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// Zero means unbounded.
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub dir: PathBuf,
    pub prefix: String,
    pub format: ExportFormat,
}

impl SentinelConfig {
    /// Load from `$SENTINEL_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        Self::finish(file_cfg.unwrap_or_default())
    }

    /// Load from an explicit file, then environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::finish(read_config_file(path)?)
    }

    fn finish(file: SentinelConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let recognition = file.recognition.unwrap_or_default();
        let classifier = file.classifier.unwrap_or_default();
        let actuator = file.actuator.unwrap_or_default();
        let log = file.log.unwrap_or_default();
        let export = file.export.unwrap_or_default();

        Self {
            source: SourceSettings {
                video: source.video,
                url: source.url,
                stream_path: source
                    .stream_path
                    .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string()),
                loop_file: source.loop_file.unwrap_or(true),
                retry_delay: Duration::from_millis(
                    source.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
                ),
                reconnect_after: source.reconnect_after.unwrap_or(DEFAULT_RECONNECT_AFTER),
                playback_speed: source.playback_speed.unwrap_or(DEFAULT_PLAYBACK_SPEED),
                fallback_fps: source.fallback_fps.unwrap_or(DEFAULT_FALLBACK_FPS),
                process_scale: source.process_scale.unwrap_or(DEFAULT_PROCESS_SCALE),
            },
            detection: DetectionSettings {
                mode: detection.mode.unwrap_or_default(),
                pedestrians: detection.pedestrians.unwrap_or(false),
                detection_interval: detection.detection_interval,
                recognition_interval: detection
                    .recognition_interval
                    .unwrap_or(DEFAULT_RECOGNITION_INTERVAL),
                maintenance_interval: detection
                    .maintenance_interval
                    .unwrap_or(DEFAULT_MAINTENANCE_INTERVAL),
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                max_vehicles: detection
                    .max_vehicles
                    .unwrap_or(crate::rank::DEFAULT_MAX_VEHICLES),
                failure_backoff: Duration::from_millis(
                    detection
                        .failure_backoff_ms
                        .unwrap_or(DEFAULT_FAILURE_BACKOFF_MS),
                ),
            },
            detector: DetectorSettings {
                backend: detection.backend.unwrap_or_default(),
                timeout_ms: detection.timeout_ms.unwrap_or(DEFAULT_ADAPTER_TIMEOUT_MS),
            },
            recognition: RecognitionSettings {
                enabled: recognition.enabled.unwrap_or(true),
                backend: recognition.backend.unwrap_or(RecognitionBackendKind::Noop),
                timeout_ms: recognition.timeout_ms.unwrap_or(DEFAULT_ADAPTER_TIMEOUT_MS),
                min_confidence: recognition
                    .min_confidence
                    .unwrap_or(TextQualifier::default().min_confidence),
                min_len: recognition
                    .min_len
                    .unwrap_or(TextQualifier::default().min_len),
                max_len: recognition
                    .max_len
                    .unwrap_or(TextQualifier::default().max_len),
                cache_ttl_secs: recognition.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS),
            },
            classifier: ClassifierSettings {
                emergency_keywords: classifier.emergency_keywords.unwrap_or_else(|| {
                    DEFAULT_CUSTOM_EMERGENCY_KEYWORDS
                        .iter()
                        .map(|keyword| keyword.to_string())
                        .collect()
                }),
                priority_table: classifier.priority_table,
            },
            actuator: ActuatorSettings {
                enabled: actuator.enabled.unwrap_or(true),
                host: actuator.host,
                timeout: Duration::from_millis(
                    actuator.timeout_ms.unwrap_or(DEFAULT_ACTUATOR_TIMEOUT_MS),
                ),
            },
            log: LogSettings {
                max_entries: log
                    .max_entries
                    .unwrap_or(crate::detection_log::DEFAULT_MAX_ENTRIES),
            },
            export: ExportSettings {
                dir: export.dir.unwrap_or_else(|| PathBuf::from(".")),
                prefix: export
                    .prefix
                    .unwrap_or_else(|| DEFAULT_EXPORT_PREFIX.to_string()),
                format: export.format.unwrap_or_default(),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(video) = env_string("SENTINEL_VIDEO") {
            self.source.video = Some(PathBuf::from(video));
        }
        if let Some(url) = env_string("SENTINEL_URL") {
            self.source.url = Some(url);
        }
        if let Some(path) = env_string("SENTINEL_STREAM_PATH") {
            self.source.stream_path = path;
        }
        if let Some(scale) = env_parse::<f32>("SENTINEL_PROCESS_SCALE")? {
            self.source.process_scale = scale;
        }
        if let Some(mode) = env_string("SENTINEL_MODE") {
            self.detection.mode = match mode.to_lowercase().as_str() {
                "vehicle" => DetectionMode::Vehicle,
                "general" => DetectionMode::General,
                other => return Err(anyhow!("SENTINEL_MODE must be vehicle or general, got {other}")),
            };
        }
        if let Some(pedestrians) = env_parse::<bool>("SENTINEL_PEDESTRIANS")? {
            self.detection.pedestrians = pedestrians;
        }
        if let Some(interval) = env_parse::<u64>("SENTINEL_DETECTION_INTERVAL")? {
            self.detection.detection_interval = Some(interval);
        }
        if let Some(interval) = env_parse::<u64>("SENTINEL_RECOGNITION_INTERVAL")? {
            self.detection.recognition_interval = interval;
        }
        if let Some(endpoint) = env_string("SENTINEL_DETECTOR_ENDPOINT") {
            self.detector.backend = DetectorBackendKind::Http { endpoint };
        } else if let Some(script) = env_string("SENTINEL_DETECTOR_SCRIPT") {
            self.detector.backend = DetectorBackendKind::Replay {
                script: Some(PathBuf::from(script)),
            };
        }
        if let Some(enabled) = env_parse::<bool>("SENTINEL_RECOGNITION_ENABLED")? {
            self.recognition.enabled = enabled;
        }
        if let Some(endpoint) = env_string("SENTINEL_RECOGNIZER_ENDPOINT") {
            self.recognition.backend = RecognitionBackendKind::Http { endpoint };
        }
        if let Some(enabled) = env_parse::<bool>("SENTINEL_ACTUATOR_ENABLED")? {
            self.actuator.enabled = enabled;
        }
        if let Some(host) = env_string("SENTINEL_ACTUATOR_HOST") {
            self.actuator.host = Some(host);
        }
        if let Some(max_entries) = env_parse::<usize>("SENTINEL_LOG_MAX_ENTRIES")? {
            self.log.max_entries = max_entries;
        }
        if let Some(dir) = env_string("SENTINEL_EXPORT_DIR") {
            self.export.dir = PathBuf::from(dir);
        }
        if let Some(format) = env_string("SENTINEL_EXPORT_FORMAT") {
            self.export.format = match format.to_lowercase().as_str() {
                "csv" => ExportFormat::Csv,
                "json" => ExportFormat::Json,
                other => {
                    return Err(anyhow!("SENTINEL_EXPORT_FORMAT must be csv or json, got {other}"))
                }
            };
        }
        Ok(())
    }

    /// Check ranges. Also run after CLI overrides are applied.
    pub fn validate(&self) -> Result<(), SentinelError> {
        let scale = self.source.process_scale;
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(SentinelError::config(format!(
                "process_scale must be in (0, 1], got {scale}"
            )));
        }
        if !(self.source.playback_speed > 0.0) {
            return Err(SentinelError::config("playback_speed must be greater than zero"));
        }
        if !(self.source.fallback_fps > 0.0) {
            return Err(SentinelError::config("fallback_fps must be greater than zero"));
        }
        if self.source.video.is_some() && self.source.url.is_some() {
            return Err(SentinelError::config(
                "configure either a video file or a stream url, not both",
            ));
        }
        if self.detection.detection_interval == Some(0)
            || self.detection.recognition_interval == 0
            || self.detection.maintenance_interval == 0
        {
            return Err(SentinelError::config("intervals must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(SentinelError::config("detection min_confidence must be in [0, 1]"));
        }
        if self.detection.max_vehicles == 0 {
            return Err(SentinelError::config("max_vehicles must be at least 1"));
        }
        if self.recognition.min_len == 0 || self.recognition.min_len > self.recognition.max_len {
            return Err(SentinelError::config(format!(
                "recognition length bounds {}..={} are invalid",
                self.recognition.min_len, self.recognition.max_len
            )));
        }
        if let DetectorBackendKind::Http { endpoint } = &self.detector.backend {
            url::Url::parse(endpoint).map_err(|e| {
                SentinelError::config(format!("detector endpoint {endpoint}: {e}"))
            })?;
        }
        if let RecognitionBackendKind::Http { endpoint } = &self.recognition.backend {
            url::Url::parse(endpoint).map_err(|e| {
                SentinelError::config(format!("recognizer endpoint {endpoint}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Detection interval in effect: explicit, else 3 with recognition on, 1 without.
    pub fn effective_detection_interval(&self) -> u64 {
        self.detection.detection_interval.unwrap_or(if self.recognition.enabled {
            RECOGNITION_DETECTION_INTERVAL
        } else {
            1
        })
    }

    pub fn cadence(&self) -> Cadence {
        Cadence {
            detection_interval: self.effective_detection_interval(),
            recognition_interval: self.detection.recognition_interval,
            maintenance_interval: self.detection.maintenance_interval,
        }
    }

    pub fn build_classifier(&self) -> Classifier {
        let classifier = Classifier::new(self.detection.mode, self.detection.pedestrians)
            .with_emergency_keywords(&self.classifier.emergency_keywords);
        match &self.classifier.priority_table {
            Some(table) => classifier.with_priority_table(table.clone()),
            None => classifier,
        }
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            dir: self.export.dir.clone(),
            prefix: self.export.prefix.clone(),
            format: self.export.format,
            pedestrian_column: self.detection.pedestrians,
        }
    }

    /// Full stream URL of the configured live source, if any.
    pub fn stream_url(&self) -> Option<String> {
        self.source
            .url
            .as_deref()
            .map(|ip| stream_url(ip, &self.source.stream_path))
    }

    /// Actuator host: explicit, else the live source's host. File sources have none.
    pub fn actuator_host(&self) -> Option<String> {
        if !self.actuator.enabled {
            return None;
        }
        if let Some(host) = &self.actuator.host {
            return Some(host.clone());
        }
        if self.source.video.is_some() {
            return None;
        }
        self.stream_url().as_deref().and_then(host_of)
    }
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self::from_file(SentinelConfigFile::default())
    }
}

/// Bare host (`192.168.1.50`, `cam:81`) becomes `http://{host}{stream_path}`;
/// anything with a scheme is used as is.
pub fn stream_url(ip: &str, stream_path: &str) -> String {
    let ip = ip.trim();
    if ip.contains("://") {
        return ip.to_string();
    }
    let path = if stream_path.starts_with('/') || stream_path.is_empty() {
        stream_path.to_string()
    } else {
        format!("/{stream_path}")
    };
    format!("http://{}{}", ip.trim_end_matches('/'), path)
}

fn host_of(stream_url: &str) -> Option<String> {
    let parsed = url::Url::parse(stream_url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{key} has an invalid value: {raw}")),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Category;

    #[test]
    fn defaults_match_reference_configuration() {
        let cfg = SentinelConfig::default();
        assert_eq!(cfg.source.stream_path, "/stream");
        assert_eq!(cfg.source.process_scale, 0.75);
        assert_eq!(cfg.detection.max_vehicles, 5);
        assert_eq!(cfg.recognition.cache_ttl_secs, 3);
        assert_eq!(cfg.log.max_entries, 10_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn detection_interval_follows_recognition() {
        let mut cfg = SentinelConfig::default();
        assert_eq!(cfg.effective_detection_interval(), 3);
        cfg.recognition.enabled = false;
        assert_eq!(cfg.effective_detection_interval(), 1);
        cfg.detection.detection_interval = Some(7);
        assert_eq!(cfg.cadence().detection_interval, 7);
    }

    #[test]
    fn default_custom_keywords_short_circuit_to_high() {
        let classifier = SentinelConfig::default().build_classifier();
        for label in ["patrol car", "rescue truck", "emergency car", "police car"] {
            assert_eq!(classifier.classify(label), Some(Category::High), "{label}");
        }
        assert_eq!(classifier.classify("delivery truck"), Some(Category::Medium));
        assert_eq!(classifier.classify("taxi"), Some(Category::Low));
    }

    #[test]
    fn stream_urls_from_bare_hosts() {
        assert_eq!(stream_url("192.168.1.50", "/stream"), "http://192.168.1.50/stream");
        assert_eq!(stream_url("cam:81", "stream"), "http://cam:81/stream");
        assert_eq!(
            stream_url("http://cam.local/mjpeg", "/stream"),
            "http://cam.local/mjpeg"
        );
    }

    #[test]
    fn actuator_host_derives_from_live_source() {
        let mut cfg = SentinelConfig::default();
        cfg.source.url = Some("192.168.1.50:81".to_string());
        assert_eq!(cfg.actuator_host().as_deref(), Some("192.168.1.50:81"));
        cfg.actuator.enabled = false;
        assert_eq!(cfg.actuator_host(), None);

        let mut cfg = SentinelConfig::default();
        cfg.source.video = Some(PathBuf::from("clip.mp4"));
        assert_eq!(cfg.actuator_host(), None);
    }

    #[test]
    fn rejects_out_of_range_scale() {
        let mut cfg = SentinelConfig::default();
        cfg.source.process_scale = 0.0;
        assert!(matches!(cfg.validate(), Err(SentinelError::Config { .. })));
        cfg.source.process_scale = 1.5;
        assert!(cfg.validate().is_err());
        cfg.source.process_scale = 1.0;
        assert!(cfg.validate().is_ok());
    }
}
