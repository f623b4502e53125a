//! Detection log export.
//!
//! Exports always work from a `DetectionLog::snapshot`, so they neither see
//! records appended after the copy nor hold up the frame loop while writing.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::detection_log::{DetectionLog, LogRecord};
use crate::error::SentinelError;

/// Human-readable timestamp format used in exports.
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BASE_COLUMNS: [&str; 4] = ["Timestamp", "Label", "Category", "Recognized-Text"];
const PEDESTRIAN_COLUMN: &str = "Nearby-Pedestrians";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

/// Where and how exports are written.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportOptions {
    pub dir: PathBuf,
    pub prefix: String,
    pub format: ExportFormat,
    /// Adds the `Nearby-Pedestrians` column.
    pub pedestrian_column: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "vehicle_detections".to_string(),
            format: ExportFormat::Csv,
            pedestrian_column: false,
        }
    }
}

#[derive(Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Label")]
    label: &'a str,
    #[serde(rename = "Category")]
    category: &'a str,
    #[serde(rename = "Recognized-Text")]
    recognized_text: &'a str,
    #[serde(rename = "Nearby-Pedestrians", skip_serializing_if = "Option::is_none")]
    pedestrians_nearby: Option<usize>,
}

impl<'a> ExportRow<'a> {
    fn new(record: &'a LogRecord, pedestrian_column: bool) -> Self {
        Self {
            timestamp: record.timestamp.format(EXPORT_TIMESTAMP_FORMAT).to_string(),
            label: &record.label,
            category: &record.category,
            recognized_text: record.text_or_na(),
            pedestrians_nearby: pedestrian_column
                .then(|| record.pedestrians_nearby.unwrap_or(0)),
        }
    }
}

/// Write `records` to `out` in the requested format, one row per record.
pub fn write_records<W: Write>(
    records: &[Arc<LogRecord>],
    format: ExportFormat,
    pedestrian_column: bool,
    out: W,
) -> Result<(), SentinelError> {
    match format {
        ExportFormat::Csv => write_csv(records, pedestrian_column, out),
        ExportFormat::Json => {
            let rows: Vec<_> = records
                .iter()
                .map(|record| ExportRow::new(record, pedestrian_column))
                .collect();
            serde_json::to_writer_pretty(out, &rows).map_err(SentinelError::export)
        }
    }
}

fn write_csv<W: Write>(
    records: &[Arc<LogRecord>],
    pedestrian_column: bool,
    out: W,
) -> Result<(), SentinelError> {
    let mut out = BufWriter::new(out);
    let mut header: Vec<&str> = BASE_COLUMNS.to_vec();
    if pedestrian_column {
        header.push(PEDESTRIAN_COLUMN);
    }
    write_csv_line(&mut out, header.iter().copied())?;

    for record in records {
        let row = ExportRow::new(record, pedestrian_column);
        let pedestrians = row.pedestrians_nearby.map(|count| count.to_string());
        let mut fields = vec![
            row.timestamp.as_str(),
            row.label,
            row.category,
            row.recognized_text,
        ];
        if let Some(count) = pedestrians.as_deref() {
            fields.push(count);
        }
        write_csv_line(&mut out, fields.into_iter())?;
    }
    out.flush().map_err(SentinelError::export)
}

fn write_csv_line<'a, W: Write>(
    out: &mut W,
    fields: impl Iterator<Item = &'a str>,
) -> Result<(), SentinelError> {
    let line = fields.map(escape_csv).collect::<Vec<_>>().join(",");
    writeln!(out, "{}", line).map_err(SentinelError::export)
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// File name for an export taken now.
pub fn export_file_name(prefix: &str, format: ExportFormat) -> String {
    format!(
        "{}_{}.{}",
        prefix,
        Local::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Snapshot `log` and write it under `options.dir`. Returns the written path.
pub fn export_log(log: &DetectionLog, options: &ExportOptions) -> Result<PathBuf, SentinelError> {
    let records = log.snapshot();
    let path = options
        .dir
        .join(export_file_name(&options.prefix, options.format));
    write_to_path(&records, options, &path)?;
    log::info!("exported {} records to {}", records.len(), path.display());
    Ok(path)
}

fn write_to_path(
    records: &[Arc<LogRecord>],
    options: &ExportOptions,
    path: &Path,
) -> Result<(), SentinelError> {
    let file = File::create(path).map_err(|e| {
        SentinelError::export(format!("cannot create {}: {}", path.display(), e))
    })?;
    write_records(records, options.format, options.pedestrian_column, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(label: &str, text: Option<&str>, pedestrians: Option<usize>) -> Arc<LogRecord> {
        let ts = Local.with_ymd_and_hms(2024, 5, 17, 8, 30, 5).unwrap();
        Arc::new(
            LogRecord::new(label, "LOW")
                .with_timestamp(ts)
                .with_text(text.map(str::to_string))
                .with_pedestrians(pedestrians),
        )
    }

    #[test]
    fn csv_has_header_and_one_row_per_record() {
        let records = vec![record("car", Some("AB-1234"), None), record("bus, big", None, None)];
        let mut out = Vec::new();
        write_records(&records, ExportFormat::Csv, false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Timestamp,Label,Category,Recognized-Text");
        assert_eq!(lines[1], "2024-05-17 08:30:05,car,LOW,AB-1234");
        assert_eq!(lines[2], "2024-05-17 08:30:05,\"bus, big\",LOW,N/A");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn pedestrian_column_is_optional() {
        let records = vec![record("car", None, Some(2))];
        let mut out = Vec::new();
        write_records(&records, ExportFormat::Csv, true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Timestamp,Label,Category,Recognized-Text,Nearby-Pedestrians\n"));
        assert!(text.contains(",N/A,2\n"));
    }

    #[test]
    fn json_rows_use_export_columns() {
        let records = vec![record("car", None, None)];
        let mut out = Vec::new();
        write_records(&records, ExportFormat::Json, false, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["Label"], "car");
        assert_eq!(value[0]["Recognized-Text"], "N/A");
        assert!(value[0].get("Nearby-Pedestrians").is_none());
    }

    #[test]
    fn file_names_carry_prefix_and_extension() {
        let name = export_file_name("vehicle_detections", ExportFormat::Csv);
        assert!(name.starts_with("vehicle_detections_"));
        assert!(name.ends_with(".csv"));
    }
}
