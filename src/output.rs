use crate::data_loading::FrameEvent;
use crate::pipeline::FrameResult;
use crate::validation::{Status, ValidationResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Per-window statistics, one CSV row each.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub ts: DateTime<Utc>,
    pub seq: u32,
    pub window: usize,
    pub status: Status,
    pub f0: f32,
    pub snr: f32,
    pub beat_sim: f32,
    pub notches: bool,
    pub flat_lines: bool,
}

impl WindowSummary {
    pub fn new(event: &FrameEvent, window: usize, result: &ValidationResult) -> Self {
        Self {
            ts: event.ts,
            seq: event.seq,
            window,
            status: result.status,
            f0: result.f0,
            snr: result.snr,
            beat_sim: result.beat_sim,
            notches: result.notches,
            flat_lines: result.flat_lines,
        }
    }
}

#[derive(Serialize)]
struct FrameDocument<'a> {
    ts: DateTime<Utc>,
    seq: u32,
    frame: &'a FrameResult,
    validations: &'a [ValidationResult],
}

/// Resolve `<dir>/<stem>_<suffix>.<ext>` from an output prefix, creating `<dir>`.
fn output_file(base_path: &str, suffix: &str, ext: &str) -> Result<PathBuf> {
    let path = Path::new(base_path);
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let stem = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    Ok(dir.join(format!("{}_{}.{}", stem, suffix, ext)))
}

pub fn write_windows_to_csv(base_path: &str, rows: &[WindowSummary]) -> Result<PathBuf> {
    let full_path = output_file(base_path, "windows", "csv")?;
    info!("Writing {} window rows to {}", rows.len(), full_path.display());

    let file = std::fs::File::create(&full_path)
        .with_context(|| format!("Failed to create {}", full_path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record([
        "timestamp",
        "seq",
        "window",
        "status",
        "f0",
        "snr",
        "beat_sim",
        "notches",
        "flat_lines",
    ])?;

    for row in rows {
        let status = match row.status {
            Status::Valid => "valid",
            Status::Invalid => "invalid",
        };
        writer.write_record(&[
            row.ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            row.seq.to_string(),
            row.window.to_string(),
            status.to_string(),
            row.f0.to_string(),
            row.snr.to_string(),
            row.beat_sim.to_string(),
            row.notches.to_string(),
            row.flat_lines.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(full_path)
}

/// Write the conditioned frame and the validation of each of its windows as JSON.
pub fn write_frame_json(
    base_path: &str,
    event: &FrameEvent,
    frame: &FrameResult,
    validations: &[ValidationResult],
) -> Result<PathBuf> {
    let full_path = output_file(base_path, &format!("frame_{}", event.seq), "json")?;
    let file = std::fs::File::create(&full_path)
        .with_context(|| format!("Failed to create {}", full_path.display()))?;

    let document = FrameDocument {
        ts: event.ts,
        seq: event.seq,
        frame,
        validations,
    };
    serde_json::to_writer(std::io::BufWriter::new(file), &document)
        .with_context(|| format!("Failed to write {}", full_path.display()))?;
    Ok(full_path)
}
