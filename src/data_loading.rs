use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{Array, ArrayRef, Float32Array, Int32Array, ListArray, StringArray};
use arrow::ipc::reader::FileReaderBuilder;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, trace, warn};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct BatchItem {
    seq: u32,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[allow(dead_code)]
pub enum SensorData {
    #[serde(rename = "ppg-dual")]
    PpgDual {
        ts: i64,
        #[serde(default)]
        freq: u16,
        #[serde(with = "serde_bytes")]
        red: Vec<u8>,
        #[serde(with = "serde_bytes")]
        ir: Vec<u8>,
    },
}

/// One acquisition event: a red and an infrared frame sampled together.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEvent {
    pub ts: DateTime<Utc>,
    pub seq: u32,
    pub red: Vec<f32>,
    pub ir: Vec<f32>,
}

fn le_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f32)
        .collect()
}

impl SensorData {
    pub fn into_event(self, seq: u32) -> Option<FrameEvent> {
        let SensorData::PpgDual { ts, red, ir, .. } = self;
        let ts = DateTime::from_timestamp(ts, 0)?;
        Some(FrameEvent {
            ts,
            seq,
            red: le_samples(&red),
            ir: le_samples(&ir),
        })
    }
}

#[derive(Debug)]
pub struct RawFileInfo {
    pub path: PathBuf,
    pub first_seq: u32,
    pub last_seq: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Decode a stream of CBOR batch items, skipping the ones that do not parse.
pub fn decode_batch_item(file_path: &Path) -> Result<Vec<(u32, SensorData)>> {
    let file = File::open(file_path)
        .with_context(|| format!("Failed to open file: {}", file_path.display()))?;
    let mut reader = BufReader::new(file);
    let mut items = Vec::new();

    loop {
        let batch_item: BatchItem = match ciborium::from_reader(&mut reader) {
            Ok(item) => item,
            Err(ciborium::de::Error::Io(error))
                if error.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(ciborium::de::Error::Io(error)) => {
                return Err(error)
                    .with_context(|| format!("Failed to read {}", file_path.display()));
            }
            Err(e) => {
                warn!("Skipping malformed CBOR data in {}: {}", file_path.display(), e);
                continue;
            }
        };

        match ciborium::from_reader(batch_item.data.as_slice()) {
            Ok(sensor_data) => items.push((batch_item.seq, sensor_data)),
            Err(e) => trace!("Skipping seq {}: {}", batch_item.seq, e),
        }
    }

    Ok(items)
}

/// Frame events from every `.RAW` file below `raw_dir`, ordered by sequence number.
pub fn read_raw_dir(raw_dir: &Path) -> Result<Vec<FrameEvent>> {
    let mut events = Vec::new();
    for (_, items) in scan_raw_files(raw_dir)? {
        for (seq, data) in items {
            match data.into_event(seq) {
                Some(event) => events.push(event),
                None => warn!("Skipping seq {} with out-of-range timestamp", seq),
            }
        }
    }
    events.sort_by_key(|e| (e.seq, e.ts));
    Ok(events)
}

pub fn build_raw_file_index(raw_dir: &Path) -> Result<Vec<RawFileInfo>> {
    Ok(scan_raw_files(raw_dir)?
        .into_iter()
        .map(|(info, _)| info)
        .collect())
}

/// Decode every non-empty `.RAW` file once, keeping its items next to its index entry.
fn scan_raw_files(raw_dir: &Path) -> Result<Vec<(RawFileInfo, Vec<(u32, SensorData)>)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(raw_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to scan {}", raw_dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|s| s.to_str()) != Some("RAW")
        {
            continue;
        }

        debug!("Indexing file: {}", path.display());
        let items = decode_batch_item(path)?;
        if items.is_empty() {
            info!("Skipping empty file: {}", path.display());
            continue;
        }

        let mut first_seq = u32::MAX;
        let mut last_seq = 0;
        let mut start_time = DateTime::<Utc>::MAX_UTC;
        let mut end_time = DateTime::<Utc>::MIN_UTC;

        for (seq, data) in &items {
            let SensorData::PpgDual { ts, .. } = data;
            first_seq = first_seq.min(*seq);
            last_seq = last_seq.max(*seq);
            if let Some(timestamp) = DateTime::from_timestamp(*ts, 0) {
                start_time = start_time.min(timestamp);
                end_time = end_time.max(timestamp);
            }
        }

        let info = RawFileInfo {
            path: path.to_path_buf(),
            first_seq,
            last_seq,
            start_time,
            end_time,
        };
        files.push((info, items));
    }

    files.sort_by_key(|(info, _)| info.first_seq);

    info!("Found {} RAW files", files.len());
    for (info, _) in &files {
        debug!(
            "  {} (seq: {} to {}, time: {} to {})",
            info.path.display(),
            info.first_seq,
            info.last_seq,
            info.start_time.format(TS_FORMAT),
            info.end_time.format(TS_FORMAT)
        );
    }

    Ok(files)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(NaiveDateTime::parse_from_str(s.trim(), TS_FORMAT)
        .with_context(|| format!("Invalid timestamp: {}", s))?
        .and_utc())
}

/// Parse a bracketed, whitespace separated signal such as `[1 2  3]`.
fn parse_signal(s: &str) -> Result<Vec<f32>> {
    s.trim_matches(|c| c == '[' || c == ']' || c == ' ')
        .split_whitespace()
        .map(|v| v.parse::<f32>())
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| anyhow!("Failed to parse signal data: {}", e))
}

pub fn read_csv_file(path: &Path) -> Result<Vec<FrameEvent>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    let position = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("{} column missing in {}", name, path.display()))
    };
    let (ts_idx, seq_idx, red_idx, ir_idx) =
        (position("ts")?, position("seq")?, position("red")?, position("ir")?);

    let mut events = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        let field = |idx: usize| {
            record
                .get(idx)
                .ok_or_else(|| anyhow!("Row {} is missing field {}", line + 1, idx))
        };

        events.push(FrameEvent {
            ts: parse_ts(field(ts_idx)?)?,
            seq: field(seq_idx)?
                .trim()
                .parse()
                .with_context(|| format!("Invalid seq on row {}", line + 1))?,
            red: parse_signal(field(red_idx)?)?,
            ir: parse_signal(field(ir_idx)?)?,
        });
    }

    Ok(events)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("{} column missing", name))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("{} column has an unexpected type", name))
}

fn list_values(values: ArrayRef, name: &str) -> Result<Vec<f32>> {
    if let Some(floats) = values.as_any().downcast_ref::<Float32Array>() {
        Ok(floats.values().to_vec())
    } else if let Some(ints) = values.as_any().downcast_ref::<Int32Array>() {
        Ok(ints.values().iter().map(|&v| v as f32).collect())
    } else {
        bail!("{} values should be f32 or i32, found {}", name, values.data_type())
    }
}

pub fn read_feather_file(path: &Path) -> Result<Vec<FrameEvent>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = FileReaderBuilder::new()
        .build(file)
        .with_context(|| format!("Not a Feather file: {}", path.display()))?;
    let mut events = Vec::new();
    let mut seq = 0;

    for batch in reader {
        let batch = batch?;
        let ts_col = column::<StringArray>(&batch, "ts")?;
        let red_col = column::<ListArray>(&batch, "red")?;
        let ir_col = column::<ListArray>(&batch, "ir")?;

        for row in 0..batch.num_rows() {
            if red_col.is_null(row) || ir_col.is_null(row) {
                warn!("Skipping row {} with a missing channel", row);
                continue;
            }
            events.push(FrameEvent {
                ts: parse_ts(ts_col.value(row))?,
                seq,
                red: list_values(red_col.value(row), "red")?,
                ir: list_values(ir_col.value(row), "ir")?,
            });
            seq += 1;
        }
    }

    Ok(events)
}
