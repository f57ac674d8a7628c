use log::debug;
use serde::Serialize;

/// Good runs shorter than this are treated as unreliable fragments.
pub const MIN_GOOD_RUN: usize = 800;

/// Default number of samples repaired past the end of a selected run.
pub const DEFAULT_REPAIR_BUFFER: usize = 50;

/// A maximal stretch of equal values in the bad/good mask.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RunSegment {
    pub bad: bool,
    pub start: usize,
    pub length: usize,
}

impl RunSegment {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Replace NaN samples with zero.
pub fn clear_nans(data: &[f32]) -> Vec<f32> {
    data.iter()
        .map(|&x| if x.is_nan() { 0.0 } else { x })
        .collect()
}

/// Median of the samples, averaging the two middle values for even lengths.
pub fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Split a boolean mask into consecutive runs, left to right.
pub fn run_segments(mask: &[bool]) -> Vec<RunSegment> {
    let mut runs = Vec::new();
    let Some(&first) = mask.first() else {
        return runs;
    };

    let mut current = RunSegment {
        bad: first,
        start: 0,
        length: 0,
    };
    for (i, &bad) in mask.iter().enumerate() {
        if bad != current.bad {
            runs.push(current);
            current = RunSegment {
                bad,
                start: i,
                length: 0,
            };
        }
        current.length += 1;
    }
    runs.push(current);
    runs
}

/// Neutralize amplitude outliers without changing the frame length.
///
/// Samples further than `amp_thresh` from the median are bad. Every bad run, and
/// every good run shorter than [`MIN_GOOD_RUN`], is overwritten with the median
/// up to `buffer` samples past the start of the following run (or to the end of
/// the frame for the last run).
pub fn repair_runs(frame: &[f32], amp_thresh: f32, buffer: usize) -> Vec<f32> {
    let med = median(frame);
    let mask: Vec<bool> = frame.iter().map(|&x| (x - med).abs() > amp_thresh).collect();
    let runs = run_segments(&mask);

    if runs.len() < 2 {
        return frame.to_vec();
    }

    let mut repaired = frame.to_vec();
    let mut repaired_runs = 0;
    for (i, run) in runs.iter().enumerate() {
        if !run.bad && run.length >= MIN_GOOD_RUN {
            continue;
        }
        let end = match runs.get(i + 1) {
            Some(next) => (next.start + buffer).min(frame.len()),
            None => frame.len(),
        };
        repaired[run.start..end].fill(med);
        repaired_runs += 1;
    }

    debug!(
        "repair_runs: {} runs, {} repaired (median {:.1}, amp_thresh {:.1})",
        runs.len(),
        repaired_runs,
        med,
        amp_thresh
    );

    repaired
}

/// Invert pulse polarity so that systolic peaks point up.
pub fn flip(data: &[f32]) -> Vec<f32> {
    let max_val = data.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    data.iter().map(|&x| max_val - x).collect()
}

/// Split into `floor(len / win_len)` windows of exactly `win_len` samples.
/// Trailing samples that do not fill a window are dropped.
pub fn split_windows(data: &[f32], win_len: usize) -> Vec<Vec<f32>> {
    if win_len == 0 {
        return Vec::new();
    }
    data.chunks_exact(win_len).map(|w| w.to_vec()).collect()
}

/// Sample-index derivative: central differences inside, one-sided at the edges.
pub fn gradient(data: &[f32]) -> Vec<f32> {
    let n = data.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = vec![0.0; n];
    out[0] = data[1] - data[0];
    out[n - 1] = data[n - 1] - data[n - 2];
    for i in 1..n - 1 {
        out[i] = (data[i + 1] - data[i - 1]) / 2.0;
    }
    out
}

/// Element-wise mean of two equally long channels.
pub fn average_channels(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(&x, &y)| (x + y) / 2.0).collect()
}
