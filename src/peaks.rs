use log::{debug, warn};
use serde::Serialize;

/// Distance of the virtual neighbours placed before the first and after the last index.
pub const EDGE_PAD: usize = 10_000;

/// Peak and trough sample indices of one channel, both strictly increasing.
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct PeakSet {
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
}

impl PeakSet {
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty() && self.troughs.is_empty()
    }
}

/// What a peak detector produced for one signal.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PeakOutcome {
    Found(PeakSet),
    NoPeaks,
    DetectorUnavailable { reason: String },
}

impl PeakOutcome {
    /// Collapse to a peak set; anything but `Found` is empty.
    pub fn into_peak_set(self) -> PeakSet {
        match self {
            PeakOutcome::Found(set) => set,
            PeakOutcome::NoPeaks => PeakSet::default(),
            PeakOutcome::DetectorUnavailable { reason } => {
                warn!("Peak detector unavailable, continuing without peaks: {}", reason);
                PeakSet::default()
            }
        }
    }
}

/// Drop indices whose amplitude is further than `amp_thresh` from the mean amplitude.
pub fn prune_by_amplitude(frame: &[f32], indices: &[usize], amp_thresh: f32) -> Vec<usize> {
    let in_bounds: Vec<usize> = indices.iter().copied().filter(|&i| i < frame.len()).collect();
    if in_bounds.is_empty() {
        return Vec::new();
    }

    let mean = in_bounds.iter().map(|&i| frame[i]).sum::<f32>() / in_bounds.len() as f32;
    let (lower, upper) = (mean - amp_thresh, mean + amp_thresh);

    in_bounds
        .into_iter()
        .filter(|&i| frame[i] >= lower && frame[i] <= upper)
        .collect()
}

/// Keep the first run of indices whose spacing is consistent with the mean gap.
///
/// An index is inconsistent when both its left and right gap exceed
/// `mean_gap + dist_thresh`; the outermost indices are measured against a virtual
/// neighbour [`EDGE_PAD`] samples away. Inconsistent indices before the run are
/// skipped, the first one after it ends the run.
pub fn prune_by_spacing(indices: &[usize], dist_thresh: f32) -> Vec<usize> {
    if indices.is_empty() {
        return Vec::new();
    }

    // gaps[i] is the left gap of indices[i], gaps[i + 1] its right gap
    let mut gaps = Vec::with_capacity(indices.len() + 1);
    gaps.push(EDGE_PAD as f32);
    gaps.extend(indices.windows(2).map(|w| w[1] as f32 - w[0] as f32));
    gaps.push(EDGE_PAD as f32);

    let interior = &gaps[1..gaps.len() - 1];
    let delta = if interior.is_empty() {
        0.0
    } else {
        interior.iter().sum::<f32>() / interior.len() as f32
    };
    let limit = delta + dist_thresh;

    let mut run = Vec::new();
    for (i, &idx) in indices.iter().enumerate() {
        let consistent = gaps[i] <= limit || gaps[i + 1] <= limit;
        if consistent {
            run.push(idx);
        } else if !run.is_empty() {
            break;
        }
    }
    run
}

/// Amplitude pruning followed by spacing pruning.
pub fn prune_indices(
    frame: &[f32],
    indices: &[usize],
    amp_thresh: f32,
    dist_thresh: f32,
) -> Vec<usize> {
    let by_amplitude = prune_by_amplitude(frame, indices, amp_thresh);
    let pruned = prune_by_spacing(&by_amplitude, dist_thresh);
    debug!(
        "prune_indices: {} -> {} (amplitude) -> {} (spacing)",
        indices.len(),
        by_amplitude.len(),
        pruned.len()
    );
    pruned
}

/// Prune peaks and troughs independently with the same thresholds.
pub fn prune_peak_set(
    frame: &[f32],
    raw: &PeakSet,
    amp_thresh: f32,
    dist_thresh: f32,
) -> PeakSet {
    PeakSet {
        peaks: prune_indices(frame, &raw.peaks, amp_thresh, dist_thresh),
        troughs: prune_indices(frame, &raw.troughs, amp_thresh, dist_thresh),
    }
}
