use crate::dsp::PeakDetector;
use crate::peaks::{PeakOutcome, PeakSet};
use crate::preprocessing::{flip, gradient};
use log::{debug, trace};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Create a Hann window of the specified size
pub fn create_hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Centered moving average over `window_size` seconds, shrinking at the edges
/// like scipy's uniform_filter1d with `nearest` bounds replaced by truncation.
pub fn rolling_mean(data: &[f32], window_size: f32, sample_rate: f32) -> Vec<f32> {
    let size = (window_size * sample_rate) as usize;
    let half = size / 2;
    let mut result = vec![0.0; data.len()];

    for i in 0..data.len() {
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(data.len());
        result[i] = data[start..end].iter().sum::<f32>() / (end - start) as f32;
    }

    result
}

/// Detect peaks using moving average, the HeartPy way:
/// points above `rol_mean + mean(rol_mean / 100) * ma_perc` are grouped into
/// consecutive runs and the maximum of each run is a peak.
pub fn detect_peaks(data: &[f32], rol_mean: &[f32], ma_perc: f32) -> Vec<usize> {
    if rol_mean.is_empty() {
        return Vec::new();
    }
    let mn = rol_mean.iter().map(|&x| x / 100.0).sum::<f32>() / rol_mean.len() as f32 * ma_perc;

    let above: Vec<usize> = (0..data.len().min(rol_mean.len()))
        .filter(|&i| data[i] > rol_mean[i] + mn)
        .collect();

    if above.is_empty() {
        return Vec::new();
    }

    // Find edges of consecutive sequences (where diff > 1)
    let mut edges = vec![0];
    for i in 1..above.len() {
        if above[i] - above[i - 1] > 1 {
            edges.push(i);
        }
    }
    edges.push(above.len());

    edges
        .windows(2)
        .filter_map(|w| {
            above[w[0]..w[1]]
                .iter()
                .copied()
                .max_by(|&a, &b| data[a].total_cmp(&data[b]))
        })
        .collect()
}

/// Rolling-mean threshold detector. Troughs are the peaks of the flipped signal.
#[derive(Debug, Clone, Copy)]
pub struct RollingMeanDetector {
    pub sample_rate: f32,
    /// Rolling mean window in seconds.
    pub window_size: f32,
    pub ma_perc: f32,
}

impl PeakDetector for RollingMeanDetector {
    fn detect(&self, signal: &[f32]) -> PeakOutcome {
        let window = (self.window_size * self.sample_rate) as usize;
        if window == 0 {
            return PeakOutcome::DetectorUnavailable {
                reason: format!(
                    "rolling window of {} s at {} Hz is empty",
                    self.window_size, self.sample_rate
                ),
            };
        }
        if signal.len() < 3 {
            return PeakOutcome::DetectorUnavailable {
                reason: format!("signal of {} samples is too short", signal.len()),
            };
        }
        if signal.iter().any(|x| !x.is_finite()) {
            return PeakOutcome::DetectorUnavailable {
                reason: "signal contains non-finite samples".into(),
            };
        }

        // HeartPy expects a non-negative signal
        let min_val = signal.iter().fold(f32::INFINITY, |a, &b| a.min(b));
        let lifted: Vec<f32> = signal.iter().map(|&x| x - min_val).collect();
        let inverted = flip(signal);

        // an extremum on the first or last sample is a truncated beat
        let last = signal.len() - 1;
        let interior = |indices: Vec<usize>| -> Vec<usize> {
            indices.into_iter().filter(|&i| i > 0 && i < last).collect()
        };
        let peaks = interior(detect_peaks(
            &lifted,
            &rolling_mean(&lifted, self.window_size, self.sample_rate),
            self.ma_perc,
        ));
        let troughs = interior(detect_peaks(
            &inverted,
            &rolling_mean(&inverted, self.window_size, self.sample_rate),
            self.ma_perc,
        ));

        debug!(
            "RollingMeanDetector: {} peaks, {} troughs over {} samples",
            peaks.len(),
            troughs.len(),
            signal.len()
        );

        if peaks.is_empty() && troughs.is_empty() {
            PeakOutcome::NoPeaks
        } else {
            PeakOutcome::Found(PeakSet { peaks, troughs })
        }
    }
}

/// Smallest FFT length used when locating the dominant frequency.
pub const MIN_SPECTRUM_LEN: usize = 4096;

/// Magnitudes of the Hann-windowed spectrum for bins `0..=n/2`.
pub fn magnitude_spectrum(signal: &[f32]) -> Vec<f32> {
    padded_magnitude_spectrum(signal, signal.len())
}

/// Magnitudes of the Hann-windowed spectrum, zero padded to `fft_len` samples,
/// for bins `0..=fft_len/2`.
pub fn padded_magnitude_spectrum(signal: &[f32], fft_len: usize) -> Vec<f32> {
    if signal.is_empty() {
        return Vec::new();
    }
    let fft_len = fft_len.max(signal.len());
    let window = create_hann_window(signal.len());
    let mut buffer = vec![Complex::new(0.0, 0.0); fft_len];
    for (b, (&s, &w)) in buffer.iter_mut().zip(signal.iter().zip(window.iter())) {
        *b = Complex::new(s * w, 0.0);
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_len);
    fft.process(&mut buffer);

    buffer[..=fft_len / 2].iter().map(|c| c.norm()).collect()
}

/// FFT length giving at least 16 interpolated bins per raw bin.
pub fn spectrum_len(n: usize) -> usize {
    (16 * n).next_power_of_two().max(MIN_SPECTRUM_LEN)
}

/// Frequency of the strongest spectral component inside `[low, high]` Hz.
///
/// The mean is removed and the spectrum zero padded to [`spectrum_len`]; the
/// peak bin is refined by parabolic interpolation over its neighbours.
pub fn dominant_frequency(signal: &[f32], sample_rate: f32, low: f32, high: f32) -> Option<f32> {
    if signal.is_empty() {
        return None;
    }
    let mean = signal.iter().sum::<f32>() / signal.len() as f32;
    let centered: Vec<f32> = signal.iter().map(|&x| x - mean).collect();

    let fft_len = spectrum_len(signal.len());
    let spectrum = padded_magnitude_spectrum(&centered, fft_len);
    let freq_resolution = sample_rate / fft_len as f32;
    let min_bin = (low / freq_resolution).ceil() as usize;
    let max_bin = ((high / freq_resolution).floor() as usize).min(spectrum.len() - 1);
    if min_bin > max_bin {
        return None;
    }

    let (bin, magnitude) = (min_bin..=max_bin)
        .map(|bin| (bin, spectrum[bin]))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if !(magnitude > 0.0 && magnitude.is_finite()) {
        return None;
    }

    let mut offset = 0.0;
    if bin > min_bin && bin < max_bin {
        let (left, right) = (spectrum[bin - 1], spectrum[bin + 1]);
        let curvature = left - 2.0 * magnitude + right;
        if curvature < 0.0 {
            offset = 0.5 * (left - right) / curvature;
        }
    }
    let f0 = (bin as f32 + offset) * freq_resolution;

    trace!(
        "dominant_frequency: bin {} of {} ({:.3} Hz), magnitude {:.3}",
        bin,
        fft_len,
        f0,
        magnitude
    );

    Some(f0)
}

/// Ratio in dB between the power around `f0` and its harmonics and the power of
/// every other non-DC bin.
pub fn harmonic_snr(signal: &[f32], sample_rate: f32, f0: f32, harmonics: usize) -> Option<f32> {
    let power: Vec<f32> = magnitude_spectrum(signal).iter().map(|m| m * m).collect();
    if power.len() < 2 || f0 <= 0.0 {
        return None;
    }
    let freq_resolution = sample_rate / signal.len() as f32;

    let mut is_signal = vec![false; power.len()];
    for k in 1..=harmonics {
        let center = (k as f32 * f0 / freq_resolution).round() as usize;
        for bin in center.saturating_sub(1)..=center + 1 {
            if bin > 0 && bin < power.len() {
                is_signal[bin] = true;
            }
        }
    }

    let (mut signal_power, mut noise_power) = (0.0, 0.0);
    for (bin, &p) in power.iter().enumerate().skip(1) {
        if is_signal[bin] {
            signal_power += p;
        } else {
            noise_power += p;
        }
    }

    if signal_power <= 0.0 || noise_power <= 0.0 {
        return None;
    }
    let snr = 10.0 * (signal_power / noise_power).log10();
    snr.is_finite().then_some(snr)
}

/// Heart rate implied by the mean spacing of the peaks, in Hz.
pub fn peak_rate(peaks: &[usize], sample_rate: f32) -> Option<f32> {
    if peaks.len() < 2 {
        return None;
    }
    let mean_gap = peaks
        .windows(2)
        .map(|w| (w[1] - w[0]) as f32)
        .sum::<f32>()
        / (peaks.len() - 1) as f32;
    (mean_gap > 0.0).then(|| sample_rate / mean_gap)
}

/// Linear interpolation of `segment` onto `len` evenly spaced points.
fn stretch(segment: &[f32], len: usize) -> Vec<f32> {
    if segment.len() == 1 || len < 2 {
        return vec![segment[0]; len];
    }
    let scale = (segment.len() - 1) as f32 / (len - 1) as f32;
    (0..len)
        .map(|i| {
            let x = i as f32 * scale;
            let lo = x.floor() as usize;
            let hi = (lo + 1).min(segment.len() - 1);
            let alpha = x - lo as f32;
            segment[lo] + alpha * (segment[hi] - segment[lo])
        })
        .collect()
}

/// Pearson correlation; `None` when either side has no variance.
pub fn pearson(a: &[f32], b: &[f32]) -> Option<f32> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let mean_a = a[..n].iter().sum::<f32>() / n as f32;
    let mean_b = b[..n].iter().sum::<f32>() / n as f32;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Mean correlation of every trough-to-trough beat with the average beat.
pub fn beat_similarity(signal: &[f32], troughs: &[usize], template_len: usize) -> Option<f32> {
    let beats: Vec<Vec<f32>> = troughs
        .windows(2)
        .filter(|w| w[1] > w[0] + 1 && w[1] <= signal.len())
        .map(|w| stretch(&signal[w[0]..w[1]], template_len))
        .collect();
    if beats.len() < 2 {
        return None;
    }

    let mut template = vec![0.0; template_len];
    for beat in &beats {
        for (t, &x) in template.iter_mut().zip(beat.iter()) {
            *t += x / beats.len() as f32;
        }
    }

    let scores: Vec<f32> = beats.iter().filter_map(|b| pearson(b, &template)).collect();
    if scores.len() < beats.len() {
        return None;
    }
    Some(scores.iter().sum::<f32>() / scores.len() as f32)
}

/// Length of the longest run of consecutive samples that differ by at most `tolerance`.
pub fn longest_flat_run(signal: &[f32], tolerance: f32) -> usize {
    if signal.is_empty() {
        return 0;
    }
    let mut longest = 1;
    let mut current = 1;
    for w in signal.windows(2) {
        if (w[1] - w[0]).abs() <= tolerance {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 1;
        }
    }
    longest
}

/// Fraction of beats whose falling edge carries a dicrotic notch, seen as a local
/// maximum of the first derivative between a peak and the following trough.
pub fn notch_fraction(signal: &[f32], peaks: &[usize], troughs: &[usize]) -> Option<f32> {
    let vpg = gradient(signal);
    let mut beats = 0;
    let mut notched = 0;

    for &peak in peaks {
        let Some(&trough) = troughs.iter().find(|&&t| t > peak + 2) else {
            continue;
        };
        if trough >= vpg.len() {
            continue;
        }
        beats += 1;
        let has_notch = (peak + 1..trough).any(|i| vpg[i] > vpg[i - 1] && vpg[i] >= vpg[i + 1]);
        if has_notch {
            notched += 1;
        }
    }

    (beats > 0).then(|| notched as f32 / beats as f32)
}
