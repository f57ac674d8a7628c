use crate::dsp::PeakDetector;
use crate::heart_analysis::{
    beat_similarity, dominant_frequency, harmonic_snr, longest_flat_run, notch_fraction,
    peak_rate, RollingMeanDetector,
};
use crate::peaks::PeakSet;
use log::debug;
use serde::{Deserialize, Serialize};

/// Quality checks that can gate a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Check {
    Snr,
    Hr,
    Beat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub checks: Vec<Check>,
    /// Plausible heart-rate band in Hz.
    pub hr_freq_band: [f32; 2],
    /// Allowed relative disagreement between the spectral and the peak-derived rate.
    pub hr_delta: f32,
    /// Minimum harmonic SNR in dB.
    pub snr: f32,
    /// Minimum mean beat correlation.
    pub beat_sim: f32,
    /// Number of identical consecutive samples that counts as a flat line.
    pub flat_line_length: usize,
    pub notch_ratio: f32,
    /// Rolling mean window in seconds used for peak extraction.
    pub windowsize: f32,
    pub ma_perc: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            checks: vec![Check::Snr, Check::Hr, Check::Beat],
            hr_freq_band: [0.667, 3.0],
            hr_delta: 1.0 / 6.0,
            snr: 2.0,
            beat_sim: 0.2,
            flat_line_length: 10,
            notch_ratio: 0.5,
            windowsize: 1.0,
            ma_perc: 20.0,
        }
    }
}

impl QualityConfig {
    pub fn is_active(&self, check: Check) -> bool {
        self.checks.contains(&check)
    }
}

/// Verdict and statistics for one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub valid: bool,
    pub f0: f32,
    pub snr: f32,
    pub beat_sim: f32,
    /// True when no flat line was found.
    pub flat_check: bool,
    /// True when dicrotic notches were found on enough beats.
    pub notch_check: bool,
    pub peaks: PeakSet,
}

/// Physiological plausibility of a single window.
pub trait QualityAssessor: Send + Sync {
    fn assess(&self, window: &[f32], fs: f32) -> QualityReport;
}

/// Default assessor: spectral heart rate and SNR, beat template similarity,
/// flat-line and notch detection.
#[derive(Debug, Clone, Default)]
pub struct SpectralAssessor {
    pub config: QualityConfig,
}

impl SpectralAssessor {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }
}

impl QualityAssessor for SpectralAssessor {
    fn assess(&self, window: &[f32], fs: f32) -> QualityReport {
        let cfg = &self.config;
        let [hr_low, hr_high] = cfg.hr_freq_band;

        let detector = RollingMeanDetector {
            sample_rate: fs,
            window_size: cfg.windowsize,
            ma_perc: cfg.ma_perc,
        };
        let peaks = detector.detect(window).into_peak_set();

        let flat_check = longest_flat_run(window, 0.0) < cfg.flat_line_length;
        let notch_check = notch_fraction(window, &peaks.peaks, &peaks.troughs)
            .map(|ratio| ratio >= cfg.notch_ratio)
            .unwrap_or(false);

        let f0 = dominant_frequency(window, fs, hr_low, hr_high);
        let snr = f0.and_then(|f| harmonic_snr(window, fs, f, 3));
        let beat_sim = beat_similarity(window, &peaks.troughs, 64);

        let snr_ok = snr.is_some_and(|s| s >= cfg.snr);
        let hr_ok = match (f0, peak_rate(&peaks.peaks, fs)) {
            (Some(f), Some(rate)) => {
                f >= hr_low && f <= hr_high && ((rate - f).abs() / f) <= cfg.hr_delta
            }
            _ => false,
        };
        // fewer than two complete beats leave nothing to compare against
        let complete_beats = peaks.troughs.len().saturating_sub(1);
        let beat_ok = match beat_sim {
            Some(b) => b >= cfg.beat_sim,
            None => complete_beats < 2,
        };

        let checks_ok = (!cfg.is_active(Check::Snr) || snr_ok)
            && (!cfg.is_active(Check::Hr) || hr_ok)
            && (!cfg.is_active(Check::Beat) || beat_ok);
        let valid = checks_ok && flat_check && peaks.peaks.len() >= 2;

        debug!(
            "assess: f0={:?} snr={:?} beat_sim={:?} snr_ok={} hr_ok={} beat_ok={} flat_check={} -> valid={}",
            f0, snr, beat_sim, snr_ok, hr_ok, beat_ok, flat_check, valid
        );

        QualityReport {
            valid,
            f0: f0.unwrap_or(0.0),
            snr: snr.unwrap_or(0.0),
            beat_sim: beat_sim.unwrap_or(0.0),
            flat_check,
            notch_check,
            peaks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn pulse_wave(bpm: f32, fs: f32, len: usize) -> Vec<f32> {
        let f = bpm / 60.0;
        (0..len)
            .map(|i| {
                let t = i as f32 / fs;
                (2.0 * PI * f * t).sin() + 0.25 * (4.0 * PI * f * t + 0.8).sin()
            })
            .collect()
    }

    #[test]
    fn clean_pulse_window_is_valid() {
        let window = pulse_wave(75.0, 125.0, 1024);
        let report = SpectralAssessor::default().assess(&window, 125.0);
        assert!(report.valid, "{:?}", report);
        assert!((report.f0 - 1.25).abs() < 0.13);
        assert!(report.snr >= 2.0);
        assert!(report.beat_sim > 0.9);
        assert!(report.flat_check);
    }

    #[test]
    fn resting_and_elevated_rates_pass_at_window_length() {
        let assessor = SpectralAssessor::default();
        for bpm in 45..=120 {
            let window = pulse_wave(bpm as f32, 125.0, 256);
            let report = assessor.assess(&window, 125.0);
            assert!(report.valid, "bpm {}: {:?}", bpm, report);
            assert!(
                (report.f0 - bpm as f32 / 60.0).abs() < 0.1,
                "bpm {}: f0 {}",
                bpm,
                report.f0
            );
        }
    }

    #[test]
    fn silent_window_is_invalid_without_panicking() {
        let report = SpectralAssessor::default().assess(&vec![0.0; 256], 125.0);
        assert!(!report.valid);
        assert!(!report.flat_check);
        assert_eq!(report.f0, 0.0);
        assert_eq!(report.snr, 0.0);
    }

    #[test]
    fn tiny_window_is_invalid() {
        let report = SpectralAssessor::default().assess(&[1.0, 2.0], 125.0);
        assert!(!report.valid);
    }

    #[test]
    fn heart_rate_outside_band_fails_hr_check() {
        // 20 bpm is below the 0.667 Hz floor
        let window = pulse_wave(20.0, 125.0, 2048);
        let config = QualityConfig {
            checks: vec![Check::Hr],
            ..QualityConfig::default()
        };
        let report = SpectralAssessor::new(config).assess(&window, 125.0);
        assert!(!report.valid);
    }

    #[test]
    fn no_active_checks_still_requires_pulses() {
        let config = QualityConfig {
            checks: Vec::new(),
            ..QualityConfig::default()
        };
        let assessor = SpectralAssessor::new(config);
        assert!(assessor.assess(&pulse_wave(75.0, 125.0, 1024), 125.0).valid);
        assert!(!assessor.assess(&vec![1.0; 1024], 125.0).valid);
    }
}
