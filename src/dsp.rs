//! Signal-processing collaborators of the pipeline.
//!
//! The pipeline only depends on the traits; the structs here are the default
//! implementations wired in by [`crate::process_frame`] and
//! [`crate::validate_window`].

use crate::error::{Error, Result};
use crate::peaks::PeakOutcome;
use log::trace;
use rustfft::{num_complex::Complex, FftPlanner};
use sci_rs::signal::filter::design::{
    butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, SosFormatFilter,
};
use sci_rs::signal::filter::{sosfilt_dyn, sosfiltfilt_dyn};
use serde::{Deserialize, Serialize};

/// Band-limiting filter.
pub trait Bandpass: Send + Sync {
    fn bandpass(&self, signal: &[f32], low_hz: f32, high_hz: f32, fs: f32) -> Result<Vec<f32>>;
}

/// Sampling-rate conversion preserving waveform shape.
pub trait Resampler: Send + Sync {
    fn resample(&self, signal: &[f32], fs_from: f32, fs_to: f32) -> Vec<f32>;
}

/// Peak and trough detection over a band-limited signal.
pub trait PeakDetector: Send + Sync {
    fn detect(&self, signal: &[f32]) -> PeakOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMethod {
    /// Forward-backward filtering, no phase shift.
    ZeroPhase,
    /// Single forward pass.
    Causal,
}

/// Butterworth band-pass designed as second-order sections.
#[derive(Debug, Clone, Copy)]
pub struct ButterworthBandpass {
    pub order: usize,
    pub method: FilterMethod,
}

impl Default for ButterworthBandpass {
    fn default() -> Self {
        Self {
            order: 4,
            method: FilterMethod::ZeroPhase,
        }
    }
}

impl ButterworthBandpass {
    /// Minimum signal length accepted by the forward-backward pass.
    pub fn pad_len(&self) -> usize {
        3 * (2 * self.order + 1)
    }
}

impl Bandpass for ButterworthBandpass {
    fn bandpass(&self, signal: &[f32], low_hz: f32, high_hz: f32, fs: f32) -> Result<Vec<f32>> {
        if !(fs > 0.0 && low_hz > 0.0 && low_hz < high_hz && high_hz < fs / 2.0) {
            return Err(Error::InvalidBand {
                low: low_hz,
                high: high_hz,
                fs,
            });
        }
        if self.method == FilterMethod::ZeroPhase && signal.len() <= self.pad_len() {
            return Err(Error::SignalTooShort {
                required: self.pad_len(),
                available: signal.len(),
            });
        }

        let filter = butter_dyn(
            self.order,
            vec![low_hz as f64, high_hz as f64],
            Some(FilterBandType::Bandpass),
            Some(false),
            Some(FilterOutputType::Sos),
            Some(fs as f64),
        );
        let DigitalFilter::Sos(SosFormatFilter { mut sos }) = filter else {
            return Err(Error::Config(
                "Butterworth design did not produce second-order sections".into(),
            ));
        };

        trace!(
            "bandpass: {} sections, [{}, {}] Hz at {} Hz, {:?}",
            sos.len(),
            low_hz,
            high_hz,
            fs,
            self.method
        );

        let samples: Vec<f64> = signal.iter().map(|&x| x as f64).collect();
        let filtered = match self.method {
            FilterMethod::ZeroPhase => sosfiltfilt_dyn(samples.iter(), &sos),
            FilterMethod::Causal => sosfilt_dyn(samples.iter(), &mut sos),
        };

        Ok(filtered.into_iter().map(|x| x as f32).collect())
    }
}

/// Fourier-domain resampler: the spectrum is truncated or zero padded to the
/// target length, splitting or folding the Nyquist bin as needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FftResampler;

impl Resampler for FftResampler {
    fn resample(&self, signal: &[f32], fs_from: f32, fs_to: f32) -> Vec<f32> {
        let nx = signal.len();
        let num = (nx as f32 * fs_to / fs_from) as usize;
        if nx == 0 || num == 0 {
            return Vec::new();
        }
        if num == nx {
            return signal.to_vec();
        }

        let mut planner = FftPlanner::<f32>::new();
        let mut spectrum: Vec<Complex<f32>> =
            signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
        planner.plan_fft_forward(nx).process(&mut spectrum);

        let n = nx.min(num);
        let nyq = n / 2 + 1;
        let mut out = vec![Complex::new(0.0, 0.0); num];
        out[..nyq].copy_from_slice(&spectrum[..nyq]);
        if n > 2 {
            let neg = n - nyq;
            out[num - neg..].copy_from_slice(&spectrum[nx - neg..]);
        }
        if n % 2 == 0 {
            if num < nx {
                out[n / 2] += spectrum[nx - n / 2];
            } else {
                out[n / 2] *= 0.5;
                out[num - n / 2] = out[n / 2];
            }
        }

        planner.plan_fft_inverse(num).process(&mut out);
        out.iter().map(|c| c.re / nx as f32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, fs: f32, len: usize, offset: f32) -> Vec<f32> {
        (0..len)
            .map(|i| offset + (2.0 * PI * freq * i as f32 / fs).sin())
            .collect()
    }

    #[test]
    fn resampled_length_follows_rate_ratio() {
        let signal = sine(1.0, 100.0, 1000, 0.0);
        assert_eq!(FftResampler.resample(&signal, 100.0, 125.0).len(), 1250);
        assert_eq!(FftResampler.resample(&signal, 100.0, 50.0).len(), 500);
        assert_eq!(FftResampler.resample(&signal, 100.0, 100.0), signal);
        assert!(FftResampler.resample(&[], 100.0, 125.0).is_empty());
    }

    #[test]
    fn resampling_preserves_constant_level() {
        let signal = vec![3.5; 200];
        let up = FftResampler.resample(&signal, 100.0, 125.0);
        assert!(up.iter().all(|&x| (x - 3.5).abs() < 1e-3));
        let down = FftResampler.resample(&signal, 100.0, 40.0);
        assert!(down.iter().all(|&x| (x - 3.5).abs() < 1e-3));
    }

    #[test]
    fn resampling_preserves_a_periodic_tone() {
        // 2 Hz over exactly 10 s, so the tone is periodic in the frame
        let signal = sine(2.0, 100.0, 1000, 0.0);
        let resampled = FftResampler.resample(&signal, 100.0, 125.0);
        let expected = sine(2.0, 125.0, 1250, 0.0);
        for (a, b) in resampled.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn bandpass_rejects_invalid_bands() {
        let signal = sine(1.0, 100.0, 500, 0.0);
        let filter = ButterworthBandpass::default();
        assert!(matches!(
            filter.bandpass(&signal, 0.5, 60.0, 100.0),
            Err(Error::InvalidBand { .. })
        ));
        assert!(matches!(
            filter.bandpass(&signal, 8.0, 0.5, 100.0),
            Err(Error::InvalidBand { .. })
        ));
    }

    #[test]
    fn bandpass_rejects_signals_shorter_than_padding() {
        let filter = ButterworthBandpass::default();
        let short = vec![1.0; filter.pad_len()];
        assert!(matches!(
            filter.bandpass(&short, 0.5, 8.0, 125.0),
            Err(Error::SignalTooShort { .. })
        ));
    }

    #[test]
    fn bandpass_removes_offset_and_keeps_in_band_tone() {
        let signal = sine(1.0, 125.0, 1250, 5.0);
        let filtered = ButterworthBandpass::default()
            .bandpass(&signal, 0.5, 8.0, 125.0)
            .unwrap();
        assert_eq!(filtered.len(), signal.len());

        let middle = &filtered[250..1000];
        let mean = middle.iter().sum::<f32>() / middle.len() as f32;
        let peak = middle.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(mean.abs() < 0.1);
        assert!((peak - 1.0).abs() < 0.1);
    }

    #[test]
    fn causal_bandpass_keeps_length() {
        let filter = ButterworthBandpass {
            order: 2,
            method: FilterMethod::Causal,
        };
        let filtered = filter.bandpass(&sine(1.0, 100.0, 20, 0.0), 0.5, 8.0, 100.0).unwrap();
        assert_eq!(filtered.len(), 20);
    }
}
