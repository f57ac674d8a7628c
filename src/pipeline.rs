use crate::config::{Channel, PipelineConfig};
use crate::dsp::{Bandpass, ButterworthBandpass, FftResampler, PeakDetector, Resampler};
use crate::error::{Error, Result};
use crate::heart_analysis::RollingMeanDetector;
use crate::peaks::{prune_peak_set, PeakOutcome, PeakSet};
use crate::preprocessing::{average_channels, clear_nans, flip, repair_runs, split_windows};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineVariant {
    /// Filter, flip and average both channels, no cleaning.
    Legacy,
    /// Run repair and peak pruning per channel before resampling and filtering.
    Full,
}

impl FromStr for PipelineVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(PipelineVariant::Legacy),
            "full" => Ok(PipelineVariant::Full),
            _ => Err(format!("Invalid pipeline variant: {}. Use legacy or full", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyFrame {
    pub red_for_processing: Vec<f32>,
    pub ir_for_processing: Vec<f32>,
    pub red_for_presentation: Vec<f32>,
    pub ir_for_presentation: Vec<f32>,
    pub combined_for_presentation: Vec<f32>,
    pub combined_for_processing: Vec<f32>,
    pub windows: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullFrame {
    /// Repaired raw channels at the device rate.
    pub red_clean: Vec<f32>,
    pub ir_clean: Vec<f32>,
    pub red_peaks: PeakSet,
    pub ir_peaks: PeakSet,
    /// Resampled, flipped and filtered channels.
    pub red_presentation: Vec<f32>,
    pub ir_presentation: Vec<f32>,
    pub model_channel: Channel,
    pub model_input: Vec<f32>,
    pub windows: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum FrameResult {
    Legacy(LegacyFrame),
    Full(FullFrame),
}

impl FrameResult {
    pub fn windows(&self) -> &[Vec<f32>] {
        match self {
            FrameResult::Legacy(frame) => &frame.windows,
            FrameResult::Full(frame) => &frame.windows,
        }
    }
}

/// Turns one raw dual-channel event into filtered channels and model windows.
pub struct FramePipeline<'a> {
    config: &'a PipelineConfig,
    filter: &'a dyn Bandpass,
    resampler: &'a dyn Resampler,
    detector: &'a dyn PeakDetector,
}

impl<'a> FramePipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        filter: &'a dyn Bandpass,
        resampler: &'a dyn Resampler,
        detector: &'a dyn PeakDetector,
    ) -> Self {
        Self {
            config,
            filter,
            resampler,
            detector,
        }
    }

    pub fn process(&self, red: &[f32], ir: &[f32]) -> Result<FrameResult> {
        if red.len() != ir.len() {
            return Err(Error::ChannelLengthMismatch {
                red: red.len(),
                ir: ir.len(),
            });
        }
        if self.config.win_len == 0 {
            return Err(Error::Config("win_len must be positive".into()));
        }

        let red = clear_nans(red);
        let ir = clear_nans(ir);

        match self.config.variant {
            PipelineVariant::Legacy => self.process_legacy(red, ir).map(FrameResult::Legacy),
            PipelineVariant::Full => self.process_full(red, ir).map(FrameResult::Full),
        }
    }

    fn band(&self, signal: &[f32], band: [f32; 2], fs: f32) -> Result<Vec<f32>> {
        self.filter.bandpass(signal, band[0], band[1], fs)
    }

    fn process_legacy(&self, red: Vec<f32>, ir: Vec<f32>) -> Result<LegacyFrame> {
        let cfg = self.config;

        let red_flipped = flip(&self.band(&red, cfg.freq_band, cfg.device_fs)?);
        let ir_flipped = flip(&self.band(&ir, cfg.freq_band, cfg.device_fs)?);
        let combined = average_channels(&red_flipped, &ir_flipped);
        let combined_resampled = self.resampler.resample(&combined, cfg.device_fs, cfg.fs);
        let windows = split_windows(&combined_resampled, cfg.win_len);

        debug!(
            "legacy frame: {} samples at {} Hz -> {} at {} Hz, {} windows",
            combined.len(),
            cfg.device_fs,
            combined_resampled.len(),
            cfg.fs,
            windows.len()
        );

        Ok(LegacyFrame {
            red_for_processing: red,
            ir_for_processing: ir,
            red_for_presentation: red_flipped,
            ir_for_presentation: ir_flipped,
            combined_for_presentation: combined,
            combined_for_processing: combined_resampled,
            windows,
        })
    }

    /// Repair the raw channel and locate its pulses on a band-limited copy.
    fn clean_channel(&self, raw: &[f32]) -> (Vec<f32>, PeakSet) {
        let cfg = self.config;
        let clean = repair_runs(raw, cfg.repair.amp_thresh, cfg.repair.buffer);

        let peaks = match self.band(&clean, cfg.peak_band, cfg.device_fs) {
            Ok(limited) => {
                let raw_peaks = self.detector.detect(&limited).into_peak_set();
                prune_peak_set(
                    &limited,
                    &raw_peaks,
                    cfg.pruning.amp_thresh,
                    cfg.pruning.dist_thresh,
                )
            }
            Err(e) => PeakOutcome::DetectorUnavailable {
                reason: e.to_string(),
            }
            .into_peak_set(),
        };

        (clean, peaks)
    }

    /// Resample, restore pulse polarity and band-limit a cleaned channel.
    fn condition_channel(&self, clean: &[f32]) -> Result<Vec<f32>> {
        let cfg = self.config;
        let resampled = self.resampler.resample(clean, cfg.device_fs, cfg.fs);
        let flipped = flip(&resampled);
        // filtered with the device rate although the signal is already at `fs`
        self.band(&flipped, cfg.freq_band, cfg.device_fs)
    }

    fn process_full(&self, red: Vec<f32>, ir: Vec<f32>) -> Result<FullFrame> {
        let cfg = self.config;

        let (red_clean, red_peaks) = self.clean_channel(&red);
        let (ir_clean, ir_peaks) = self.clean_channel(&ir);

        let red_presentation = self.condition_channel(&red_clean)?;
        let ir_presentation = self.condition_channel(&ir_clean)?;

        let model_input = match cfg.model_channel {
            Channel::Red => red_presentation.clone(),
            Channel::Ir => ir_presentation.clone(),
        };
        let windows = split_windows(&model_input, cfg.win_len);

        if windows.is_empty() {
            warn!(
                "full frame: {} samples is shorter than one window of {}",
                model_input.len(),
                cfg.win_len
            );
        }
        debug!(
            "full frame: {} peaks red, {} peaks ir, {} windows from {:?}",
            red_peaks.peaks.len(),
            ir_peaks.peaks.len(),
            windows.len(),
            cfg.model_channel
        );

        Ok(FullFrame {
            red_clean,
            ir_clean,
            red_peaks,
            ir_peaks,
            red_presentation,
            ir_presentation,
            model_channel: cfg.model_channel,
            model_input,
            windows,
        })
    }
}

/// Run the configured variant with the default filter, resampler and detector.
pub fn process_frame(red: &[f32], ir: &[f32], config: &PipelineConfig) -> Result<FrameResult> {
    let filter = ButterworthBandpass {
        order: config.filter_order,
        method: config.filter_method,
    };
    let detector = RollingMeanDetector {
        sample_rate: config.device_fs,
        window_size: config.quality.windowsize,
        ma_perc: config.quality.ma_perc,
    };
    FramePipeline::new(config, &filter, &FftResampler, &detector).process(red, ir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;
    use std::sync::Mutex;

    /// Identity filter recording the rate it was called with.
    struct RecordingFilter {
        rates: Mutex<Vec<f32>>,
    }

    impl RecordingFilter {
        fn new() -> Self {
            Self {
                rates: Mutex::new(Vec::new()),
            }
        }
    }

    impl Bandpass for RecordingFilter {
        fn bandpass(&self, signal: &[f32], _low: f32, _high: f32, fs: f32) -> Result<Vec<f32>> {
            self.rates.lock().unwrap().push(fs);
            Ok(signal.to_vec())
        }
    }

    struct FailingDetector;

    impl PeakDetector for FailingDetector {
        fn detect(&self, _signal: &[f32]) -> PeakOutcome {
            PeakOutcome::DetectorUnavailable {
                reason: "offline".into(),
            }
        }
    }

    fn raw_ppg(len: usize, fs: f32) -> Vec<f32> {
        (0..len)
            .map(|i| 100_000.0 - 800.0 * (2.0 * PI * 1.2 * i as f32 / fs).sin())
            .collect()
    }

    #[test]
    fn mismatched_channels_are_rejected() {
        let config = PipelineConfig::default();
        assert!(matches!(
            process_frame(&[1.0; 10], &[1.0; 11], &config),
            Err(Error::ChannelLengthMismatch { red: 10, ir: 11 })
        ));
    }

    #[test]
    fn full_path_windows_partition_the_model_input() {
        let config = PipelineConfig::default();
        let red = raw_ppg(1000, config.device_fs);
        let ir = raw_ppg(1000, config.device_fs);

        let FrameResult::Full(frame) = process_frame(&red, &ir, &config).unwrap() else {
            panic!("expected the full variant");
        };

        // 1000 samples at 100 Hz -> 1250 at 125 Hz -> 4 windows of 256
        assert_eq!(frame.red_clean.len(), 1000);
        assert_eq!(frame.model_input.len(), 1250);
        assert_eq!(frame.windows.len(), 4);
        assert!(frame.windows.iter().all(|w| w.len() == 256));
        assert_eq!(frame.windows.concat(), frame.model_input[..1024].to_vec());
        assert_eq!(frame.model_input, frame.ir_presentation);
        assert!(!frame.ir_peaks.peaks.is_empty());
    }

    #[test]
    fn nan_samples_do_not_fail_the_frame() {
        let config = PipelineConfig::default();
        let mut red = raw_ppg(1000, config.device_fs);
        red[17] = f32::NAN;
        let ir = raw_ppg(1000, config.device_fs);

        let result = process_frame(&red, &ir, &config).unwrap();
        let FrameResult::Full(frame) = result else {
            panic!("expected the full variant");
        };
        assert!(frame.red_presentation.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn full_path_filters_at_the_device_rate() {
        // Known discrepancy: the conditioned channel is already at `fs`, but the
        // band-pass still receives `device_fs`.
        let config = PipelineConfig::default();
        let filter = RecordingFilter::new();
        let detector = FailingDetector;
        let pipeline = FramePipeline::new(&config, &filter, &FftResampler, &detector);

        pipeline.process(&raw_ppg(500, 100.0), &raw_ppg(500, 100.0)).unwrap();

        let rates = filter.rates.lock().unwrap();
        assert!(!rates.is_empty());
        assert!(rates.iter().all(|&fs| fs == config.device_fs));
    }

    #[test]
    fn detector_failure_yields_empty_peaks() {
        let config = PipelineConfig::default();
        let filter = RecordingFilter::new();
        let pipeline = FramePipeline::new(&config, &filter, &FftResampler, &FailingDetector);

        let FrameResult::Full(frame) = pipeline
            .process(&raw_ppg(500, 100.0), &raw_ppg(500, 100.0))
            .unwrap()
        else {
            panic!("expected the full variant");
        };
        assert!(frame.red_peaks.is_empty());
        assert!(frame.ir_peaks.is_empty());
        assert_eq!(frame.windows.len(), 625 / 256);
    }

    #[test]
    fn legacy_path_averages_then_resamples() {
        let config = PipelineConfig {
            variant: PipelineVariant::Legacy,
            ..PipelineConfig::default()
        };
        let red = raw_ppg(1000, 100.0);
        let ir: Vec<f32> = red.iter().map(|x| x * 0.5).collect();

        let FrameResult::Legacy(frame) = process_frame(&red, &ir, &config).unwrap() else {
            panic!("expected the legacy variant");
        };
        assert_eq!(frame.red_for_processing, red);
        assert_eq!(frame.combined_for_presentation.len(), 1000);
        assert_eq!(frame.combined_for_processing.len(), 1250);
        assert_eq!(frame.windows.len(), 4);
        for i in [0, 250, 999] {
            let expected = (frame.red_for_presentation[i] + frame.ir_for_presentation[i]) / 2.0;
            assert!((frame.combined_for_presentation[i] - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn short_frames_yield_no_windows() {
        let config = PipelineConfig::default();
        let frame = process_frame(&raw_ppg(150, 100.0), &raw_ppg(150, 100.0), &config).unwrap();
        assert!(frame.windows().is_empty());
    }

    #[test]
    fn variant_parses_from_cli() {
        assert_eq!("legacy".parse::<PipelineVariant>(), Ok(PipelineVariant::Legacy));
        assert!("other".parse::<PipelineVariant>().is_err());
    }
}
