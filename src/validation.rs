use crate::config::PipelineConfig;
use crate::dsp::{Bandpass, ButterworthBandpass};
use crate::error::Result;
use crate::preprocessing::{clear_nans, gradient};
use crate::quality::{QualityAssessor, QualityReport, SpectralAssessor};
use crate::scaler::ScalerStore;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Valid,
    Invalid,
}

/// Verdict, derivatives and scaled model inputs of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub status: Status,
    pub ppg: Vec<f32>,
    pub vpg: Vec<f32>,
    pub apg: Vec<f32>,
    pub ppg_scaled: Vec<f32>,
    pub vpg_scaled: Vec<f32>,
    pub apg_scaled: Vec<f32>,
    pub f0: f32,
    pub snr: f32,
    pub beat_sim: f32,
    pub notches: bool,
    pub flat_lines: bool,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.status == Status::Valid
    }
}

pub struct WindowValidator<'a> {
    config: &'a PipelineConfig,
    filter: &'a dyn Bandpass,
    assessor: &'a dyn QualityAssessor,
    scalers: &'a ScalerStore,
}

impl<'a> WindowValidator<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        filter: &'a dyn Bandpass,
        assessor: &'a dyn QualityAssessor,
        scalers: &'a ScalerStore,
    ) -> Self {
        Self {
            config,
            filter,
            assessor,
            scalers,
        }
    }

    /// Score a window and produce its derivatives and scaled channels.
    ///
    /// `force_valid` overrides the verdict and is meant for debugging only.
    pub fn validate(&self, window: &[f32], force_valid: bool) -> Result<ValidationResult> {
        let cfg = self.config;
        let cleared = clear_nans(window);
        let [low, high] = cfg.freq_band;

        let (ppg, filtered) = match self.filter.bandpass(&cleared, low, high, cfg.fs) {
            Ok(filtered) => (filtered, true),
            Err(e) => {
                warn!("Window of {} samples left unfiltered: {}", cleared.len(), e);
                (cleared, false)
            }
        };

        let report = self.assessor.assess(&ppg, cfg.fs);
        let stats_finite = [report.f0, report.snr, report.beat_sim]
            .iter()
            .all(|x| x.is_finite());
        let assessed_valid = filtered && report.valid && stats_finite;

        let status = if assessed_valid {
            Status::Valid
        } else if force_valid {
            debug!(
                "Forcing window valid (f0={}, snr={}, beat_sim={})",
                report.f0, report.snr, report.beat_sim
            );
            Status::Valid
        } else {
            Status::Invalid
        };

        let (vpg, apg) = match status {
            Status::Valid => {
                let vpg = gradient(&ppg);
                let apg = gradient(&vpg);
                (vpg, apg)
            }
            Status::Invalid => (Vec::new(), Vec::new()),
        };

        let ppg_scaled = self.scalers.scale_channel("ppg", &ppg)?;
        let vpg_scaled = self.scalers.scale_channel("vpg", &vpg)?;
        let apg_scaled = self.scalers.scale_channel("apg", &apg)?;

        trace!("validate: {} samples -> {:?}", ppg.len(), status);

        let QualityReport {
            f0,
            snr,
            beat_sim,
            flat_check,
            notch_check,
            ..
        } = report;

        Ok(ValidationResult {
            status,
            ppg,
            vpg,
            apg,
            ppg_scaled,
            vpg_scaled,
            apg_scaled,
            f0,
            snr,
            beat_sim,
            notches: notch_check,
            flat_lines: !flat_check,
        })
    }
}

/// Validate one window with the default filter and assessor, scaling through the
/// store named by `config.scaler_path`.
pub fn validate_window(
    window: &[f32],
    config: &PipelineConfig,
    force_valid: bool,
) -> Result<ValidationResult> {
    let scalers = ScalerStore::load_cached(&config.scaler_path)?;
    let filter = ButterworthBandpass {
        order: config.filter_order,
        method: config.filter_method,
    };
    let assessor = SpectralAssessor::new(config.quality.clone());
    WindowValidator::new(config, &filter, &assessor, &scalers).validate(window, force_valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::scaler::MinMaxScaler;
    use std::collections::HashMap;
    use std::f32::consts::PI;
    use std::path::PathBuf;

    struct FixedAssessor(QualityReport);

    impl QualityAssessor for FixedAssessor {
        fn assess(&self, _window: &[f32], _fs: f32) -> QualityReport {
            self.0.clone()
        }
    }

    struct PassThrough;

    impl Bandpass for PassThrough {
        fn bandpass(&self, signal: &[f32], _low: f32, _high: f32, _fs: f32) -> Result<Vec<f32>> {
            Ok(signal.to_vec())
        }
    }

    fn store() -> ScalerStore {
        let channels = HashMap::from([
            ("ppg".to_string(), MinMaxScaler::new("ppg", -2.0, 2.0).unwrap()),
            ("vpg".to_string(), MinMaxScaler::new("vpg", -1.0, 1.0).unwrap()),
            ("apg".to_string(), MinMaxScaler::new("apg", -0.5, 0.5).unwrap()),
        ]);
        ScalerStore::new(channels)
    }

    fn failing_report() -> QualityReport {
        QualityReport {
            valid: false,
            f0: 1.1,
            snr: 0.4,
            beat_sim: 0.05,
            flat_check: true,
            notch_check: false,
            ..QualityReport::default()
        }
    }

    fn pulse(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * 1.25 * i as f32 / 125.0).sin())
            .collect()
    }

    #[test]
    fn force_valid_overrides_a_failing_window() {
        let config = PipelineConfig::default();
        let scalers = store();
        let assessor = FixedAssessor(failing_report());
        let validator = WindowValidator::new(&config, &PassThrough, &assessor, &scalers);
        let window = pulse(256);

        let forced = validator.validate(&window, true).unwrap();
        assert_eq!(forced.status, Status::Valid);
        assert_eq!(forced.vpg.len(), 256);
        assert_eq!(forced.apg.len(), 256);
        assert_eq!(forced.snr, 0.4);

        let plain = validator.validate(&window, false).unwrap();
        assert_eq!(plain.status, Status::Invalid);
        assert!(plain.vpg.is_empty());
        assert!(plain.apg.is_empty());
        assert!(plain.vpg_scaled.is_empty());
        assert_eq!(plain.ppg_scaled.len(), 256);
    }

    #[test]
    fn valid_window_carries_gradients_and_scaling() {
        let config = PipelineConfig::default();
        let scalers = store();
        let assessor = FixedAssessor(QualityReport {
            valid: true,
            flat_check: true,
            notch_check: true,
            ..failing_report()
        });
        let validator = WindowValidator::new(&config, &PassThrough, &assessor, &scalers);
        let window = pulse(256);

        let result = validator.validate(&window, false).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.ppg, window);
        assert_eq!(result.vpg, gradient(&window));
        assert_eq!(result.apg, gradient(&result.vpg));
        assert_eq!(result.ppg_scaled[0], (window[0] + 2.0) / 4.0);
        assert_eq!(result.vpg_scaled.len(), 256);
        assert!(result.notches);
        assert!(!result.flat_lines);
    }

    #[test]
    fn non_finite_statistics_invalidate() {
        let config = PipelineConfig::default();
        let scalers = store();
        let assessor = FixedAssessor(QualityReport {
            valid: true,
            snr: f32::NAN,
            ..failing_report()
        });
        let validator = WindowValidator::new(&config, &PassThrough, &assessor, &scalers);
        let result = validator.validate(&pulse(256), false).unwrap();
        assert_eq!(result.status, Status::Invalid);
    }

    #[test]
    fn unfilterable_window_is_invalid() {
        let config = PipelineConfig::default();
        let scalers = store();
        let assessor = FixedAssessor(QualityReport {
            valid: true,
            ..failing_report()
        });
        let filter = ButterworthBandpass::default();
        let validator = WindowValidator::new(&config, &filter, &assessor, &scalers);

        let window = [1.0, f32::NAN, 3.0];
        let result = validator.validate(&window, false).unwrap();
        assert_eq!(result.status, Status::Invalid);
        assert_eq!(result.ppg, vec![1.0, 0.0, 3.0]);
    }

    #[test]
    fn missing_scaler_channel_is_fatal() {
        let config = PipelineConfig::default();
        let scalers = ScalerStore::new(HashMap::from([(
            "ppg".to_string(),
            MinMaxScaler::new("ppg", 0.0, 1.0).unwrap(),
        )]));
        let assessor = FixedAssessor(failing_report());
        let validator = WindowValidator::new(&config, &PassThrough, &assessor, &scalers);
        assert!(matches!(
            validator.validate(&pulse(256), false),
            Err(Error::MissingScalerChannel(ref c)) if c == "vpg"
        ));
    }

    #[test]
    fn missing_scaler_file_is_fatal() {
        let config = PipelineConfig {
            scaler_path: PathBuf::from("/nonexistent/ppg-scaler.json"),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            validate_window(&pulse(256), &config, false),
            Err(Error::ScalerIo { .. })
        ));
    }
}
