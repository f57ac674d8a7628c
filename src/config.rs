use crate::dsp::FilterMethod;
use crate::error::{Error, Result};
use crate::pipeline::PipelineVariant;
use crate::preprocessing::DEFAULT_REPAIR_BUFFER;
use crate::quality::QualityConfig;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Ir,
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "red" => Ok(Channel::Red),
            "ir" => Ok(Channel::Ir),
            _ => Err(format!("Invalid channel: {}. Use red or ir", s)),
        }
    }
}

/// Amplitude/run based cleaning of raw frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Absolute deviation from the median beyond which a raw sample is bad.
    pub amp_thresh: f32,
    /// Samples repaired past the end of a selected run.
    pub buffer: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            amp_thresh: 5000.0,
            buffer: DEFAULT_REPAIR_BUFFER,
        }
    }
}

/// Peak/trough pruning thresholds, in band-limited amplitude units and samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneConfig {
    pub amp_thresh: f32,
    pub dist_thresh: f32,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            amp_thresh: 500.0,
            dist_thresh: 10.0,
        }
    }
}

/// Immutable configuration passed explicitly to every pipeline call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub variant: PipelineVariant,
    /// Device acquisition rate of raw frames.
    pub device_fs: f32,
    /// Processing rate expected by the model.
    pub fs: f32,
    pub win_len: usize,
    pub freq_band: [f32; 2],
    /// Band used only to locate peaks on cleaned raw frames.
    pub peak_band: [f32; 2],
    pub filter_order: usize,
    pub filter_method: FilterMethod,
    pub model_channel: Channel,
    pub repair: RepairConfig,
    pub pruning: PruneConfig,
    pub quality: QualityConfig,
    pub scaler_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant: PipelineVariant::Full,
            device_fs: 100.0,
            fs: 125.0,
            win_len: 256,
            freq_band: [0.5, 8.0],
            peak_band: [0.5, 8.0],
            filter_order: 4,
            filter_method: FilterMethod::ZeroPhase,
            model_channel: Channel::Ir,
            repair: RepairConfig::default(),
            pruning: PruneConfig::default(),
            quality: QualityConfig::default(),
            scaler_path: PathBuf::from("data/min-max-scaler.json"),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file; absent keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.win_len == 0 {
            return Err(Error::Config("win_len must be positive".into()));
        }
        if !(self.fs > 0.0 && self.device_fs > 0.0) {
            return Err(Error::Config(format!(
                "sampling rates must be positive (fs={}, device_fs={})",
                self.fs, self.device_fs
            )));
        }
        if self.filter_order == 0 {
            return Err(Error::Config("filter_order must be positive".into()));
        }
        let [low, high] = self.quality.hr_freq_band;
        if low >= high {
            return Err(Error::Config(format!("empty hr_freq_band [{}, {}]", low, high)));
        }

        // the full path filters at device_fs, the validator at fs
        for (band, fs) in [
            (self.freq_band, self.device_fs),
            (self.freq_band, self.fs),
            (self.peak_band, self.device_fs),
        ] {
            let [low, high] = band;
            if !(low > 0.0 && low < high && high < fs / 2.0) {
                return Err(Error::InvalidBand { low, high, fs });
            }
        }
        Ok(())
    }
}

/// Condition PPG frames into validated, scaled model windows
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON pipeline configuration (defaults are used when omitted)
    #[arg(long, global = true, env = "PPG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the scaler file named in the configuration
    #[arg(long, global = true, env = "PPG_SCALER")]
    pub scaler: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process frame events and validate every window
    Frames {
        /// Directory containing .RAW files or path to input CSV/Feather file
        #[arg(help = "Directory containing .RAW files or path to input CSV/Feather file")]
        input_path: PathBuf,

        /// Whether the input is a CSV file
        #[arg(long)]
        csv_input: bool,

        /// Whether the input is a Feather file
        #[arg(long)]
        feather_input: bool,

        /// Pipeline variant, overriding the configuration (legacy or full)
        #[arg(long)]
        variant: Option<PipelineVariant>,

        /// Model input channel, overriding the configuration (red or ir)
        #[arg(long)]
        channel: Option<Channel>,

        /// Output file prefix (e.g. /path/to/output/prefix)
        #[arg(long)]
        output: Option<String>,

        /// Mark every window valid regardless of quality (debugging only)
        #[arg(long)]
        force_valid: bool,
    },

    /// Validate a single window given as a JSON array of samples
    Validate {
        window: PathBuf,

        /// Mark the window valid regardless of quality (debugging only)
        #[arg(long)]
        force_valid: bool,
    },

    /// Map scaled model output back to physical units
    Rescale {
        /// JSON array of scaled values
        values: PathBuf,

        #[arg(long, default_value = "abp")]
        channel: String,
    },
}
