use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the conditioning pipeline.
///
/// Detection failures and ambiguous windows are not errors: the former degrade
/// to an empty peak set, the latter to an `invalid` status.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read scaler file {path}: {source}")]
    ScalerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed scaler file {path}: {source}")]
    ScalerFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Scaler has no parameters for channel '{0}'")]
    MissingScalerChannel(String),

    #[error("Degenerate scaler for channel '{channel}': min={min}, max={max}")]
    DegenerateScaler { channel: String, min: f32, max: f32 },

    #[error("Invalid band [{low}, {high}] Hz for sampling rate {fs} Hz")]
    InvalidBand { low: f32, high: f32, fs: f32 },

    #[error("Channel length mismatch: red has {red} samples, ir has {ir}")]
    ChannelLengthMismatch { red: usize, ir: usize },

    #[error("Insufficient data: need more than {required} samples, have {available}")]
    SignalTooShort { required: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
