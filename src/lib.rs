pub mod config;
pub mod data_loading;
pub mod dsp;
pub mod error;
pub mod heart_analysis;
pub mod output;
pub mod peaks;
pub mod pipeline;
pub mod preprocessing;
pub mod quality;
pub mod scaler;
pub mod validation;

pub use config::{Channel, PipelineConfig};
pub use error::{Error, Result};
pub use peaks::{PeakOutcome, PeakSet};
pub use pipeline::{process_frame, FramePipeline, FrameResult, PipelineVariant};
pub use scaler::{MinMaxScaler, ScalerStore};
pub use validation::{validate_window, Status, ValidationResult, WindowValidator};
