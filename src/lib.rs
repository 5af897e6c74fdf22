//! VRM to PMX conversion.
//!
//! Reads a VRM (binary glTF with humanoid metadata), rebuilds the skeleton on
//! a fixed MMD bone set, and writes a PMX 2.0 model with materials, morphs and
//! rigid-body physics.

pub mod convert;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod pmx;
pub mod settings;
pub mod texture;

pub use error::ConvertError;
pub use logging::{ConversionLog, LogLevel, init_logging};
pub use pipeline::{CancelToken, ConversionOutcome, ConversionStatus, Stage, StageError, run_conversion};
