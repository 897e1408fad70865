//! One-shot object detection with a TensorFlow SavedModel.

mod common;

pub mod config;
pub mod session;

pub use config::{SessionConfig, TensorName};
pub use session::{InferenceOutput, InferenceSession};
