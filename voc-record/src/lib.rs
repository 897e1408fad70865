//! Conversion of VOC style annotated images into TFRecord files.

mod common;

pub mod annotation;
pub mod config;
pub mod convert;
pub mod label_map;
pub mod preprocess;
pub mod record;
pub mod split;

pub use annotation::Annotation;
pub use config::Config;
pub use convert::{run, ConversionReport, ItemOutcome, SkipReason};
pub use label_map::LabelMap;
pub use record::{ImageRecord, RecordBuilder};
