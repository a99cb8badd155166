pub mod runner;

pub use runner::{ConversionJob, Pipeline};
