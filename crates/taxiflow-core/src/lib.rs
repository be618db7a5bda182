pub mod cleaning;
pub mod config;
pub mod error;
pub mod etl;
pub mod loader;
pub mod sampler;
pub mod stats;
pub mod store;
pub mod timestamps;

pub use config::{PipelineConfig, TripSchema};
pub use error::{PipelineError, Result};
