pub mod console;
pub mod pipeline;

pub use pipeline::{run, PipelineSummary};
