// crates/taxiflow-report/src/error.rs

use thiserror::Error;

use crate::charts::ChartError;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report template is invalid: {0}")]
    TemplateSyntax(#[from] handlebars::TemplateError),

    #[error("Report template could not be rendered: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("Chart error: {0}")]
    Chart(#[from] ChartError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

pub type Result<T> = std::result::Result<T, ReportError>;
