//! HTML to PDF conversion through an ordered chain of engines.
//!
//! Each engine writes the PDF itself; an attempt only counts as a success when the output
//! file exists afterwards with a non-zero size. When every engine fails, the HTML report is
//! the final artifact and the run carries on.

mod genpdf_engine;
mod wkhtmltopdf;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use taxiflow_core::config::PdfSettings;

use crate::compose::HtmlDocument;

pub use genpdf_engine::{parse_blocks, GenpdfRenderer, HtmlBlock};
pub use wkhtmltopdf::{WkhtmltopdfRenderer, WKHTMLTOPDF_OPTIONS};

pub trait PdfRenderer {
    fn name(&self) -> &'static str;
    fn render(&self, html: &HtmlDocument, output: &Path) -> Result<(), RenderError>;
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{engine} is not available: {reason}")]
    Unavailable { engine: &'static str, reason: String },

    #[error("{engine} failed: {message}")]
    Failed {
        engine: &'static str,
        message: String,
    },

    #[error("{engine} produced no output at {}", .path.display())]
    EmptyOutput { engine: &'static str, path: PathBuf },

    #[error("{engine} I/O error: {source}")]
    Io {
        engine: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderAttempt {
    pub engine: &'static str,
    pub message: String,
}

impl RenderAttempt {
    pub fn new(engine: &'static str, message: impl Into<String>) -> Self {
        Self {
            engine,
            message: message.into(),
        }
    }
}

impl fmt::Display for RenderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.engine, self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PdfOutcome {
    Rendered {
        engine: &'static str,
        path: PathBuf,
        bytes: u64,
        /// Engines that failed before this one.
        attempts: Vec<RenderAttempt>,
    },
    HtmlOnly {
        html_path: PathBuf,
        attempts: Vec<RenderAttempt>,
    },
}

impl PdfOutcome {
    pub fn pdf_path(&self) -> Option<&Path> {
        match self {
            PdfOutcome::Rendered { path, .. } => Some(path),
            PdfOutcome::HtmlOnly { .. } => None,
        }
    }
}

/// Converts with wkhtmltopdf, falling back to the built-in genpdf engine.
pub fn convert_html_to_pdf(html: &HtmlDocument, output: &Path, settings: &PdfSettings) -> PdfOutcome {
    let primary = WkhtmltopdfRenderer::new(settings.wkhtmltopdf.clone());
    let fallback = GenpdfRenderer::new(settings.font_dirs.clone(), settings.font_family.clone());
    convert_with_renderers(html, output, &[&primary, &fallback])
}

/// Tries each renderer in order until one leaves a non-empty file at `output`.
pub fn convert_with_renderers(
    html: &HtmlDocument,
    output: &Path,
    renderers: &[&dyn PdfRenderer],
) -> PdfOutcome {
    let mut attempts = Vec::new();

    if let Some(parent) = output.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %err, "could not create PDF output directory");
        }
    }

    for renderer in renderers {
        let engine = renderer.name();
        clear_stale_output(output);

        let result = renderer
            .render(html, output)
            .and_then(|()| verify_output(engine, output));
        match result {
            Ok(bytes) => {
                info!(engine, path = %output.display(), bytes, "PDF report written");
                return PdfOutcome::Rendered {
                    engine,
                    path: output.to_path_buf(),
                    bytes,
                    attempts,
                };
            }
            Err(err) => {
                warn!(engine, error = %err, "PDF engine failed");
                attempts.push(RenderAttempt::new(engine, err.to_string()));
            }
        }
    }

    warn!(
        html_path = %html.path.display(),
        attempts = attempts.len(),
        "PDF conversion failed; the HTML report is available instead"
    );
    PdfOutcome::HtmlOnly {
        html_path: html.path.clone(),
        attempts,
    }
}

fn clear_stale_output(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => debug!(path = %output.display(), "removed previous PDF"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %output.display(), error = %err, "could not remove previous PDF"),
    }
}

fn verify_output(engine: &'static str, output: &Path) -> Result<u64, RenderError> {
    match fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(RenderError::EmptyOutput {
            engine,
            path: output.to_path_buf(),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(RenderError::EmptyOutput {
            engine,
            path: output.to_path_buf(),
        }),
        Err(source) => Err(RenderError::Io { engine, source }),
    }
}
