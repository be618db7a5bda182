use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::{PdfRenderer, RenderError};
use crate::compose::HtmlDocument;

const ENGINE: &str = "wkhtmltopdf";

/// Command-line options passed ahead of the input and output paths.
pub const WKHTMLTOPDF_OPTIONS: &[&str] = &[
    "--page-size",
    "A4",
    "--margin-top",
    "0.75in",
    "--margin-right",
    "0.75in",
    "--margin-bottom",
    "0.75in",
    "--margin-left",
    "0.75in",
    "--encoding",
    "UTF-8",
    "--no-outline",
    "--enable-local-file-access",
    "--disable-external-links",
    "--print-media-type",
    "--disable-smart-shrinking",
    "--zoom",
    "1.0",
    "--dpi",
    "300",
    "--image-quality",
    "100",
    "--disable-javascript",
    "--load-error-handling",
    "ignore",
    "--load-media-error-handling",
    "ignore",
];

/// Runs the external `wkhtmltopdf` binary on the HTML file already written to disk.
#[derive(Debug, Clone)]
pub struct WkhtmltopdfRenderer {
    binary: PathBuf,
}

impl WkhtmltopdfRenderer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(WKHTMLTOPDF_OPTIONS).arg(input).arg(output);
        command
    }
}

impl PdfRenderer for WkhtmltopdfRenderer {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn render(&self, html: &HtmlDocument, output: &Path) -> Result<(), RenderError> {
        debug!(binary = %self.binary.display(), input = %html.path.display(), "invoking wkhtmltopdf");
        let result = self.command(&html.path, output).output();

        let finished = match result {
            Ok(finished) => finished,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(RenderError::Unavailable {
                    engine: ENGINE,
                    reason: format!("`{}` was not found", self.binary.display()),
                });
            }
            Err(source) => return Err(RenderError::Io { engine: ENGINE, source }),
        };

        if finished.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&finished.stderr);
        let message = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| format!("exited with {}", finished.status));
        Err(RenderError::Failed {
            engine: ENGINE,
            message,
        })
    }
}
