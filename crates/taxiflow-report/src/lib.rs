pub mod charts;
pub mod compose;
pub mod error;
pub mod pdf;

pub use charts::{render_all, ChartData, ChartKind, ChartOutcome, ChartStyle};
pub use compose::{compose_report, HtmlDocument, ReportSummary};
pub use error::{ReportError, Result};
pub use pdf::{convert_html_to_pdf, PdfOutcome, PdfRenderer, RenderError};
