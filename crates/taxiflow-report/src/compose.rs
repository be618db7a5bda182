use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use handlebars::Handlebars;
use serde::Serialize;
use tracing::{info, warn};

use taxiflow_core::stats::{CategoryCount, TripStatistics};

use crate::error::Result;

/// Built-in report layout, used unless a template file is configured.
pub const REPORT_TEMPLATE: &str = include_str!("../templates/report.html.hbs");
pub const REPORT_TITLE: &str = "NYC Taxi Trip Analysis Report";

const TEMPLATE_NAME: &str = "report";

/// A rendered HTML report and the file it was written to.
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub html_path: PathBuf,
    pub bytes: usize,
    /// Titles of the embedded charts, in report order.
    pub embedded: Vec<String>,
    /// Expected chart files that were missing or unreadable.
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddedImage {
    pub name: String,
    /// `data:image/png;base64,...` URL.
    pub data: String,
}

#[derive(Serialize)]
struct ReportContext {
    title: &'static str,
    generated_at: String,
    shape: String,
    columns: Vec<ColumnRow>,
    describe: Vec<DescribeRow>,
    ranges: Vec<RangeRow>,
    correlation: String,
    peak_hour: String,
    payment_types: Vec<CategoryRow>,
    top_pickup_locations: Vec<CategoryRow>,
    plots: Vec<EmbeddedImage>,
}

#[derive(Serialize)]
struct ColumnRow {
    name: String,
    dtype: String,
    null_count: usize,
    null_percentage: String,
}

#[derive(Serialize)]
struct DescribeRow {
    column: String,
    count: usize,
    mean: String,
    std: String,
    min: String,
    q25: String,
    median: String,
    q75: String,
    max: String,
}

#[derive(Serialize)]
struct RangeRow {
    column: String,
    min: String,
    max: String,
}

#[derive(Serialize)]
struct CategoryRow {
    value: String,
    count: usize,
    percentage: String,
}

impl ReportContext {
    fn new(stats: &TripStatistics, plots: Vec<EmbeddedImage>) -> Self {
        Self {
            title: REPORT_TITLE,
            generated_at: Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
            shape: format_shape(stats.rows, stats.columns),
            columns: stats
                .column_profiles
                .iter()
                .map(|profile| ColumnRow {
                    name: profile.name.clone(),
                    dtype: profile.dtype.clone(),
                    null_count: profile.null_count,
                    null_percentage: format!("{:.2}", profile.null_percentage),
                })
                .collect(),
            describe: stats
                .describe
                .iter()
                .map(|summary| DescribeRow {
                    column: summary.column.clone(),
                    count: summary.count,
                    mean: format_value(summary.mean, 4),
                    std: format_value(summary.std, 4),
                    min: format_value(summary.min, 4),
                    q25: format_value(summary.q25, 4),
                    median: format_value(summary.median, 4),
                    q75: format_value(summary.q75, 4),
                    max: format_value(summary.max, 4),
                })
                .collect(),
            ranges: stats
                .ranges
                .iter()
                .map(|range| RangeRow {
                    column: range.column.clone(),
                    min: format_value(range.min, 2),
                    max: format_value(range.max, 2),
                })
                .collect(),
            correlation: format_value(stats.fare_distance_correlation, 3),
            peak_hour: stats
                .peak_hour
                .map(|hour| format!("{hour}:00"))
                .unwrap_or_else(|| "n/a".to_string()),
            payment_types: stats.payment_types.iter().map(category_row).collect(),
            top_pickup_locations: stats.top_pickup_locations.iter().map(category_row).collect(),
            plots,
        }
    }
}

fn category_row(entry: &CategoryCount) -> CategoryRow {
    CategoryRow {
        value: entry.value.clone(),
        count: entry.count,
        percentage: format!("{:.2}", entry.percentage),
    }
}

/// Renders the report for `stats`, embedding every chart in `chart_paths` that exists, and
/// writes it to `html_path`. Missing charts are skipped with a warning.
pub fn compose_report(
    stats: &TripStatistics,
    chart_paths: &[PathBuf],
    template_path: Option<&Path>,
    html_path: &Path,
) -> Result<(HtmlDocument, ReportSummary)> {
    let template = match template_path {
        Some(path) => fs::read_to_string(path)?,
        None => REPORT_TEMPLATE.to_string(),
    };

    let (plots, skipped) = embed_images(chart_paths);
    let embedded: Vec<String> = plots.iter().map(|plot| plot.name.clone()).collect();
    let html = render_html(&template, &ReportContext::new(stats, plots))?;

    if let Some(parent) = html_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(html_path, &html)?;
    info!(
        path = %html_path.display(),
        bytes = html.len(),
        embedded = embedded.len(),
        skipped = skipped.len(),
        "HTML report written"
    );

    let summary = ReportSummary {
        html_path: html_path.to_path_buf(),
        bytes: html.len(),
        embedded,
        skipped,
    };
    let document = HtmlDocument {
        path: html_path.to_path_buf(),
        content: html,
    };
    Ok((document, summary))
}

fn render_html(template: &str, context: &ReportContext) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_template_string(TEMPLATE_NAME, template)?;
    Ok(handlebars.render(TEMPLATE_NAME, context)?)
}

/// Reads each image into a data URL. Returns the embedded images and the paths that could
/// not be read.
pub fn embed_images(paths: &[PathBuf]) -> (Vec<EmbeddedImage>, Vec<PathBuf>) {
    let mut embedded = Vec::new();
    let mut skipped = Vec::new();

    for path in paths {
        match fs::read(path) {
            Ok(bytes) => embedded.push(EmbeddedImage {
                name: title_from_file_name(path),
                data: data_url(&bytes),
            }),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "chart image unavailable, skipping");
                skipped.push(path.clone());
            }
        }
    }
    (embedded, skipped)
}

pub fn data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// `fare_vs_distance.png` becomes "Fare Vs Distance".
pub fn title_from_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_default();

    let mut title = String::with_capacity(stem.len());
    let mut in_word = false;
    for ch in stem.chars() {
        if ch.is_alphabetic() {
            if in_word {
                title.extend(ch.to_lowercase());
            } else {
                title.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            title.push(ch);
            in_word = false;
        }
    }
    title
}

pub fn format_shape(rows: usize, columns: usize) -> String {
    format!("{} rows × {} columns", format_thousands(rows), columns)
}

pub fn format_thousands(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_value(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_come_from_file_names() {
        assert_eq!(title_from_file_name(Path::new("plots/fare_vs_distance.png")), "Fare Vs Distance");
        assert_eq!(title_from_file_name(Path::new("duration_boxplot.png")), "Duration Boxplot");
        assert_eq!(title_from_file_name(Path::new("top_10_zones.png")), "Top 10 Zones");
    }

    #[test]
    fn shape_uses_thousands_separators() {
        assert_eq!(format_shape(10_000, 20), "10,000 rows × 20 columns");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1_234_567), "1,234,567");
        assert_eq!(format_thousands(0), "0");
    }

    #[test]
    fn data_urls_are_base64_png() {
        assert_eq!(data_url(b"png"), "data:image/png;base64,cG5n");
    }

    #[test]
    fn missing_values_render_as_not_available() {
        assert_eq!(format_value(None, 2), "n/a");
        assert_eq!(format_value(Some(f64::NAN), 2), "n/a");
        assert_eq!(format_value(Some(1.23456), 3), "1.235");
    }
}
