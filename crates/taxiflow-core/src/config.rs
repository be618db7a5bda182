use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const DEFAULT_SAMPLE_SIZE: usize = 10_000;

/// Column names of the trip-record layout. Defaults follow the NYC TLC yellow taxi export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TripSchema {
    pub pickup: String,
    pub dropoff: String,
    pub passenger_count: String,
    pub trip_distance: String,
    pub fare_amount: String,
    pub payment_type: String,
    pub pickup_location: String,
    pub duration: String,
}

impl Default for TripSchema {
    fn default() -> Self {
        Self {
            pickup: "tpep_pickup_datetime".to_string(),
            dropoff: "tpep_dropoff_datetime".to_string(),
            passenger_count: "passenger_count".to_string(),
            trip_distance: "trip_distance".to_string(),
            fare_amount: "fare_amount".to_string(),
            payment_type: "payment_type".to_string(),
            pickup_location: "PULocationID".to_string(),
            duration: "duration_minutes".to_string(),
        }
    }
}

impl TripSchema {
    /// Columns the ETL stage cannot run without.
    pub fn required_columns(&self) -> [&str; 4] {
        [
            self.pickup.as_str(),
            self.dropoff.as_str(),
            self.passenger_count.as_str(),
            self.trip_distance.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartSettings {
    pub width: u32,
    pub height: u32,
    pub font_family: String,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 600,
            font_family: "sans-serif".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfSettings {
    /// Executable used by the primary engine.
    pub wkhtmltopdf: PathBuf,
    /// Directories searched for the fallback engine's font family.
    pub font_dirs: Vec<PathBuf>,
    pub font_family: String,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self {
            wkhtmltopdf: PathBuf::from("wkhtmltopdf"),
            font_dirs: vec![
                PathBuf::from("fonts"),
                PathBuf::from("/usr/share/fonts/truetype/liberation"),
                PathBuf::from("/usr/share/fonts/liberation"),
                PathBuf::from("/Library/Fonts"),
            ],
            font_family: "LiberationSans".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub db_path: PathBuf,
    /// `None` (or zero) disables sampling.
    pub sample_size: Option<usize>,
    pub plots_dir: PathBuf,
    pub html_path: PathBuf,
    pub pdf_path: PathBuf,
    /// Optional handlebars template replacing the built-in report layout.
    pub template_path: Option<PathBuf>,
    pub schema: TripSchema,
    pub charts: ChartSettings,
    pub pdf: PdfSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("data/yellow_tripdata_2023-01.parquet"),
            db_path: PathBuf::from("db/nyc_taxi.db"),
            sample_size: Some(DEFAULT_SAMPLE_SIZE),
            plots_dir: PathBuf::from("plots"),
            html_path: PathBuf::from("reports/eda_report.html"),
            pdf_path: PathBuf::from("reports/eda_report.pdf"),
            template_path: None,
            schema: TripSchema::default(),
            charts: ChartSettings::default(),
            pdf: PdfSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Builds the effective configuration: defaults, then the optional TOML file, then
    /// `TAXIFLOW_*` environment variables.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.sample_size = config.sample_size.filter(|&n| n > 0);
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup; split out so tests do not have to
    /// mutate the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TAXIFLOW_INPUT") {
            self.input_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("TAXIFLOW_DB") {
            self.db_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("TAXIFLOW_SAMPLE_SIZE") {
            self.sample_size = parse_sample_size(&value)?;
        }
        if let Some(value) = lookup("TAXIFLOW_PLOTS_DIR") {
            self.plots_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("TAXIFLOW_HTML") {
            self.html_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("TAXIFLOW_PDF") {
            self.pdf_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("TAXIFLOW_WKHTMLTOPDF") {
            self.pdf.wkhtmltopdf = PathBuf::from(value);
        }
        Ok(())
    }
}

/// Parses a sample size setting. `none`, `off`, and `0` disable sampling.
pub fn parse_sample_size(raw: &str) -> Result<Option<usize>> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    let size: usize = trimmed
        .parse()
        .map_err(|_| PipelineError::Config(format!("invalid sample size `{trimmed}`")))?;
    Ok((size > 0).then_some(size))
}
