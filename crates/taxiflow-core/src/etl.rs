use std::path::PathBuf;

use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::info;

use crate::cleaning::{clean_trips, FilterReport};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::{loader, sampler, store};

#[derive(Debug, Clone, Serialize)]
pub struct EtlSummary {
    pub input_path: PathBuf,
    pub db_path: PathBuf,
    pub filter: FilterReport,
    pub sample_size: Option<usize>,
    pub persisted_rows: usize,
}

/// Cleans and samples an in-memory trip table. Shared by the file-based ETL entry point and
/// callers that already hold a frame.
pub fn transform(df: &DataFrame, config: &PipelineConfig) -> Result<(DataFrame, FilterReport)> {
    let (cleaned, report) = clean_trips(df, &config.schema)?;
    info!(
        rows = report.output_rows,
        removed = report.removed_total(),
        "applied data quality filters"
    );
    let sampled = sampler::sample_rows(&cleaned, config.sample_size)?;
    Ok((sampled, report))
}

/// Extract from Parquet, transform, and load into the `trips` table, replacing prior data.
pub async fn run_etl(config: &PipelineConfig) -> Result<EtlSummary> {
    info!(path = %config.input_path.display(), "starting ETL");
    let raw = loader::load_trips(&config.input_path, &config.schema)?;
    let (prepared, filter) = transform(&raw, config)?;

    let pool = store::connect(&config.db_path).await?;
    let persisted_rows = store::replace_trips(&pool, &prepared).await?;
    pool.close().await;

    info!(rows = persisted_rows, db = %config.db_path.display(), "ETL complete");
    Ok(EtlSummary {
        input_path: config.input_path.clone(),
        db_path: config.db_path.clone(),
        filter,
        sample_size: config.sample_size,
        persisted_rows,
    })
}
