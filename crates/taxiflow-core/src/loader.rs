use std::fs::File;
use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::config::TripSchema;
use crate::error::{PipelineError, Result};

/// Reads a Parquet trip file into memory and checks that the columns the ETL stage relies on
/// are present.
pub fn load_trips(path: &Path, schema: &TripSchema) -> Result<DataFrame> {
    info!(path = %path.display(), "loading trip records");
    let file = File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    ensure_columns(&df, &schema.required_columns())?;

    let (rows, columns) = df.shape();
    info!(rows, columns, "initial dataset shape");
    Ok(df)
}

pub fn ensure_columns(df: &DataFrame, names: &[&str]) -> Result<()> {
    for name in names {
        if df.column(name).is_err() {
            return Err(PipelineError::MissingColumn((*name).to_string()));
        }
    }
    Ok(())
}
