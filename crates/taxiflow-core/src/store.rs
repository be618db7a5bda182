// crates/taxiflow-core/src/store.rs

use std::path::Path;

use polars::prelude::*;
use sqlx::query_builder::Separated;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, error, info};

use crate::error::{PipelineError, Result};
use crate::timestamps::{format_micros, parse_timestamp, timestamp_micros, TRIP_DATETIME};

pub type DbPool = SqlitePool;

pub const TRIPS_TABLE: &str = "trips";

/// Rows per multi-row INSERT. Keeps the bound-parameter count well under SQLite's limit.
pub const PERSIST_BATCH_SIZE: usize = 500;

/// Opens (creating if needed) the SQLite file at `path`. The pool holds a single
/// connection; the pipeline is the only writer.
pub async fn connect(path: &Path) -> Result<DbPool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    debug!(path = %path.display(), "sqlite connection established");
    Ok(pool)
}

/// Replaces the `trips` table with the contents of `df`. Failures are logged before being
/// returned; batches committed before the failure stay committed.
pub async fn replace_trips(pool: &DbPool, df: &DataFrame) -> Result<usize> {
    match write_table(pool, TRIPS_TABLE, df, PERSIST_BATCH_SIZE).await {
        Ok(rows) => {
            info!(rows, table = TRIPS_TABLE, "saved cleaned data to sqlite");
            Ok(rows)
        }
        Err(err) => {
            error!(error = %err, table = TRIPS_TABLE, "database save failed");
            Err(err)
        }
    }
}

/// Drops and recreates `table` from the frame's schema, then inserts every row in batches of
/// at most `batch_size` rows.
pub async fn write_table(
    pool: &DbPool,
    table: &str,
    df: &DataFrame,
    batch_size: usize,
) -> Result<usize> {
    if batch_size == 0 {
        return Err(PipelineError::Config("batch size must be positive".into()));
    }

    let columns = df
        .get_columns()
        .iter()
        .map(StoredColumn::from_column)
        .collect::<PolarsResult<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(PipelineError::Processing(format!(
            "refusing to write `{table}` without columns"
        )));
    }

    let definitions = columns
        .iter()
        .map(|column| format!("{} {}", quote_ident(&column.name), column.values.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");

    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
        .execute(pool)
        .await?;
    sqlx::query(&format!("CREATE TABLE {} ({definitions})", quote_ident(table)))
        .execute(pool)
        .await?;

    let column_list = columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let rows = df.height();
    let mut written = 0;

    for start in (0..rows).step_by(batch_size) {
        let end = (start + batch_size).min(rows);
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {} ({column_list}) ", quote_ident(table)));
        builder.push_values(start..end, |mut row, idx| {
            for column in &columns {
                column.values.bind(&mut row, idx);
            }
        });
        builder.build().execute(pool).await?;
        written += end - start;
        debug!(batch_start = start, batch_rows = end - start, "inserted batch");
    }

    Ok(written)
}

/// Reads the whole `trips` table back, restoring `TIMESTAMP` columns as datetimes.
pub async fn load_trips(pool: &DbPool) -> Result<DataFrame> {
    read_table(pool, TRIPS_TABLE, None).await
}

/// First `limit` rows of the `trips` table.
pub async fn head_trips(pool: &DbPool, limit: usize) -> Result<DataFrame> {
    read_table(pool, TRIPS_TABLE, Some(limit)).await
}

pub async fn count_trips(pool: &DbPool) -> Result<usize> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(TRIPS_TABLE)))
        .fetch_one(pool)
        .await?;
    Ok(count as usize)
}

pub async fn read_table(pool: &DbPool, table: &str, limit: Option<usize>) -> Result<DataFrame> {
    let declared: Vec<(String, String)> =
        sqlx::query_as("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
            .bind(table)
            .fetch_all(pool)
            .await?;
    if declared.is_empty() {
        return Err(PipelineError::Processing(format!(
            "table `{table}` does not exist; run the ETL stage first"
        )));
    }

    let mut sql = format!("SELECT * FROM {}", quote_ident(table));
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut columns = Vec::with_capacity(declared.len());
    for (idx, (name, declared_type)) in declared.iter().enumerate() {
        columns.push(decode_column(&rows, idx, name, declared_type)?);
    }

    let df = DataFrame::new(columns)?;
    debug!(table, rows = df.height(), "loaded table from sqlite");
    Ok(df)
}

fn decode_column(rows: &[SqliteRow], idx: usize, name: &str, declared_type: &str) -> Result<Column> {
    let series = match declared_type.to_ascii_uppercase().as_str() {
        "INTEGER" => {
            let values = rows
                .iter()
                .map(|row| row.try_get::<Option<i64>, _>(idx))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Series::new(name.into(), values)
        }
        "REAL" => {
            let values = rows
                .iter()
                .map(|row| row.try_get::<Option<f64>, _>(idx))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Series::new(name.into(), values)
        }
        "TIMESTAMP" => {
            let values = rows
                .iter()
                .map(|row| {
                    row.try_get_unchecked::<Option<String>, _>(idx).map(|raw| {
                        raw.as_deref()
                            .and_then(parse_timestamp)
                            .map(|dt| dt.and_utc().timestamp_micros())
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Series::new(name.into(), values).cast(&TRIP_DATETIME)?
        }
        _ => {
            let values = rows
                .iter()
                .map(|row| row.try_get_unchecked::<Option<String>, _>(idx))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Series::new(name.into(), values)
        }
    };
    Ok(series.into())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A frame column converted to the value representation it is stored with.
struct StoredColumn {
    name: String,
    values: StoredValues,
}

enum StoredValues {
    Integer(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    Timestamp(Vec<Option<String>>),
    Text(Vec<Option<String>>),
}

impl StoredColumn {
    fn from_column(column: &Column) -> PolarsResult<Self> {
        let dtype = column.dtype();
        let values = if matches!(dtype, DataType::Datetime(_, _)) {
            StoredValues::Timestamp(
                timestamp_micros(column)?
                    .into_iter()
                    .map(|micros| micros.and_then(format_micros))
                    .collect(),
            )
        } else if dtype.is_integer() || matches!(dtype, DataType::Boolean) {
            let cast = column.cast(&DataType::Int64)?;
            StoredValues::Integer(cast.i64()?.into_iter().collect())
        } else if dtype.is_float() {
            let cast = column.cast(&DataType::Float64)?;
            StoredValues::Real(cast.f64()?.into_iter().collect())
        } else {
            let cast = column.cast(&DataType::String)?;
            StoredValues::Text(
                cast.str()?
                    .into_iter()
                    .map(|value| value.map(str::to_string))
                    .collect(),
            )
        };

        Ok(Self {
            name: column.name().to_string(),
            values,
        })
    }
}

impl StoredValues {
    fn sql_type(&self) -> &'static str {
        match self {
            StoredValues::Integer(_) => "INTEGER",
            StoredValues::Real(_) => "REAL",
            StoredValues::Timestamp(_) => "TIMESTAMP",
            StoredValues::Text(_) => "TEXT",
        }
    }

    fn bind(&self, row: &mut Separated<'_, '_, Sqlite, &'static str>, idx: usize) {
        match self {
            StoredValues::Integer(values) => {
                row.push_bind(values[idx]);
            }
            StoredValues::Real(values) => {
                row.push_bind(values[idx]);
            }
            StoredValues::Timestamp(values) | StoredValues::Text(values) => {
                row.push_bind(values[idx].clone());
            }
        }
    }
}
