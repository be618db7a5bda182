use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;

/// Physical dtype every trip timestamp column is normalised to.
pub const TRIP_DATETIME: DataType = DataType::Datetime(TimeUnit::Microseconds, None);

/// Text layout used when a timestamp leaves polars (SQLite storage, console output).
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const PARSE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    PARSE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

pub fn micros_to_naive(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

pub fn format_micros(micros: i64) -> Option<String> {
    micros_to_naive(micros).map(|dt| dt.format(STORAGE_FORMAT).to_string())
}

/// Returns the column as `Datetime(Microseconds, None)`.
///
/// Datetime columns of any unit or zone are cast; string columns are parsed row by row and
/// values that do not parse become null.
pub fn coerce_datetime(column: &Column) -> PolarsResult<Column> {
    match column.dtype() {
        DataType::Datetime(_, _) => column.cast(&TRIP_DATETIME),
        DataType::String => {
            let values: Vec<Option<i64>> = column
                .str()?
                .into_iter()
                .map(|raw| {
                    raw.and_then(parse_timestamp)
                        .map(|dt| dt.and_utc().timestamp_micros())
                })
                .collect();
            Ok(Series::new(column.name().clone(), values)
                .cast(&TRIP_DATETIME)?
                .into())
        }
        other => Err(PolarsError::ComputeError(
            format!(
                "column `{}` has dtype {other} and cannot be read as a timestamp",
                column.name()
            )
            .into(),
        )),
    }
}

/// Microsecond values of a timestamp column, whatever its current datetime representation.
pub fn timestamp_micros(column: &Column) -> PolarsResult<Vec<Option<i64>>> {
    let physical = coerce_datetime(column)?.cast(&DataType::Int64)?;
    Ok(physical.i64()?.into_iter().collect())
}
