use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::TripSchema;
use crate::timestamps::{coerce_datetime, timestamp_micros};

const MICROS_PER_MINUTE: f64 = 60.0 * 1_000_000.0;

/// Row counts removed by each validity rule. Rules are counted in the order
/// passenger count, trip distance, duration; each count only considers rows that
/// survived the previous rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterReport {
    pub input_rows: usize,
    pub removed_passenger_count: usize,
    pub removed_trip_distance: usize,
    pub removed_duration: usize,
    pub output_rows: usize,
}

impl FilterReport {
    pub fn removed_total(&self) -> usize {
        self.input_rows - self.output_rows
    }
}

/// Normalises the pickup/dropoff columns to microsecond datetimes and (re)computes the
/// duration column in minutes. Rows with a null timestamp get a null duration.
pub fn derive_duration(df: &DataFrame, schema: &TripSchema) -> PolarsResult<DataFrame> {
    let pickup = coerce_datetime(df.column(&schema.pickup)?)?;
    let dropoff = coerce_datetime(df.column(&schema.dropoff)?)?;

    let pickup_micros = timestamp_micros(&pickup)?;
    let dropoff_micros = timestamp_micros(&dropoff)?;

    let durations: Vec<Option<f64>> = pickup_micros
        .iter()
        .zip(dropoff_micros.iter())
        .map(|(start, end)| match (start, end) {
            (Some(start), Some(end)) => Some((end - start) as f64 / MICROS_PER_MINUTE),
            _ => None,
        })
        .collect();

    let mut output = df.clone();
    output.with_column(pickup)?;
    output.with_column(dropoff)?;
    output.with_column(Series::new(schema.duration.as_str().into(), durations))?;
    Ok(output)
}

/// Drops every row whose passenger count, trip distance, or duration is not strictly
/// positive. Nulls never pass.
pub fn apply_quality_filters(
    df: &DataFrame,
    schema: &TripSchema,
) -> PolarsResult<(DataFrame, FilterReport)> {
    let len = df.height();

    let passengers = df
        .column(&schema.passenger_count)?
        .cast(&DataType::Float64)?;
    let distances = df.column(&schema.trip_distance)?.cast(&DataType::Float64)?;
    let durations = df.column(&schema.duration)?.cast(&DataType::Float64)?;

    let passengers = passengers.f64()?;
    let distances = distances.f64()?;
    let durations = durations.f64()?;

    let mut report = FilterReport {
        input_rows: len,
        ..FilterReport::default()
    };
    let mut keep = Vec::with_capacity(len);

    for idx in 0..len {
        let valid = if !is_positive(passengers.get(idx)) {
            report.removed_passenger_count += 1;
            false
        } else if !is_positive(distances.get(idx)) {
            report.removed_trip_distance += 1;
            false
        } else if !is_positive(durations.get(idx)) {
            report.removed_duration += 1;
            false
        } else {
            true
        };
        keep.push(valid);
    }

    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    let output = df.filter(&mask)?;
    report.output_rows = output.height();

    info!(
        removed = report.removed_passenger_count,
        "removed records with zero passengers"
    );
    info!(
        removed = report.removed_trip_distance,
        "removed records with zero distance"
    );
    info!(
        removed = report.removed_duration,
        "removed records with invalid duration"
    );

    Ok((output, report))
}

/// Derivation followed by filtering, the full row-level cleaning step.
pub fn clean_trips(df: &DataFrame, schema: &TripSchema) -> PolarsResult<(DataFrame, FilterReport)> {
    let derived = derive_duration(df, schema)?;
    apply_quality_filters(&derived, schema)
}

fn is_positive(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v > 0.0)
}
