use chrono::{Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use taxiflow_core::cleaning::{apply_quality_filters, clean_trips, derive_duration};
use taxiflow_core::config::TripSchema;

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, 2)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

fn datetime_series(name: &str, values: Vec<i64>) -> PolarsResult<Column> {
    Ok(Series::new(name.into(), values)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?
        .into())
}

/// Trips starting one minute apart; `seconds` is each ride's length.
fn trips(
    passengers: Vec<Option<f64>>,
    distances: Vec<f64>,
    seconds: Vec<i64>,
) -> PolarsResult<DataFrame> {
    let pickups: Vec<i64> = (0..passengers.len())
        .map(|i| (base_time() + Duration::minutes(i as i64)).and_utc().timestamp_micros())
        .collect();
    let dropoffs: Vec<i64> = pickups
        .iter()
        .zip(&seconds)
        .map(|(start, secs)| start + secs * 1_000_000)
        .collect();
    let fares: Vec<f64> = distances.iter().map(|d| 3.0 + 2.5 * d).collect();

    DataFrame::new(vec![
        datetime_series("tpep_pickup_datetime", pickups)?,
        datetime_series("tpep_dropoff_datetime", dropoffs)?,
        Series::new("passenger_count".into(), passengers).into(),
        Series::new("trip_distance".into(), distances).into(),
        Series::new("fare_amount".into(), fares).into(),
    ])
}

#[test]
fn single_zero_passenger_row_is_removed() -> PolarsResult<()> {
    let mut passengers = vec![Some(1.0); 10];
    passengers[4] = Some(0.0);
    let df = trips(passengers, vec![1.2; 10], vec![600; 10])?;

    let (cleaned, report) = clean_trips(&df, &TripSchema::default())?;

    assert_eq!(cleaned.height(), 9);
    assert_eq!(report.input_rows, 10);
    assert_eq!(report.removed_passenger_count, 1);
    assert_eq!(report.removed_trip_distance, 0);
    assert_eq!(report.removed_duration, 0);
    assert_eq!(report.output_rows, 9);
    Ok(())
}

#[test]
fn survivors_satisfy_every_validity_rule() -> PolarsResult<()> {
    let df = trips(
        vec![Some(1.0), None, Some(-1.0), Some(2.0), Some(1.0), Some(3.0), Some(1.0)],
        vec![1.0, 1.0, 1.0, 0.0, -2.0, 4.0, 2.0],
        vec![300, 300, 300, 300, 300, 0, -120],
    )?;

    let schema = TripSchema::default();
    let (cleaned, report) = clean_trips(&df, &schema)?;

    assert_eq!(cleaned.height(), 1);
    assert_eq!(report.removed_passenger_count, 2);
    assert_eq!(report.removed_trip_distance, 2);
    assert_eq!(report.removed_duration, 2);
    assert_eq!(report.removed_total(), 6);

    for name in ["passenger_count", "trip_distance", "duration_minutes"] {
        let column = cleaned.column(name)?.cast(&DataType::Float64)?;
        assert!(column.f64()?.into_iter().all(|v| matches!(v, Some(x) if x > 0.0)));
    }
    Ok(())
}

#[test]
fn duration_is_recomputed_in_minutes() -> PolarsResult<()> {
    let mut df = trips(vec![Some(1.0); 3], vec![1.0; 3], vec![90, 600, 3_661])?;
    df.with_column(Series::new("duration_minutes".into(), vec![-5.0f64; 3]))?;

    let derived = derive_duration(&df, &TripSchema::default())?;
    let durations: Vec<f64> = derived
        .column("duration_minutes")?
        .f64()?
        .into_iter()
        .flatten()
        .collect();

    assert_eq!(durations.len(), 3);
    assert!((durations[0] - 1.5).abs() < 1e-9);
    assert!((durations[1] - 10.0).abs() < 1e-9);
    assert!((durations[2] - 3_661.0 / 60.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn string_timestamps_are_parsed_before_derivation() -> PolarsResult<()> {
    let df = df!(
        "tpep_pickup_datetime" => &["2023-01-01 00:32:10", "2023-01-01 01:00:00", "not a time"],
        "tpep_dropoff_datetime" => &["2023-01-01 00:40:10", "2023-01-01 00:50:00", "2023-01-01 02:00:00"],
        "passenger_count" => &[1.0f64, 1.0, 1.0],
        "trip_distance" => &[0.97f64, 1.1, 2.0],
    )?;

    let schema = TripSchema::default();
    let derived = derive_duration(&df, &schema)?;
    assert!(matches!(
        derived.column("tpep_pickup_datetime")?.dtype(),
        DataType::Datetime(TimeUnit::Microseconds, None)
    ));

    let (cleaned, report) = apply_quality_filters(&derived, &schema)?;
    assert_eq!(cleaned.height(), 1);
    assert_eq!(report.removed_duration, 2);
    let duration = cleaned.column("duration_minutes")?.f64()?.get(0).unwrap();
    assert!((duration - 8.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn integer_passenger_counts_are_accepted() -> PolarsResult<()> {
    let base = trips(vec![Some(1.0); 4], vec![1.0; 4], vec![60; 4])?;
    let mut df = base.clone();
    df.with_column(Series::new("passenger_count".into(), vec![0i32, 1, 2, 0]))?;

    let (cleaned, report) = clean_trips(&df, &TripSchema::default())?;
    assert_eq!(cleaned.height(), 2);
    assert_eq!(report.removed_passenger_count, 2);
    Ok(())
}
