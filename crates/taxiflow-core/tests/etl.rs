use std::fs::File;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use polars::prelude::*;

use taxiflow_core::config::PipelineConfig;
use taxiflow_core::etl::run_etl;
use taxiflow_core::store::{connect, count_trips, load_trips};
use taxiflow_core::PipelineError;

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// Writes `valid` well-formed trips plus `invalid` rows with zero distance.
fn write_parquet(path: &Path, valid: usize, invalid: usize) -> PolarsResult<()> {
    let rows = valid + invalid;
    let base = NaiveDate::from_ymd_opt(2023, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let pickups: Vec<i64> = (0..rows)
        .map(|i| (base + Duration::seconds(31 * i as i64)).and_utc().timestamp_micros())
        .collect();
    let dropoffs: Vec<i64> = pickups.iter().map(|start| start + 540_000_000).collect();
    let datetime = DataType::Datetime(TimeUnit::Microseconds, None);

    let mut df = DataFrame::new(vec![
        Series::new("VendorID".into(), vec![2i32; rows]).into(),
        Series::new("tpep_pickup_datetime".into(), pickups).cast(&datetime)?.into(),
        Series::new("tpep_dropoff_datetime".into(), dropoffs).cast(&datetime)?.into(),
        Series::new("passenger_count".into(), vec![1.0f64; rows]).into(),
        Series::new(
            "trip_distance".into(),
            (0..rows)
                .map(|i| if i < valid { 1.0 + (i % 17) as f64 } else { 0.0 })
                .collect::<Vec<_>>(),
        )
        .into(),
        Series::new("PULocationID".into(), (0..rows).map(|i| (i % 263) as i32).collect::<Vec<_>>()).into(),
        Series::new("payment_type".into(), (0..rows).map(|i| (i % 4) as i64 + 1).collect::<Vec<_>>()).into(),
        Series::new("fare_amount".into(), (0..rows).map(|i| 3.0 + (i % 17) as f64 * 2.5).collect::<Vec<_>>()).into(),
    ])?;

    let mut file = File::create(path)?;
    ParquetWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

fn config_in(dir: &Path, sample_size: Option<usize>) -> PipelineConfig {
    PipelineConfig {
        input_path: dir.join("trips.parquet"),
        db_path: dir.join("db/nyc_taxi.db"),
        sample_size,
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn large_input_is_sampled_to_configured_size() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_parquet(&dir.path().join("trips.parquet"), 20_000, 250)?;
    let config = config_in(dir.path(), Some(10_000));

    let summary = run_etl(&config).await?;
    assert_eq!(summary.filter.removed_trip_distance, 250);
    assert_eq!(summary.filter.output_rows, 20_000);
    assert_eq!(summary.persisted_rows, 10_000);

    let pool = connect(&config.db_path).await?;
    assert_eq!(count_trips(&pool).await?, 10_000);
    Ok(())
}

#[tokio::test]
async fn small_input_skips_sampling() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_parquet(&dir.path().join("trips.parquet"), 5_000, 10)?;
    let config = config_in(dir.path(), Some(10_000));

    let summary = run_etl(&config).await?;
    assert_eq!(summary.persisted_rows, 5_000);

    let pool = connect(&config.db_path).await?;
    let stored = load_trips(&pool).await?;
    assert_eq!(stored.height(), 5_000);
    assert!(stored.column("duration_minutes").is_ok());
    assert!(stored.column("VendorID").is_ok(), "passthrough columns are kept");
    Ok(())
}

#[tokio::test]
async fn rerunning_leaves_one_copy_of_identical_rows() -> TestResult {
    let dir = tempfile::tempdir()?;
    write_parquet(&dir.path().join("trips.parquet"), 3_000, 0)?;
    let config = config_in(dir.path(), Some(1_000));

    run_etl(&config).await?;
    let pool = connect(&config.db_path).await?;
    let first = load_trips(&pool).await?;
    pool.close().await;

    run_etl(&config).await?;
    let pool = connect(&config.db_path).await?;
    let second = load_trips(&pool).await?;

    assert_eq!(second.height(), 1_000);
    assert!(first.equals_missing(&second));
    Ok(())
}

#[tokio::test]
async fn missing_required_column_is_reported() -> TestResult {
    let dir = tempfile::tempdir()?;
    let mut df = df!("trip_distance" => &[1.0f64, 2.0])?;
    let mut file = File::create(dir.path().join("trips.parquet"))?;
    ParquetWriter::new(&mut file).finish(&mut df)?;

    let result = run_etl(&config_in(dir.path(), None)).await;
    assert!(matches!(result, Err(PipelineError::MissingColumn(_))));
    Ok(())
}
