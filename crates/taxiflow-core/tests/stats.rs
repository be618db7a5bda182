use chrono::Weekday;
use polars::prelude::*;

use taxiflow_core::cleaning::derive_duration;
use taxiflow_core::config::TripSchema;
use taxiflow_core::stats::compute_statistics;

fn sample_table() -> PolarsResult<DataFrame> {
    let df = df!(
        // 2023-01-02 is a Monday.
        "tpep_pickup_datetime" => &[
            "2023-01-02 08:05:00",
            "2023-01-02 08:40:00",
            "2023-01-03 17:10:00",
            "2023-01-07 08:59:00",
            "2023-01-08 23:30:00",
        ],
        "tpep_dropoff_datetime" => &[
            "2023-01-02 08:15:00",
            "2023-01-02 09:00:00",
            "2023-01-03 17:40:00",
            "2023-01-07 09:04:00",
            "2023-01-08 23:50:00",
        ],
        "passenger_count" => &[1i64, 2, 1, 4, 1],
        "trip_distance" => &[1.0f64, 2.0, 3.0, 4.0, 5.0],
        "fare_amount" => &[5.0f64, 7.5, 10.0, 12.5, 15.0],
        "payment_type" => &[1i64, 2, 1, 1, 4],
        "PULocationID" => &[Some(161i32), Some(237), Some(161), None, Some(48)],
    )?;
    derive_duration(&df, &TripSchema::default())
}

#[test]
fn statistics_summarise_the_table() -> PolarsResult<()> {
    let stats = compute_statistics(&sample_table()?, &TripSchema::default())?;

    assert_eq!(stats.rows, 5);
    assert_eq!(stats.columns, 8);

    let location = stats
        .column_profiles
        .iter()
        .find(|profile| profile.name == "PULocationID")
        .unwrap();
    assert_eq!(location.null_count, 1);
    assert!((location.null_percentage - 20.0).abs() < 1e-9);

    let described: Vec<&str> = stats.describe.iter().map(|d| d.column.as_str()).collect();
    assert!(described.contains(&"trip_distance"));
    assert!(described.contains(&"duration_minutes"));
    assert!(!described.contains(&"tpep_pickup_datetime"));

    let distance = stats.describe.iter().find(|d| d.column == "trip_distance").unwrap();
    assert_eq!(distance.count, 5);
    assert_eq!(distance.mean, Some(3.0));
    assert_eq!(distance.median, Some(3.0));
    assert_eq!(distance.q25, Some(2.0));

    let duration = stats.range_of("duration_minutes").unwrap();
    assert_eq!(duration.min, Some(5.0));
    assert_eq!(duration.max, Some(30.0));

    let correlation = stats.fare_distance_correlation.unwrap();
    assert!((correlation - 1.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn temporal_and_categorical_counts() -> PolarsResult<()> {
    let stats = compute_statistics(&sample_table()?, &TripSchema::default())?;

    assert_eq!(stats.hourly.len(), 24);
    assert_eq!(stats.hourly[8].count, 3);
    assert_eq!(stats.hourly[17].count, 1);
    assert_eq!(stats.peak_hour, Some(8));

    let weekdays: Vec<(Weekday, usize)> = stats
        .weekdays
        .iter()
        .map(|entry| (entry.weekday, entry.count))
        .collect();
    assert_eq!(weekdays[0], (Weekday::Mon, 2));
    assert_eq!(weekdays[1], (Weekday::Tue, 1));
    assert_eq!(weekdays[5], (Weekday::Sat, 1));
    assert_eq!(weekdays[6], (Weekday::Sun, 1));

    assert_eq!(stats.payment_types[0].value, "1");
    assert_eq!(stats.payment_types[0].count, 3);
    assert!((stats.payment_types[0].percentage - 60.0).abs() < 1e-9);

    let locations: Vec<(&str, usize)> = stats
        .top_pickup_locations
        .iter()
        .map(|entry| (entry.value.as_str(), entry.count))
        .collect();
    assert_eq!(locations, vec![("161", 2), ("48", 1), ("237", 1)]);
    Ok(())
}

#[test]
fn statistics_serialize_weekday_names() -> Result<(), Box<dyn std::error::Error>> {
    let stats = compute_statistics(&sample_table()?, &TripSchema::default())?;
    let json = serde_json::to_value(&stats)?;
    assert_eq!(json["weekdays"][0]["weekday"], "Monday");
    assert_eq!(json["peak_hour"], 8);
    Ok(())
}
