use std::collections::HashMap;

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use polars::prelude::*;
use serde::{Serialize, Serializer};

use crate::config::TripSchema;
use crate::timestamps::{micros_to_naive, timestamp_micros};

const TOP_LOCATIONS: usize = 10;

pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Everything the report needs to know about the persisted trip table.
#[derive(Debug, Clone, Serialize)]
pub struct TripStatistics {
    pub rows: usize,
    pub columns: usize,
    pub column_profiles: Vec<ColumnProfile>,
    pub describe: Vec<NumericSummary>,
    pub ranges: Vec<ValueRange>,
    pub fare_distance_correlation: Option<f64>,
    pub hourly: Vec<HourCount>,
    pub peak_hour: Option<u32>,
    pub weekdays: Vec<WeekdayCount>,
    pub payment_types: Vec<CategoryCount>,
    pub top_pickup_locations: Vec<CategoryCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub null_count: usize,
    pub null_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRange {
    pub column: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeekdayCount {
    #[serde(serialize_with = "serialize_weekday")]
    pub weekday: Weekday,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub value: String,
    pub count: usize,
    pub percentage: f64,
}

impl TripStatistics {
    pub fn range_of(&self, column: &str) -> Option<&ValueRange> {
        self.ranges.iter().find(|range| range.column == column)
    }
}

pub fn compute_statistics(df: &DataFrame, schema: &TripSchema) -> PolarsResult<TripStatistics> {
    let rows = df.height();

    let column_profiles = df
        .get_columns()
        .iter()
        .map(|column| ColumnProfile {
            name: column.name().to_string(),
            dtype: column.dtype().to_string(),
            null_count: column.null_count(),
            null_percentage: percentage(column.null_count(), rows),
        })
        .collect();

    let mut describe = Vec::new();
    for column in df.get_columns() {
        if is_numeric(column.dtype()) {
            let values = non_null_f64(column)?;
            describe.push(describe_values(column.name().as_str(), &values));
        }
    }

    let mut ranges = Vec::new();
    for name in [
        &schema.trip_distance,
        &schema.duration,
        &schema.fare_amount,
        &schema.passenger_count,
    ] {
        if let Ok(column) = df.column(name) {
            let values = non_null_f64(column)?;
            ranges.push(ValueRange {
                column: name.clone(),
                min: min_of(&values),
                max: max_of(&values),
            });
        }
    }

    let fare_distance_correlation = match (
        df.column(&schema.trip_distance),
        df.column(&schema.fare_amount),
    ) {
        (Ok(distance), Ok(fare)) => pearson(&paired_values(distance, fare)?),
        _ => None,
    };

    let pickups = match df.column(&schema.pickup) {
        Ok(column) => pickup_times(column)?,
        Err(_) => Vec::new(),
    };
    let hourly = hourly_counts(&pickups);
    let peak_hour = peak_hour(&hourly);
    let weekdays = weekday_counts(&pickups);

    let payment_types = match df.column(&schema.payment_type) {
        Ok(column) => value_counts(column, rows)?,
        Err(_) => Vec::new(),
    };
    let top_pickup_locations = match df.column(&schema.pickup_location) {
        Ok(column) => {
            let mut counts = value_counts(column, rows)?;
            counts.truncate(TOP_LOCATIONS);
            counts
        }
        Err(_) => Vec::new(),
    };

    Ok(TripStatistics {
        rows,
        columns: df.width(),
        column_profiles,
        describe,
        ranges,
        fare_distance_correlation,
        hourly,
        peak_hour,
        weekdays,
        payment_types,
        top_pickup_locations,
    })
}

pub fn is_numeric(dtype: &DataType) -> bool {
    dtype.is_integer() || dtype.is_float()
}

/// Non-null values of a numeric column as f64.
pub fn non_null_f64(column: &Column) -> PolarsResult<Vec<f64>> {
    let cast = column.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().flatten().collect())
}

/// (x, y) pairs from rows where both columns are non-null.
pub fn paired_values(x: &Column, y: &Column) -> PolarsResult<Vec<(f64, f64)>> {
    let x = x.cast(&DataType::Float64)?;
    let y = y.cast(&DataType::Float64)?;
    Ok(x.f64()?
        .into_iter()
        .zip(y.f64()?.into_iter())
        .filter_map(|pair| match pair {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        })
        .collect())
}

pub fn pickup_times(column: &Column) -> PolarsResult<Vec<NaiveDateTime>> {
    Ok(timestamp_micros(column)?
        .into_iter()
        .flatten()
        .filter_map(micros_to_naive)
        .collect())
}

pub fn describe_values(column: &str, values: &[f64]) -> NumericSummary {
    let count = values.len();
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    NumericSummary {
        column: column.to_string(),
        count,
        mean: mean(values),
        std: sample_std(values),
        min: sorted.first().copied(),
        q25: quantile(&sorted, 0.25),
        median: quantile(&sorted, 0.5),
        q75: quantile(&sorted, 0.75),
        max: sorted.last().copied(),
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with one delta degree of freedom.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Linear-interpolation quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

pub fn hourly_counts(pickups: &[NaiveDateTime]) -> Vec<HourCount> {
    let mut counts = [0usize; 24];
    for pickup in pickups {
        counts[pickup.hour() as usize] += 1;
    }
    counts
        .iter()
        .enumerate()
        .map(|(hour, &count)| HourCount {
            hour: hour as u32,
            count,
        })
        .collect()
}

/// Busiest hour; the earliest hour wins a tie. `None` when there are no trips.
pub fn peak_hour(hourly: &[HourCount]) -> Option<u32> {
    let mut best: Option<HourCount> = None;
    for entry in hourly {
        if entry.count == 0 {
            continue;
        }
        match best {
            Some(current) if current.count >= entry.count => {}
            _ => best = Some(*entry),
        }
    }
    best.map(|entry| entry.hour)
}

pub fn weekday_counts(pickups: &[NaiveDateTime]) -> Vec<WeekdayCount> {
    let mut counts = [0usize; 7];
    for pickup in pickups {
        counts[pickup.weekday().num_days_from_monday() as usize] += 1;
    }
    WEEKDAYS
        .iter()
        .zip(counts)
        .map(|(&weekday, count)| WeekdayCount { weekday, count })
        .collect()
}

/// Frequency of each distinct non-null value, most frequent first; ties are ordered by
/// value. Percentages are relative to `total_rows`.
pub fn value_counts(column: &Column, total_rows: usize) -> PolarsResult<Vec<CategoryCount>> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut numeric_keys: HashMap<String, f64> = HashMap::new();
    let numeric = is_numeric(column.dtype());

    let as_text = column.cast(&DataType::String)?;
    for value in as_text.str()?.into_iter().flatten() {
        *counts.entry(value.to_string()).or_default() += 1;
        if numeric {
            if let Ok(parsed) = value.parse::<f64>() {
                numeric_keys.insert(value.to_string(), parsed);
            }
        }
    }

    let mut entries: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(value, count)| CategoryCount {
            percentage: percentage(count, total_rows),
            value,
            count,
        })
        .collect();

    entries.sort_by(|a, b| {
        b.count.cmp(&a.count).then_with(|| {
            match (numeric_keys.get(&a.value), numeric_keys.get(&b.value)) {
                (Some(x), Some(y)) => x.total_cmp(y),
                _ => a.value.cmp(&b.value),
            }
        })
    });
    Ok(entries)
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn serialize_weekday<S: Serializer>(weekday: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(weekday_name(*weekday))
}

/// Percentage rounded to two decimals.
fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantiles_interpolate_linearly() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.0), Some(1.0));
        assert_eq!(quantile(&sorted, 0.25), Some(1.75));
        assert_eq!(quantile(&sorted, 0.5), Some(2.5));
        assert_eq!(quantile(&sorted, 1.0), Some(4.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn describe_matches_hand_computed_values() {
        let summary = describe_values("x", &[4.0, 2.0, 6.0, 8.0]);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.mean, Some(5.0));
        assert_eq!(summary.min, Some(2.0));
        assert_eq!(summary.max, Some(8.0));
        assert_eq!(summary.median, Some(5.0));
        let std = summary.std.unwrap();
        assert!((std - (20.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn std_needs_two_values() {
        assert_eq!(sample_std(&[3.0]), None);
        assert_eq!(describe_values("x", &[]).mean, None);
    }

    #[test]
    fn pearson_detects_perfect_and_undefined_correlation() {
        let perfect: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 2.5 * i as f64 + 3.0)).collect();
        assert!((pearson(&perfect).unwrap() - 1.0).abs() < 1e-12);

        let inverse: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, -(i as f64))).collect();
        assert!((pearson(&inverse).unwrap() + 1.0).abs() < 1e-12);

        let flat = vec![(1.0, 5.0), (2.0, 5.0), (3.0, 5.0)];
        assert_eq!(pearson(&flat), None);
    }

    #[test]
    fn peak_hour_prefers_earliest_tie() {
        let mut hourly: Vec<HourCount> = (0..24).map(|hour| HourCount { hour, count: 0 }).collect();
        hourly[8].count = 5;
        hourly[18].count = 5;
        hourly[3].count = 2;
        assert_eq!(peak_hour(&hourly), Some(8));
        assert_eq!(peak_hour(&hourly_counts(&[])), None);
    }

    #[test]
    fn weekday_counts_start_on_monday() {
        let monday = crate::timestamps::parse_timestamp("2023-01-02 10:00:00").unwrap();
        let sunday = crate::timestamps::parse_timestamp("2023-01-01 23:00:00").unwrap();
        let counts = weekday_counts(&[monday, sunday, sunday]);
        assert_eq!(counts.len(), 7);
        assert_eq!(counts[0], WeekdayCount { weekday: Weekday::Mon, count: 1 });
        assert_eq!(counts[6], WeekdayCount { weekday: Weekday::Sun, count: 2 });
    }

    #[test]
    fn value_counts_order_by_frequency_then_value() -> PolarsResult<()> {
        let column: Column = Series::new("payment_type".into(), vec![2i64, 1, 10, 2, 1, 3]).into();
        let counts = value_counts(&column, 6)?;
        let order: Vec<&str> = counts.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(order, vec!["1", "2", "3", "10"]);
        assert_eq!(counts[0].count, 2);
        assert!((counts[0].percentage - 33.33).abs() < 1e-9);
        Ok(())
    }
}
