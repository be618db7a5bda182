use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Row, Table};
use polars::prelude::DataFrame;

use taxiflow_core::stats::{self, CategoryCount, TripStatistics};
use taxiflow_report::charts::ChartOutcome;

fn new_table(header: impl Into<Row>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn fmt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => "-".to_string(),
    }
}

/// Every cell of the frame, rendered with polars' own value formatting.
pub fn frame_table(df: &DataFrame) -> Table {
    let mut table = new_table(df.get_column_names().into_iter().map(|name| name.to_string()));
    for row in 0..df.height() {
        let cells: Vec<String> = df
            .get_columns()
            .iter()
            .map(|column| {
                column
                    .get(row)
                    .map(|value| value.to_string())
                    .unwrap_or_default()
            })
            .collect();
        table.add_row(cells);
    }
    table
}

pub fn column_table(stats: &TripStatistics) -> Table {
    let mut table = new_table(["Column", "Type", "Missing", "Missing %"]);
    for profile in &stats.column_profiles {
        table.add_row(vec![
            profile.name.clone(),
            profile.dtype.clone(),
            profile.null_count.to_string(),
            format!("{:.2}", profile.null_percentage),
        ]);
    }
    table
}

pub fn describe_table(stats: &TripStatistics) -> Table {
    let mut table = new_table(["Column", "count", "mean", "std", "min", "25%", "50%", "75%", "max"]);
    for summary in &stats.describe {
        table.add_row(vec![
            summary.column.clone(),
            summary.count.to_string(),
            fmt(summary.mean, 4),
            fmt(summary.std, 4),
            fmt(summary.min, 4),
            fmt(summary.q25, 4),
            fmt(summary.median, 4),
            fmt(summary.q75, 4),
            fmt(summary.max, 4),
        ]);
    }
    table
}

pub fn range_table(stats: &TripStatistics) -> Table {
    let mut table = new_table(["Column", "min", "max"]);
    for range in &stats.ranges {
        table.add_row(vec![range.column.clone(), fmt(range.min, 2), fmt(range.max, 2)]);
    }
    table
}

pub fn temporal_table(stats: &TripStatistics) -> Table {
    let mut table = new_table(["Hour", "Trips"]);
    for entry in &stats.hourly {
        let marker = if Some(entry.hour) == stats.peak_hour { " (peak)" } else { "" };
        table.add_row(vec![format!("{}:00{marker}", entry.hour), entry.count.to_string()]);
    }
    for entry in &stats.weekdays {
        table.add_row(vec![stats::weekday_name(entry.weekday).to_string(), entry.count.to_string()]);
    }
    table
}

pub fn category_table(label: &str, counts: &[CategoryCount]) -> Table {
    let mut table = new_table([label, "Trips", "Share %"]);
    for entry in counts {
        table.add_row(vec![
            entry.value.clone(),
            entry.count.to_string(),
            format!("{:.2}", entry.percentage),
        ]);
    }
    table
}

pub fn chart_table(charts: &[ChartOutcome]) -> Table {
    let mut table = new_table(["Chart", "Status"]);
    for outcome in charts {
        let status = match &outcome.error {
            None => "ok".to_string(),
            Some(err) => format!("failed: {err}"),
        };
        table.add_row(vec![outcome.path.display().to_string(), status]);
    }
    table
}

/// The EDA console report: every statistics table followed by the chart outcomes.
pub fn print_statistics(stats: &TripStatistics, charts: &[ChartOutcome]) {
    println!("Loaded {} rows x {} columns\n", stats.rows, stats.columns);
    println!("Data types and missing values\n{}\n", column_table(stats));
    println!("Descriptive statistics\n{}\n", describe_table(stats));
    println!("Value ranges\n{}", range_table(stats));
    println!(
        "Fare/distance correlation: {}\n",
        fmt(stats.fare_distance_correlation, 3)
    );
    println!("Trips by hour and weekday\n{}\n", temporal_table(stats));
    println!("Payment types\n{}\n", category_table("Payment type", &stats.payment_types));
    println!(
        "Top pickup locations\n{}\n",
        category_table("Location ID", &stats.top_pickup_locations)
    );
    println!("Charts\n{}", chart_table(charts));
}
