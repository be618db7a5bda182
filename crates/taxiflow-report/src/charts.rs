use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use polars::prelude::{DataFrame, PolarsResult};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use taxiflow_core::config::{ChartSettings, TripSchema};
use taxiflow_core::sampler::{sample_positions, SAMPLE_SEED};
use taxiflow_core::stats::{self, HourCount, TripStatistics, WeekdayCount, WEEKDAYS};

use crate::error::Result;

pub const HISTOGRAM_BINS: usize = 50;
/// Upper bound on points drawn in the fare/distance scatter.
pub const SCATTER_SAMPLE_SIZE: usize = 5_000;

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("no data to plot for {0}")]
    EmptyData(&'static str),

    #[error("drawing failed: {0}")]
    Draw(String),

    #[error("chart file could not be prepared: {0}")]
    Io(#[from] io::Error),
}

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for ChartError {
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        ChartError::Draw(err.to_string())
    }
}

/// Figure geometry, fonts and colours shared by every chart.
#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
    pub font_family: String,
    pub caption_size: f64,
    pub label_size: f64,
    pub bar_color: RGBColor,
    pub point_color: RGBColor,
    pub accent_color: RGBColor,
}

impl ChartStyle {
    pub fn from_settings(settings: &ChartSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            font_family: settings.font_family.clone(),
            caption_size: 28.0,
            label_size: 16.0,
            bar_color: RGBColor(70, 130, 180),
            point_color: RGBColor(31, 119, 180),
            accent_color: RGBColor(214, 39, 40),
        }
    }

    fn caption(&self) -> (&str, f64) {
        (self.font_family.as_str(), self.caption_size)
    }

    fn label(&self) -> (&str, f64) {
        (self.font_family.as_str(), self.label_size)
    }
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self::from_settings(&ChartSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    TripDistance,
    DurationBoxplot,
    FareAmount,
    FareVsDistance,
    HourlyDistribution,
    WeekdayDistribution,
}

impl ChartKind {
    /// Render order, which is also the order charts appear in the report.
    pub const ALL: [ChartKind; 6] = [
        ChartKind::TripDistance,
        ChartKind::DurationBoxplot,
        ChartKind::FareAmount,
        ChartKind::FareVsDistance,
        ChartKind::HourlyDistribution,
        ChartKind::WeekdayDistribution,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ChartKind::TripDistance => "trip_distance.png",
            ChartKind::DurationBoxplot => "duration_boxplot.png",
            ChartKind::FareAmount => "fare_amount.png",
            ChartKind::FareVsDistance => "fare_vs_distance.png",
            ChartKind::HourlyDistribution => "hourly_distribution.png",
            ChartKind::WeekdayDistribution => "weekday_distribution.png",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ChartKind::TripDistance => "Trip Distance Distribution",
            ChartKind::DurationBoxplot => "Trip Duration Distribution (Box Plot)",
            ChartKind::FareAmount => "Fare Amount Distribution",
            ChartKind::FareVsDistance => "Fare Amount vs. Trip Distance",
            ChartKind::HourlyDistribution => "Trip Distribution by Hour of Day",
            ChartKind::WeekdayDistribution => "Trip Distribution by Day of Week",
        }
    }
}

/// Where each chart of a run is written, in render order.
pub fn chart_paths(plots_dir: &Path) -> Vec<PathBuf> {
    ChartKind::ALL
        .iter()
        .map(|kind| plots_dir.join(kind.file_name()))
        .collect()
}

/// The plotted series, extracted once from the persisted trip table.
#[derive(Debug, Clone, Default)]
pub struct ChartData {
    pub distances: Vec<f64>,
    pub durations: Vec<f64>,
    pub fares: Vec<f64>,
    /// (distance, fare) pairs, capped at [`SCATTER_SAMPLE_SIZE`].
    pub fare_vs_distance: Vec<(f64, f64)>,
    /// Correlation over every row, not only the drawn sample.
    pub correlation: Option<f64>,
    pub hourly: Vec<HourCount>,
    pub peak_hour: Option<u32>,
    pub weekdays: Vec<WeekdayCount>,
}

impl ChartData {
    pub fn from_frame(
        df: &DataFrame,
        schema: &TripSchema,
        statistics: &TripStatistics,
    ) -> PolarsResult<Self> {
        let values = |name: &str| match df.column(name) {
            Ok(column) => stats::non_null_f64(column),
            Err(_) => Ok(Vec::new()),
        };

        let pairs = match (
            df.column(&schema.trip_distance),
            df.column(&schema.fare_amount),
        ) {
            (Ok(distance), Ok(fare)) => stats::paired_values(distance, fare)?,
            _ => Vec::new(),
        };
        let fare_vs_distance = if pairs.len() > SCATTER_SAMPLE_SIZE {
            sample_positions(pairs.len(), SCATTER_SAMPLE_SIZE, SAMPLE_SEED)
                .into_iter()
                .map(|idx| pairs[idx])
                .collect()
        } else {
            pairs
        };

        Ok(Self {
            distances: values(&schema.trip_distance)?,
            durations: values(&schema.duration)?,
            fares: values(&schema.fare_amount)?,
            fare_vs_distance,
            correlation: statistics.fare_distance_correlation,
            hourly: statistics.hourly.clone(),
            peak_hour: statistics.peak_hour,
            weekdays: statistics.weekdays.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartOutcome {
    pub kind: ChartKind,
    pub path: PathBuf,
    pub error: Option<String>,
}

impl ChartOutcome {
    pub fn is_rendered(&self) -> bool {
        self.error.is_none()
    }
}

/// Renders every chart into `plots_dir`. A chart that fails is logged and reported in its
/// outcome; the remaining charts are still attempted.
pub fn render_all(data: &ChartData, style: &ChartStyle, plots_dir: &Path) -> Result<Vec<ChartOutcome>> {
    fs::create_dir_all(plots_dir)?;

    let outcomes: Vec<ChartOutcome> = ChartKind::ALL
        .iter()
        .map(|&kind| {
            let path = plots_dir.join(kind.file_name());
            match render_chart(kind, data, style, &path) {
                Ok(()) => {
                    info!(chart = kind.file_name(), "chart saved");
                    ChartOutcome { kind, path, error: None }
                }
                Err(err) => {
                    error!(chart = kind.file_name(), error = %err, "chart could not be rendered");
                    ChartOutcome {
                        kind,
                        path,
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect();

    let rendered = outcomes.iter().filter(|outcome| outcome.is_rendered()).count();
    info!(rendered, total = outcomes.len(), dir = %plots_dir.display(), "charts rendered");
    Ok(outcomes)
}

/// Renders one chart to `path`. Any previous file at `path` is removed first, and a
/// partially drawn file is removed on failure.
pub fn render_chart(
    kind: ChartKind,
    data: &ChartData,
    style: &ChartStyle,
    path: &Path,
) -> std::result::Result<(), ChartError> {
    remove_if_present(path)?;

    let result = match kind {
        ChartKind::TripDistance => draw_histogram(path, style, kind, "Distance (Miles)", &data.distances, |mean| {
            format!("Mean: {mean:.2} miles")
        }),
        ChartKind::DurationBoxplot => draw_boxplot(path, style, kind, &data.durations),
        ChartKind::FareAmount => draw_histogram(path, style, kind, "Fare Amount (USD)", &data.fares, |mean| {
            format!("Mean: ${mean:.2}")
        }),
        ChartKind::FareVsDistance => draw_scatter(path, style, kind, data),
        ChartKind::HourlyDistribution => draw_hourly(path, style, kind, &data.hourly, data.peak_hour),
        ChartKind::WeekdayDistribution => draw_weekdays(path, style, kind, &data.weekdays),
    };

    if result.is_err() && path.exists() {
        fs::remove_file(path)?;
    }
    result
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Equal-width histogram bins.
#[derive(Debug, Clone, PartialEq)]
pub struct Bins {
    pub start: f64,
    pub width: f64,
    pub counts: Vec<usize>,
}

impl Bins {
    pub fn end(&self) -> f64 {
        self.start + self.width * self.counts.len() as f64
    }

    pub fn edges(&self, index: usize) -> (f64, f64) {
        let left = self.start + self.width * index as f64;
        (left, left + self.width)
    }

    pub fn max_count(&self) -> usize {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}

/// Splits the finite values into `bins` equal-width bins spanning their range. The maximum
/// lands in the last bin.
pub fn histogram(values: &[f64], bins: usize) -> Option<Bins> {
    if bins == 0 {
        return None;
    }
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (min, max) = bounds(&finite)?;
    let span = max - min;
    let width = if span > 0.0 { span / bins as f64 } else { 1.0 };

    let mut counts = vec![0; bins];
    for value in &finite {
        let index = (((value - min) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }
    Some(Bins {
        start: min,
        width,
        counts,
    })
}

/// Quartiles with whiskers at the furthest values within 1.5 IQR of the box.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxStats {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub lower_whisker: f64,
    pub upper_whisker: f64,
    pub outliers: Vec<f64>,
}

pub fn box_stats(values: &[f64]) -> Option<BoxStats> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);

    let q1 = stats::quantile(&sorted, 0.25)?;
    let median = stats::quantile(&sorted, 0.5)?;
    let q3 = stats::quantile(&sorted, 0.75)?;
    let reach = 1.5 * (q3 - q1);
    let (low_fence, high_fence) = (q1 - reach, q3 + reach);

    Some(BoxStats {
        q1,
        median,
        q3,
        lower_whisker: sorted.iter().copied().find(|v| *v >= low_fence).unwrap_or(q1),
        upper_whisker: sorted.iter().rev().copied().find(|v| *v <= high_fence).unwrap_or(q3),
        outliers: sorted
            .iter()
            .copied()
            .filter(|v| *v < low_fence || *v > high_fence)
            .collect(),
    })
}

fn bounds(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

fn padded(lo: f64, hi: f64) -> Range<f64> {
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad)..(hi + pad)
}

fn annotate(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    style: &ChartStyle,
    text: String,
) -> std::result::Result<(), ChartError> {
    root.draw(&Text::new(text, (90, 60), style.label().into_font()))?;
    Ok(())
}

fn draw_histogram(
    path: &Path,
    style: &ChartStyle,
    kind: ChartKind,
    x_desc: &str,
    values: &[f64],
    mean_label: impl Fn(f64) -> String,
) -> std::result::Result<(), ChartError> {
    let bins = histogram(values, HISTOGRAM_BINS).ok_or(ChartError::EmptyData(kind.file_name()))?;
    let y_max = bins.max_count() as f64 * 1.1 + 1.0;

    let root = BitMapBackend::new(path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(kind.title(), style.caption())
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(bins.start..bins.end(), 0f64..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(x_desc)
        .y_desc("Frequency")
        .label_style(style.label())
        .draw()?;

    let fill = style.bar_color.mix(0.7).filled();
    chart.draw_series(bins.counts.iter().enumerate().map(|(index, &count)| {
        let (left, right) = bins.edges(index);
        Rectangle::new([(left, 0.0), (right, count as f64)], fill)
    }))?;

    if let Some(mean) = stats::mean(values) {
        let accent = style.accent_color;
        chart
            .draw_series(LineSeries::new(
                vec![(mean, 0.0), (mean, y_max)],
                accent.stroke_width(2),
            ))?
            .label(mean_label(mean))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], accent.stroke_width(2)));
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .label_font(style.label())
            .draw()?;
    }

    root.present()?;
    Ok(())
}

fn draw_boxplot(
    path: &Path,
    style: &ChartStyle,
    kind: ChartKind,
    values: &[f64],
) -> std::result::Result<(), ChartError> {
    let summary = box_stats(values).ok_or(ChartError::EmptyData(kind.file_name()))?;
    let lo = summary.outliers.first().copied().unwrap_or(summary.lower_whisker).min(summary.lower_whisker);
    let hi = summary.outliers.last().copied().unwrap_or(summary.upper_whisker).max(summary.upper_whisker);

    let root = BitMapBackend::new(path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(kind.title(), style.caption())
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(20)
        .build_cartesian_2d(padded(lo, hi), 0f64..1f64)?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(0)
        .x_desc("Duration (Minutes)")
        .label_style(style.label())
        .draw()?;

    let (low, high) = (0.3, 0.7);
    chart.draw_series(std::iter::once(Rectangle::new(
        [(summary.q1, low), (summary.q3, high)],
        style.bar_color.mix(0.6).filled(),
    )))?;
    chart.draw_series(std::iter::once(Rectangle::new(
        [(summary.q1, low), (summary.q3, high)],
        BLACK.stroke_width(1),
    )))?;

    let strokes = vec![
        vec![(summary.median, low), (summary.median, high)],
        vec![(summary.lower_whisker, 0.5), (summary.q1, 0.5)],
        vec![(summary.q3, 0.5), (summary.upper_whisker, 0.5)],
        vec![(summary.lower_whisker, 0.4), (summary.lower_whisker, 0.6)],
        vec![(summary.upper_whisker, 0.4), (summary.upper_whisker, 0.6)],
    ];
    chart.draw_series(
        strokes
            .into_iter()
            .map(|points| PathElement::new(points, BLACK.stroke_width(2))),
    )?;

    let accent = style.accent_color;
    chart.draw_series(
        summary
            .outliers
            .iter()
            .map(|&value| Circle::new((value, 0.5), 3, accent.stroke_width(1))),
    )?;

    root.present()?;
    Ok(())
}

fn draw_scatter(
    path: &Path,
    style: &ChartStyle,
    kind: ChartKind,
    data: &ChartData,
) -> std::result::Result<(), ChartError> {
    let points = &data.fare_vs_distance;
    let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    let (x_lo, x_hi) = bounds(&xs).ok_or(ChartError::EmptyData(kind.file_name()))?;
    let (y_lo, y_hi) = bounds(&ys).ok_or(ChartError::EmptyData(kind.file_name()))?;

    let root = BitMapBackend::new(path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(kind.title(), style.caption())
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(padded(x_lo, x_hi), padded(y_lo, y_hi))?;
    chart
        .configure_mesh()
        .x_desc("Distance (Miles)")
        .y_desc("Fare Amount (USD)")
        .label_style(style.label())
        .draw()?;

    let dot = style.point_color.mix(0.6).filled();
    chart.draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 2, dot)))?;

    if let Some(correlation) = data.correlation {
        annotate(&root, style, format!("Correlation: {correlation:.3}"))?;
    }

    root.present()?;
    Ok(())
}

fn draw_hourly(
    path: &Path,
    style: &ChartStyle,
    kind: ChartKind,
    hourly: &[HourCount],
    peak_hour: Option<u32>,
) -> std::result::Result<(), ChartError> {
    let max_count = hourly.iter().map(|entry| entry.count).max().unwrap_or(0);
    if max_count == 0 {
        return Err(ChartError::EmptyData(kind.file_name()));
    }
    let y_max = (max_count as f64 * 1.1) as u32 + 1;

    let root = BitMapBackend::new(path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(kind.title(), style.caption())
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d((0u32..24u32).into_segmented(), 0u32..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(24)
        .x_label_formatter(&|value: &SegmentValue<u32>| match value {
            SegmentValue::CenterOf(hour) if *hour < 24 => hour.to_string(),
            _ => String::new(),
        })
        .x_desc("Hour of Day")
        .y_desc("Number of Trips")
        .label_style(style.label())
        .draw()?;

    let (bar, accent) = (style.bar_color, style.accent_color);
    chart.draw_series(
        Histogram::vertical(&chart)
            .margin(4)
            .style_func(move |hour: &SegmentValue<u32>, _: &u32| {
                if matches!(hour, SegmentValue::Exact(h) if Some(*h) == peak_hour) {
                    accent.filled()
                } else {
                    bar.filled()
                }
            })
            .data(hourly.iter().map(|entry| (entry.hour, entry.count as u32))),
    )?;

    if let Some(peak) = peak_hour {
        annotate(&root, style, format!("Peak Hour: {peak}:00"))?;
    }

    root.present()?;
    Ok(())
}

fn draw_weekdays(
    path: &Path,
    style: &ChartStyle,
    kind: ChartKind,
    weekdays: &[WeekdayCount],
) -> std::result::Result<(), ChartError> {
    let max_count = weekdays.iter().map(|entry| entry.count).max().unwrap_or(0);
    if max_count == 0 {
        return Err(ChartError::EmptyData(kind.file_name()));
    }
    let y_max = (max_count as f64 * 1.1) as u32 + 1;

    let root = BitMapBackend::new(path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(kind.title(), style.caption())
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d((0u32..7u32).into_segmented(), 0u32..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(7)
        .x_label_formatter(&|value: &SegmentValue<u32>| match value {
            SegmentValue::CenterOf(day) => WEEKDAYS
                .get(*day as usize)
                .map(|weekday| stats::weekday_name(*weekday).to_string())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .x_desc("Day of Week")
        .y_desc("Number of Trips")
        .label_style(style.label())
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .margin(12)
            .style(style.bar_color.filled())
            .data(
                weekdays
                    .iter()
                    .map(|entry| (entry.weekday.num_days_from_monday(), entry.count as u32)),
            ),
    )?;

    root.present()?;
    Ok(())
}
