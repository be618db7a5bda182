// crates/taxiflow/src/pipeline.rs

use anyhow::{Context, Result};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use taxiflow_core::etl::{run_etl, EtlSummary};
use taxiflow_core::stats::{compute_statistics, TripStatistics};
use taxiflow_core::{store, PipelineConfig};
use taxiflow_report::charts::{chart_paths, render_all, ChartData, ChartOutcome, ChartStyle};
use taxiflow_report::compose::{compose_report, ReportSummary};
use taxiflow_report::pdf::{convert_html_to_pdf, PdfOutcome};

/// What a run did, stage by stage. Stages that were not part of the run are `None`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub etl: Option<EtlSummary>,
    pub eda: Option<EdaSummary>,
    pub report: Option<ReportSummary>,
    pub pdf: Option<PdfOutcome>,
}

impl PipelineSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            etl: None,
            eda: None,
            report: None,
            pdf: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EdaSummary {
    pub statistics: TripStatistics,
    pub charts: Vec<ChartOutcome>,
}

pub struct Inspection {
    pub head: DataFrame,
    pub total_rows: usize,
}

/// The whole pipeline: ETL, then statistics and charts, then the HTML report and its PDF.
pub async fn run(config: &PipelineConfig) -> Result<PipelineSummary> {
    let run_id = Uuid::new_v4();
    async move {
        info!("pipeline started");
        let mut summary = PipelineSummary::new(run_id);
        summary.etl = Some(etl_stage(config).await?);

        let eda = eda_stage(config).await?;
        let (report, pdf) = report_stage(config, &eda.statistics)?;
        summary.eda = Some(eda);
        summary.report = Some(report);
        summary.pdf = Some(pdf);

        info!("pipeline finished");
        Ok(summary)
    }
    .instrument(info_span!("pipeline", run_id = %run_id))
    .await
}

pub async fn run_etl_only(config: &PipelineConfig) -> Result<PipelineSummary> {
    let run_id = Uuid::new_v4();
    async move {
        let mut summary = PipelineSummary::new(run_id);
        summary.etl = Some(etl_stage(config).await?);
        Ok(summary)
    }
    .instrument(info_span!("etl", run_id = %run_id))
    .await
}

pub async fn run_eda(config: &PipelineConfig) -> Result<PipelineSummary> {
    let run_id = Uuid::new_v4();
    async move {
        let mut summary = PipelineSummary::new(run_id);
        summary.eda = Some(eda_stage(config).await?);
        Ok(summary)
    }
    .instrument(info_span!("eda", run_id = %run_id))
    .await
}

/// Charts, HTML and PDF from the table already in the database.
pub async fn run_report(config: &PipelineConfig) -> Result<PipelineSummary> {
    let run_id = Uuid::new_v4();
    async move {
        let mut summary = PipelineSummary::new(run_id);
        let eda = eda_stage(config).await?;
        let (report, pdf) = report_stage(config, &eda.statistics)?;
        summary.eda = Some(eda);
        summary.report = Some(report);
        summary.pdf = Some(pdf);
        Ok(summary)
    }
    .instrument(info_span!("report", run_id = %run_id))
    .await
}

pub async fn etl_stage(config: &PipelineConfig) -> Result<EtlSummary> {
    run_etl(config).await.context("ETL stage failed")
}

pub async fn load_table(config: &PipelineConfig) -> Result<DataFrame> {
    let pool = store::connect(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let table = store::load_trips(&pool)
        .await
        .context("failed to read the trips table")?;
    pool.close().await;
    info!(rows = table.height(), columns = table.width(), "loaded trips for analysis");
    Ok(table)
}

pub async fn eda_stage(config: &PipelineConfig) -> Result<EdaSummary> {
    let table = load_table(config).await?;
    let statistics = compute_statistics(&table, &config.schema).context("failed to compute statistics")?;

    let data = ChartData::from_frame(&table, &config.schema, &statistics)?;
    let style = ChartStyle::from_settings(&config.charts);
    let charts = render_all(&data, &style, &config.plots_dir).context("failed to prepare the plots directory")?;

    Ok(EdaSummary { statistics, charts })
}

/// Composes the HTML report and converts it. PDF failures end in an HTML-only outcome rather
/// than an error.
pub fn report_stage(config: &PipelineConfig, statistics: &TripStatistics) -> Result<(ReportSummary, PdfOutcome)> {
    let (document, report) = compose_report(
        statistics,
        &chart_paths(&config.plots_dir),
        config.template_path.as_deref(),
        &config.html_path,
    )
    .context("failed to compose the HTML report")?;

    let pdf = convert_html_to_pdf(&document, &config.pdf_path, &config.pdf);
    Ok((report, pdf))
}

/// First `limit` rows plus the total row count of the persisted table.
pub async fn inspect(config: &PipelineConfig, limit: usize) -> Result<Inspection> {
    let pool = store::connect(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let head = store::head_trips(&pool, limit).await?;
    let total_rows = store::count_trips(&pool).await?;
    pool.close().await;
    Ok(Inspection { head, total_rows })
}
