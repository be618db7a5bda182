use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use taxiflow::console;
use taxiflow::pipeline::{self, PipelineSummary};
use taxiflow_core::config::parse_sample_size;
use taxiflow_core::PipelineConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "NYC taxi trip ETL and EDA report pipeline", long_about = None)]
struct Cli {
    /// TOML file with pipeline settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run ETL, statistics, charts, HTML and PDF report (default)
    Run(PathArgs),
    /// Load, clean, sample and persist the trip table only
    Etl(PathArgs),
    /// Print statistics tables for the persisted table and render the charts
    Eda(PathArgs),
    /// Render charts, HTML and PDF from the persisted table
    Report(PathArgs),
    /// Show the first rows and the row count of the persisted table
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Default)]
struct PathArgs {
    /// Input Parquet file
    #[arg(long)]
    input: Option<PathBuf>,
    /// SQLite database file
    #[arg(long)]
    db: Option<PathBuf>,
    /// Rows to keep after cleaning; `none` disables sampling
    #[arg(long)]
    sample_size: Option<String>,
    /// Directory for chart PNGs
    #[arg(long)]
    plots_dir: Option<PathBuf>,
    /// HTML report path
    #[arg(long)]
    html: Option<PathBuf>,
    /// PDF report path
    #[arg(long)]
    pdf: Option<PathBuf>,
    /// Handlebars template replacing the built-in report layout
    #[arg(long)]
    template: Option<PathBuf>,
    /// wkhtmltopdf binary
    #[arg(long)]
    wkhtmltopdf: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// SQLite database file
    #[arg(long)]
    db: Option<PathBuf>,
    /// Number of rows to show
    #[arg(long, default_value_t = 5)]
    limit: usize,
}

impl PathArgs {
    fn apply(self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(input) = self.input {
            config.input_path = input;
        }
        if let Some(db) = self.db {
            config.db_path = db;
        }
        if let Some(raw) = self.sample_size {
            config.sample_size = parse_sample_size(&raw)?;
        }
        if let Some(dir) = self.plots_dir {
            config.plots_dir = dir;
        }
        if let Some(html) = self.html {
            config.html_path = html;
        }
        if let Some(pdf) = self.pdf {
            config.pdf_path = pdf;
        }
        if let Some(template) = self.template {
            config.template_path = Some(template);
        }
        if let Some(binary) = self.wkhtmltopdf {
            config.pdf.wkhtmltopdf = binary;
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command.unwrap_or_else(|| Command::Run(PathArgs::default())) {
        Command::Run(args) => {
            args.apply(&mut config)?;
            let summary = pipeline::run(&config).await?;
            print_summary(&summary)
        }
        Command::Etl(args) => {
            args.apply(&mut config)?;
            let summary = pipeline::run_etl_only(&config).await?;
            print_summary(&summary)
        }
        Command::Eda(args) => {
            args.apply(&mut config)?;
            let summary = pipeline::run_eda(&config).await?;
            if let Some(eda) = &summary.eda {
                console::print_statistics(&eda.statistics, &eda.charts);
            }
            Ok(())
        }
        Command::Report(args) => {
            args.apply(&mut config)?;
            let summary = pipeline::run_report(&config).await?;
            print_summary(&summary)
        }
        Command::Inspect(args) => {
            if let Some(db) = args.db {
                config.db_path = db;
            }
            let inspection = pipeline::inspect(&config, args.limit).await?;
            info!(db = %config.db_path.display(), rows = inspection.total_rows, "database reachable");
            println!("{}", console::frame_table(&inspection.head));
            println!("Total rows in trips: {}", inspection.total_rows);
            Ok(())
        }
    }
}

fn print_summary(summary: &PipelineSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("failed to serialize run summary")?;
    println!("{json}");
    Ok(())
}
