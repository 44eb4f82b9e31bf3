use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, info};

use ecom_aggregates::sink::local_path;
use ecom_aggregates::{
    load_config, output_location, standard_specs, AggregateName, CancelToken, CsvCatalogSource,
    ErrorPolicy, MarkerLifecycle, Overrides, ParquetDirSink, Pipeline,
};

mod log;

/// Materialize customer, product and sales aggregates as Parquet
#[derive(Parser)]
#[command(name = "ecom-aggregates", version)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once, overwriting every aggregate
    Run {
        /// Path to a TOML configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Directory holding the source CSV tables
        #[arg(long)]
        source: Option<String>,

        /// Base output location
        #[arg(long)]
        output: Option<String>,

        /// Worker threads for aggregate evaluation
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Keep writing the remaining aggregates when one fails
        #[arg(long)]
        best_effort: bool,
    },
    /// Print the aggregate definitions
    Specs,
    /// Print the rows of one materialized aggregate
    Inspect {
        /// Base output location the pipeline wrote to
        #[arg(long)]
        output: String,

        /// Aggregate name, e.g. customers_by_age
        aggregate: String,
    },
}

fn main() -> anyhow::Result<()> {
    // .env values become ECOM_* settings for the config loader
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            source,
            output,
            threads,
            best_effort,
        } => {
            let overrides = Overrides {
                source_database: source,
                output_location: output,
                num_threads: threads,
                error_policy: best_effort.then_some(ErrorPolicy::BestEffort),
            };
            let config = load_config(config.as_deref(), &overrides)?;
            let _guard = log::init(cli.verbose, config.log_dir.as_deref());
            debug!(?config, "Configuration loaded");
            run(config)
        }
        Commands::Specs => {
            print_specs();
            Ok(())
        }
        Commands::Inspect { output, aggregate } => {
            let _guard = log::init(cli.verbose, None);
            let name: AggregateName = aggregate.parse()?;
            let location = output_location(&output, name.as_str());
            let sink = ParquetDirSink::new();
            let rows = sink.row_count(&location)?;
            let table = sink
                .read(&location)
                .with_context(|| format!("reading {location}"))?;
            println!("{name} ({rows} rows)");
            print!("{table}");
            Ok(())
        }
    }
}

fn run(config: ecom_aggregates::PipelineConfig) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    signal_hook::flag::register(SIGINT, cancel.flag())?;
    signal_hook::flag::register(SIGTERM, cancel.flag())?;

    let source_dir = local_path(&config.source_database)?;
    let source = Arc::new(CsvCatalogSource::new(source_dir, config.tables.clone()));
    let sink = Arc::new(ParquetDirSink::new());

    let mut pipeline = Pipeline::new(config.clone(), source, sink).with_cancel(cancel);
    if config.write_success_marker {
        pipeline = pipeline.with_lifecycle(Box::new(MarkerLifecycle::new(
            config.output_location.clone(),
        )));
    }

    info!(
        job = %config.job_name,
        source = %config.source_database,
        output = %config.output_location,
        "Starting aggregate pipeline"
    );
    let summary = pipeline.run()?;
    for output in &summary.outputs {
        println!("{:<40} {:>8} rows  {}", output.name, output.rows, output.location);
    }
    println!(
        "Wrote {} aggregates in {:.2}s",
        summary.outputs.len(),
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

fn print_specs() {
    println!(
        "{:<36} {:<20} {:<40} {:<28} output",
        "name", "source", "group by", "aggregation"
    );
    for spec in standard_specs() {
        let group_by = if spec.group_by.is_empty() {
            "-".to_string()
        } else {
            spec.group_by
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "{:<36} {:<20} {:<40} {:<28} {}",
            spec.name.as_str(),
            spec.source.to_string(),
            group_by,
            spec.function.to_string(),
            spec.output
        );
    }
}
