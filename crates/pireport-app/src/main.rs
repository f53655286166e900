use std::{process, sync::Arc};

use tracing_subscriber::{filter::LevelFilter, fmt};

use pireport_app::cli::{Cli, Commands, QueryArgs};
use pireport_app::config;
use pireport_app::error::AppError;
use pireport_app::source::HttpDatasetSource;
use pireport_server::{HistoryFilters, HistoryResponse, ReportError, run_history_report, serve};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command.as_ref() {
        Some(Commands::Serve(_)) => match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        Some(Commands::Query(_)) | None => match cli.verbose {
            0 => LevelFilter::OFF,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Some(Commands::Serve(_)) => {
            let cfg = config::load()?;
            let dataset = HttpDatasetSource::from_config(cfg.dataset.csv_url.as_deref())?;
            serve(cfg.server, Arc::new(dataset)).await?;
        }
        Some(Commands::Query(args)) => {
            run_query(args).await?;
        }
        None => {
            Cli::print_help();
        }
    }

    Ok(())
}

async fn run_query(args: QueryArgs) -> Result<(), AppError> {
    if let (Some(start), Some(end)) = (args.start_year, args.end_year) {
        if start > end {
            return Err(ReportError::invalid_param(
                "start_year",
                "start_year cannot be greater than end_year",
            )
            .into());
        }
    }

    let cfg = config::load()?;
    let dataset = HttpDatasetSource::from_config(cfg.dataset.csv_url.as_deref())?;

    let filters = HistoryFilters {
        entity: args.entity,
        pi: args.pi,
        record_type: args.record_type,
        performance_area: args.performance_area,
        ratings: args.ratings,
        score: args.score,
        start_year: args.start_year,
        end_year: args.end_year,
        limit: args.limit,
    };

    let report = run_history_report(&dataset, &filters).await?;
    emit_report(&report, args.pretty)
}

fn emit_report(report: &HistoryResponse, pretty: bool) -> Result<(), AppError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    println!("{rendered}");
    Ok(())
}
