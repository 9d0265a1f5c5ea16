//! narrator
//!
//! Converts chapter text files into audio through the configured fallback
//! chain of speech engines.

#![allow(clippy::print_stdout)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use presentation_cli::cli::{Cli, Commands, log_filter_from_verbosity};
use presentation_cli::{jobs, report, settings};
use speech_synthesis::{BatchJob, BatchScheduler, BatchSummary, EngineRegistry, SynthesisConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter_from_verbosity(verbose)));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only job records
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Cancel `token` on the first Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining jobs");
            token.cancel();
        }
    });
}

/// Build the chain, run every job and print one record per job
async fn run_jobs(
    jobs: Vec<BatchJob>,
    config: &SynthesisConfig,
    report_path: Option<PathBuf>,
) -> anyhow::Result<BatchSummary> {
    let chain = Arc::new(
        EngineRegistry::new()
            .build(config)
            .context("Failed to build engine chain")?,
    );

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    info!(jobs = jobs.len(), concurrency = config.concurrency_limit, "Starting batch");
    let reports = BatchScheduler::from_config(config)
        .run_batch(jobs, chain, &cancel)
        .await;

    for job in &reports {
        println!("{}", report::render_job(job));
    }
    let summary = BatchSummary::from_reports(&reports);
    println!("{}", report::render_summary(&summary));

    if let Some(path) = report_path {
        report::write_json(&path, &summary, &reports)?;
        println!("📋 Report written to {}", path.display());
    }

    Ok(summary)
}

const fn exit_code(summary: &BatchSummary) -> ExitCode {
    if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Convert {
            input_dir,
            output_dir,
            format,
            concurrency,
            dry_run,
            report,
        } => {
            if let Some(limit) = concurrency {
                config.concurrency_limit = limit;
            }

            let jobs = jobs::discover(&input_dir, &output_dir, format)?;
            if jobs.is_empty() {
                println!("No .txt files found in {}", input_dir.display());
                return Ok(ExitCode::SUCCESS);
            }

            if dry_run {
                println!("🔎 Dry run: {} job(s), no engine will be called", jobs.len());
                for job in &jobs {
                    println!(
                        "   {} -> {}",
                        job.id,
                        job.request.output_path().display()
                    );
                }
                return Ok(ExitCode::SUCCESS);
            }

            let summary = run_jobs(jobs, &config, report).await?;
            Ok(exit_code(&summary))
        },

        Commands::Speak {
            text,
            file,
            output,
            voice,
        } => {
            let text = jobs::read_text(text, file.as_deref())?;
            let job = jobs::single(text, &output, voice)?;
            let summary = run_jobs(vec![job], &config, None).await?;
            Ok(exit_code(&summary))
        },

        Commands::Engines => {
            if config.fallback_order.is_empty() {
                println!("No engines configured");
                return Ok(ExitCode::FAILURE);
            }

            println!("🔊 Engines in fallback order:");
            let statuses = EngineRegistry::new().check_availability(&config).await;
            for status in &statuses {
                println!("   {}", report::render_engine(status));
            }

            let any_available = statuses.iter().any(|s| s.available);
            Ok(if any_available {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        },
    }
}
