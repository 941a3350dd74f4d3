use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use spendtrack_ai::CategoryResolver;
use spendtrack_core::{RateBudget, RetryPolicy};
use spendtrack_mail::MessageFilter;

mod gemini;
mod gmail;
mod pipeline;
mod settings;
mod sink;

use gemini::GeminiBackend;
use gmail::GmailBackend;
use pipeline::{run_pipeline, RunReport};
use settings::{load_credentials, load_settings, Settings};
use sink::{JsonFileSink, OutputSink, SheetsSink};

#[derive(Parser, Debug)]
#[command(name = "spendtrack", version, about = "Spend notification mail to validated transactions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once: search, claim, extract, resolve, validate, upload
    Run {
        /// Settings file (default: ~/.spendtrack/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the configured recency window
        #[arg(long)]
        days: Option<u32>,

        /// Skip the Sheets upload; still writes the local JSON file
        #[arg(long)]
        no_upload: bool,
    },

    /// Write a default config to ~/.spendtrack/config.toml
    InitConfig,

    /// Print the mailbox query the configured providers produce
    Query {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            days,
            no_upload,
        } => {
            let mut settings = load_settings(config)?;
            if let Some(days) = days {
                settings.pipeline.days_back = days;
            }
            run(settings, no_upload).await?;
        }

        Command::InitConfig => {
            settings::init_settings()?;
        }

        Command::Query { config } => {
            let settings = load_settings(config)?;
            settings
                .pipeline
                .validate()
                .context("invalid pipeline configuration")?;
            let filter = MessageFilter::new(&settings.pipeline, RetryPolicy::default());
            println!("{}", filter.query());
        }
    }

    Ok(())
}

async fn run(settings: Settings, no_upload: bool) -> Result<()> {
    let creds = load_credentials()?;
    let config = &settings.pipeline;

    let mailbox = GmailBackend::connect(creds.gmail_token, &config.claimed_label)
        .await
        .context("connecting to gmail")?;

    let mut resolver = CategoryResolver::new(
        GeminiBackend::new(creds.gemini_api_key, config.model.clone()),
        config.model.clone(),
        config.cost_per_call,
        RetryPolicy::default(),
        config.category_hints.clone(),
    );
    let mut gate = RateBudget::new(
        config.max_calls_per_minute,
        std::time::Duration::from_secs(60),
        config.daily_budget,
    );

    let report = run_pipeline(config, &mailbox, &mut resolver, &mut gate).await?;
    print_report(&report);

    JsonFileSink::new(PathBuf::from(&settings.output.json_path))
        .append(&report.transactions)
        .await?;

    if no_upload {
        return Ok(());
    }
    let Some(spreadsheet_id) = settings.output.spreadsheet_id.clone() else {
        println!("No spreadsheet_id configured, skipping upload");
        return Ok(());
    };
    let token = creds
        .sheets_token
        .context("SHEETS_ACCESS_TOKEN is not set (use --no-upload to skip)")?;
    SheetsSink::new(token, spreadsheet_id, settings.output.sheet_range.clone())
        .append(&report.transactions)
        .await?;

    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "Found {} candidates, claimed {} ({} claim-skipped)",
        report.found, report.claimed, report.claim_skipped
    );
    println!(
        "Validated {} transactions, {} failures",
        report.transactions.len(),
        report.failures.len()
    );
    println!(
        "Model calls: {} (est. ${:.4})",
        report.model_calls, report.estimated_cost
    );

    for txn in &report.transactions {
        println!("  {txn}");
    }
    for failure in &report.failures {
        println!(
            "  skip {} at {}: {}",
            failure.candidate_id, failure.stage, failure.reason
        );
    }
}
