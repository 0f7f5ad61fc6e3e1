use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sku_harvester::config::LoggingConfig;
use sku_harvester::export::{read_bundle, write_bundle};
use sku_harvester::oracle::{ChromeOracle, SettleWait};
use sku_harvester::replay::ReplayPlan;
use sku_harvester::{AppConfig, ResultAggregator, TraversalController, TraversalEnd, TraversalOptions};

#[derive(Parser)]
#[command(name = "sku-harvester")]
#[command(version)]
#[command(about = "Visit every SKU combination of a product page and export the prices")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to config/default.toml when present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Traverse a product page and write the export
    Traverse(TraverseArgs),

    /// Print the replay plan for an export as JSON
    Plan {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the run summary of an export
    Summary {
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Args)]
struct TraverseArgs {
    /// Product page URL
    #[arg(long)]
    url: String,

    /// Stop after the first N combinations
    #[arg(long)]
    max_combinations: Option<usize>,

    /// Prior export to resume from
    #[arg(long)]
    resume_from: Option<PathBuf>,

    /// Export path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,
}

fn init_tracing(logging: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&logging.directory)
        .with_context(|| format!("creating log directory {}", logging.directory.display()))?;
    let file_appender = tracing_appender::rolling::never(&logging.directory, &logging.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false);
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sku_harvester=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(guard)
}

async fn traverse(mut config: AppConfig, args: TraverseArgs) -> Result<()> {
    if args.max_combinations.is_some() {
        config.traversal.max_combinations = args.max_combinations;
    }
    if args.resume_from.is_some() {
        config.traversal.resume_from = args.resume_from;
    }
    if let Some(output) = args.output {
        config.output.path = output;
    }
    if args.headed {
        config.browser.headless = false;
    }
    config.validate_settings()?;

    let settle = SettleWait::from_millis(
        config.traversal.settle_poll_ms,
        config.traversal.settle_timeout_ms,
    );
    let mut oracle = ChromeOracle::launch(&config.browser, settle)?;
    oracle.open(&args.url)?;
    let model = oracle.extract_model()?;
    oracle.bind_model(&model);

    let aggregator = match &config.traversal.resume_from {
        Some(path) => {
            let prior = read_bundle(path)
                .with_context(|| format!("loading prior export {}", path.display()))?;
            ResultAggregator::from_export(&prior, &model)?
        }
        None => ResultAggregator::new(model.clone()),
    };
    let source_url = oracle.current_url().map(|u| u.to_string());
    let mut aggregator = aggregator.with_source_url(source_url);

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current combination");
            on_interrupt.cancel();
        }
    });

    let outcome = TraversalController::new(&oracle, &model, TraversalOptions::from(&config.traversal))
        .with_cancellation(token)
        .seed_prior(aggregator.prior_ok())?
        .run()
        .await;
    let end = outcome.end.clone();

    aggregator.absorb(outcome)?;
    let bundle = aggregator.finish();
    write_bundle(&bundle, &config.output.path)?;

    let summary = &bundle.summary;
    info!(
        "ok: {}, unavailable: {}, failed: {}, missing: {}, images: {}",
        summary.ok, summary.unavailable, summary.failed, summary.missing, summary.images
    );

    if let TraversalEnd::Aborted { reason } = end {
        bail!("traversal aborted: {}", reason);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let _guard = init_tracing(&config.logging)?;

    match cli.command {
        Commands::Traverse(args) => {
            info!("Starting SKU Harvester for {}", args.url);
            traverse(config, args).await?;
        }
        Commands::Plan { input } => {
            let bundle = read_bundle(&input)?;
            let plan = ReplayPlan::from_bundle(&bundle);
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Summary { input } => {
            let bundle = read_bundle(&input)?;
            println!("{}", serde_json::to_string_pretty(&bundle.summary)?);
            println!(
                "price tiers: {}",
                bundle
                    .price_tiers
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    Ok(())
}
