#![forbid(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use metric_rollup::config::{self, load_configuration};
use metric_rollup::pipeline::{Rollup, RunOptions};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{error, info};

/// Aggregates Graphite plaintext points read from stdin and writes the
/// aggregates to stdout.
#[derive(Debug, Parser)]
#[command(name = "metric-rollup", version)]
struct Args {
    /// Also write the input points that no matching rule drops
    #[arg(long)]
    passthrough: bool,

    /// Dump the Prometheus metrics to stderr on exit
    #[arg(long)]
    print_metrics: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    // stdout carries the data, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    load_configuration().context("Failed to load configuration")?;
    let config = config::get().context("Failed to get configuration")?;

    let registry = Registry::new();
    let rollup = Rollup::from_config(&config, &registry).context("Failed to create accumulator")?;
    info!(
        "Aggregating with rules from {} ({} rules, revision {})",
        rollup.rules.path().display(),
        rollup.rules.rules().len(),
        rollup.rules.rules().revision()
    );
    let reload_task = rollup
        .rules
        .spawn_reload_task(config.rules_reload_interval());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::BufWriter::new(tokio::io::stdout());
    let result = rollup
        .run(
            stdin,
            &mut stdout,
            RunOptions {
                rollup_interval: config.rollup_interval(),
                passthrough: args.passthrough,
            },
        )
        .await;
    reload_task.abort();

    match result {
        Ok(summary) => info!("Done: {:?}", summary),
        Err(err) => {
            error!("Aggregation failed: {:?}", err);
            return Err(err);
        }
    }

    if args.print_metrics {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        eprintln!("{}", String::from_utf8_lossy(&buffer));
    }
    Ok(())
}
