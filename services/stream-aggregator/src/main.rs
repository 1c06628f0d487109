use std::sync::Arc;

use clap::Parser;
use stream_aggregator::config::AggregatorConfig;
use stream_aggregator::feed::FeedClient;
use stream_aggregator::metrics::PipelineMetrics;
use stream_aggregator::pipeline::Pipeline;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code when the feed source cannot be reached at startup.
const EXIT_FEED_UNAVAILABLE: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging goes to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_aggregator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AggregatorConfig::parse();
    config.validate()?;

    tracing::info!(
        version = stream_aggregator::SERVICE_VERSION,
        feed = %config.feed_addr(),
        output_dir = %config.output_dir.display(),
        trigger_interval_ms = config.trigger_interval_ms,
        workers = config.workers,
        "Starting stream aggregator"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Pipeline::new(&config, metrics.clone())?;

    let client = match FeedClient::connect(&config.feed_addr()).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Feed source unavailable; start it before the aggregator");
            std::process::exit(EXIT_FEED_UNAVAILABLE);
        }
    };

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let feed = tokio::spawn(client.pump(tx, metrics));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for shutdown signal; running until killed");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    };

    let result = pipeline.run(rx, shutdown).await;
    feed.abort();
    result?;

    Ok(())
}
