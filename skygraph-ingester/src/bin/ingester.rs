use anyhow::Result;
use clap::Parser;
use skygraph_ingester::api::AppViewClient;
use skygraph_ingester::backfill::BackfillDriver;
use skygraph_ingester::cache::PresenceCaches;
use skygraph_ingester::db::GraphStore;
use skygraph_ingester::firehose::{ConsumerConfig, FirehoseConsumer};
use skygraph_ingester::limiter::RateLimiter;
use skygraph_ingester::metrics;
use skygraph_ingester::resolver::Resolver;
use skygraph_ingester::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warp::Filter;

#[derive(Debug, clap::Parser)]
struct Args {
    /// Relay host to subscribe to
    #[clap(long, env = "RELAY_HOST", default_value = "bsky.network")]
    relay_host: String,

    /// AppView host for getProfiles / getPosts lookups
    #[clap(
        long,
        env = "APPVIEW_HOST",
        default_value = "https://public.api.bsky.app"
    )]
    appview_host: String,

    /// Graph database connection string
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,

    /// Directory for the cursor and failed-message stores
    #[clap(long, env = "DATA_DIR", default_value = "skygraph_data")]
    data_dir: PathBuf,

    #[clap(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Log startup configuration and periodic events-per-second reports
    #[clap(long)]
    verbose: bool,

    /// Run the one-shot historical backfill instead of the live stream
    #[clap(long)]
    backfill: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingester=info,skygraph_ingester=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.verbose {
        info!("relay host: {}", args.relay_host);
        info!("appview host: {}", args.appview_host);
        info!("data dir: {}", args.data_dir.display());
        info!("metrics port: {}", args.metrics_port);
    }

    metrics::initialize_metrics();
    let metrics_port = args.metrics_port;
    tokio::spawn(async move {
        let metrics_route = warp::path!("metrics").map(|| match metrics::encode_metrics() {
            Ok(metrics) => warp::reply::with_status(metrics, warp::http::StatusCode::OK),
            Err(e) => {
                error!("failed to encode metrics: {e:?}");
                warp::reply::with_status(
                    format!("Error: {e}"),
                    warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        });
        warp::serve(metrics_route)
            .run(([0, 0, 0, 0], metrics_port))
            .await;
    });

    let store = GraphStore::new(&args.database_url)?;
    store.migrate().await?;

    let limiter = Arc::new(RateLimiter::new());
    let api = AppViewClient::new(&args.appview_host, Arc::clone(&limiter))?;
    let resolver = Arc::new(Resolver::new(store, api, PresenceCaches::new()));

    if args.backfill {
        let driver = BackfillDriver::new(&args.relay_host, resolver)?;
        driver.run().await?;
        return Ok(());
    }

    let storage = Arc::new(Storage::new(args.data_dir)?);
    let consumer = FirehoseConsumer::new(
        ConsumerConfig {
            relay_host: args.relay_host,
            verbose: args.verbose,
        },
        resolver,
        storage,
        limiter,
    );

    consumer.run().await?;
    Ok(())
}
