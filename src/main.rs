use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rep::config::RepConfig;
use rep::feed::admin::run_admin;
use rep::feed::MemoryFeed;
use rep::shutdown::install_shutdown_handler;
use rep::Rep;

#[derive(Parser, Debug)]
#[command(name = "rep")]
#[command(version)]
#[command(about = "Per-host representative: claims tasks and LRPs for this host's stack and runs them on the local executor")]
struct Args {
    /// Capability stack this host runs (e.g. "linux64")
    #[arg(long)]
    stack: String,

    /// Address the completion callback listener binds to
    #[arg(long, default_value = "0.0.0.0:20515")]
    listen_addr: SocketAddr,

    /// host:port the executor should use to reach this rep
    /// (defaults to the listen address)
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Base URL of the local executor
    #[arg(long, default_value = "http://127.0.0.1:1700")]
    executor_url: String,

    /// Seconds between presence renewals
    #[arg(long, default_value = "60")]
    heartbeat_interval_secs: u64,

    /// Presence lease TTL in seconds (must exceed the heartbeat interval)
    #[arg(long, default_value = "120")]
    presence_ttl_secs: u64,

    /// Timeout on each executor request, in milliseconds
    #[arg(long, default_value = "10000")]
    executor_timeout_ms: u64,

    /// Timeout on each work feed call, in milliseconds
    #[arg(long, default_value = "10000")]
    feed_timeout_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serve operator routes for the embedded work feed on this address
    #[arg(long)]
    feed_admin_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = RepConfig::new(args.stack, args.listen_addr)
        .with_executor_url(args.executor_url)
        .with_heartbeat(
            Duration::from_secs(args.heartbeat_interval_secs),
            Duration::from_secs(args.presence_ttl_secs),
        );
    if let Some(advertise_addr) = args.advertise_addr {
        config = config.with_advertise_addr(advertise_addr);
    }
    config.executor_timeout = Duration::from_millis(args.executor_timeout_ms);
    config.feed_timeout = Duration::from_millis(args.feed_timeout_ms);

    let feed = MemoryFeed::new();

    tracing::info!(
        stack = %config.stack,
        listen_addr = %config.listen_addr,
        executor_url = %config.executor_url,
        callback_url = %config.completion_callback_url(),
        feed_admin_addr = ?args.feed_admin_addr,
        "Starting representative"
    );

    let rep = Rep::connect(config, Arc::new(feed.clone()))?;
    tracing::info!(rep_id = %rep.rep_id(), "Generated host identity");

    let shutdown = install_shutdown_handler();

    let admin = args
        .feed_admin_addr
        .map(|addr| tokio::spawn(run_admin(addr, feed, shutdown.clone())));

    rep.run(shutdown).await?;

    if let Some(admin) = admin {
        if let Err(e) = admin.await {
            tracing::error!(error = %e, "Feed admin server panicked");
        }
    }

    Ok(())
}
