use std::sync::Arc;

use clap::Parser;
use host_monitor::args::Args;
use host_monitor::error::AppError;
use host_monitor::{AppConfig, ChannelSink, FallbackProber, HostRegistry, Scheduler, server};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = AppConfig::from_args(&args)?;
    let addr = config.listen_addr()?;

    let registry = Arc::new(HostRegistry::new(config.hosts.clone(), config.history));
    let sink = ChannelSink::default();
    let cancel = CancellationToken::new();

    let (_bound, server) = server::bind(addr, registry.clone(), sink.clone(), cancel.clone())?;
    let server = tokio::spawn(server);

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested");
                    cancel.cancel();
                }
                Err(e) => warn!("failed to listen for shutdown signal: {e}"),
            }
        }
    });

    let prober = Arc::new(FallbackProber::from_settings(&config.probe_settings()));
    let scheduler = Scheduler::new(config.hosts.clone(), registry, prober, Arc::new(sink))
        .with_interval(config.interval())
        .with_publish_timeout(config.publish_timeout());

    scheduler.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = server.await {
        warn!("observer server task failed: {e}");
    }
    Ok(())
}
