use lpledger::chain::http_client;
use lpledger::retry::RetryPolicy;
use lpledger::{
    config::Config, db::init_db, ChainClient, ChainScanner, ExplorerLogApi, FixedPriceValuer,
    AppError, JsonRpcClient, LogSource, Repository, RequestScheduler, Valuer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize database and dependencies
    let pool = init_db(&config.database_path).await?;
    let http = http_client(Duration::from_millis(config.request_timeout_ms))
        .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;

    let repo = Arc::new(Repository::new(pool));
    let retry = RetryPolicy::from(config.retry);
    // One gate for every chain: the log API rate limit is per key, not per chain.
    let scheduler = Arc::new(RequestScheduler::new(Duration::from_millis(
        config.log_api_min_interval_ms,
    )));
    let valuer: Arc<dyn Valuer> = Arc::new(FixedPriceValuer::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(config.chains.len());

    for chain_config in &config.chains {
        let client: Arc<dyn ChainClient> = Arc::new(JsonRpcClient::new(
            http.clone(),
            chain_config.rpc_url.clone(),
            chain_config.chain.clone(),
            retry,
        ));
        let logs: Arc<dyn LogSource> = Arc::new(ExplorerLogApi::new(
            http.clone(),
            config.log_api_url.clone(),
            config.log_api_key.clone(),
            chain_config.chain_id,
            config.log_api_max_results,
            scheduler.clone(),
            retry,
        ));
        let mut scanner = ChainScanner::new(
            chain_config.clone(),
            repo.clone(),
            client,
            logs,
            valuer.clone(),
        )
        .with_resume(config.resume_from_watermark);

        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { scanner.run(rx).await }));
    }

    tracing::info!(chains = config.chains.len(), "Scanners running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested, waiting for in-flight ticks");
    let _ = shutdown_tx.send(true);

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Scanner task panicked");
        }
    }
    Ok(())
}
