use swap_oracle::{api, Config, Oracle};
use tokio::sync::watch;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting swap oracle");

    let config = Config::load()?;
    tracing::info!(
        src = %config.src.chain.blockchain,
        dst = %config.dst.chain.blockchain,
        src_scan = config.src.chain.enable_scan,
        dst_scan = config.dst.chain.enable_scan,
        "Configuration loaded"
    );

    let oracle = Oracle::from_config(&config).await?;
    tracing::info!(scanning = ?oracle.scanning_roles(), "Oracle initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let api_state = oracle.app_state();
    let api_shutdown = shutdown_rx.clone();
    let bind_address = config.api.bind_address.clone();
    let port = config.api.port;
    tokio::spawn(async move {
        if let Err(e) = api::start_server(&bind_address, port, api_state, api_shutdown).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let result = oracle.run(shutdown_rx).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Swap oracle stopped with error");
    } else {
        tracing::info!("Swap oracle stopped");
    }
    result
}

/// Initialize tracing; `LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swap_oracle=debug,bridge_core=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
