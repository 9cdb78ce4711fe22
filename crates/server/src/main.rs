mod api;
mod art;
mod batch;
mod config;
mod dedup;
mod device;
mod scan;
mod state;
mod transfer;
mod utils;

use std::sync::Arc;

use api::api_router;
use axum::Router;
use batch::JobSlot;
use catalog::Catalog;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use parking_lot::RwLock;
use reqwest::Client;
use scan::{refresh_device, start_device_scan, start_local_scan};
use state::{AppState, ScanGuards};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use transfer::TransferControl;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let catalog_path = resolve_path(&config_path, &config.catalog_path);
    let catalog = Catalog::open(&catalog_path)?;

    let external_client = Client::builder().user_agent("podbay/0.1").build()?;
    let bind_addr = format!("0.0.0.0:{}", config.port);

    let state = AppState {
        catalog,
        config_path,
        config: Arc::new(RwLock::new(config)),
        device: Arc::new(RwLock::new(None)),
        external_client,
        transfer: Arc::new(TransferControl::new()),
        art_job: JobSlot::default(),
        genre_art_job: JobSlot::default(),
        scans: ScanGuards::default(),
    };

    refresh_device(&state);
    if !start_local_scan(state.clone(), false) {
        info!("Initial library scan skipped.");
    }
    if !start_device_scan(state.clone(), false) {
        info!("No device connected at startup.");
    }

    let app = Router::new()
        .nest("/api", api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
