use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use vidgate::api::app_router;
use vidgate::config::AppConfig;
use vidgate::downloader::store::spawn_reaper;
use vidgate::downloader::ytdlp::YtDlpExtractor;
use vidgate::downloader::Extractor;

fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_default_env()
        .parse_filters(&config.log_level)
        .init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.worker_count > 0 {
        builder.worker_threads(config.worker_count);
    }
    let runtime = builder.build().expect("failed to build tokio runtime");

    runtime.block_on(serve(config));
}

async fn serve(config: AppConfig) {
    info!("Starting vidgate {}", env!("CARGO_PKG_VERSION"));

    let extractor: Arc<dyn Extractor> = Arc::new(YtDlpExtractor::new(config.ytdlp_path.clone()));
    let state = match vidgate::build_state(config, extractor).await {
        Ok(state) => state,
        Err(e) => {
            error!("Startup failed: {e}");
            std::process::exit(1);
        }
    };

    spawn_reaper(
        state.store.dir().to_path_buf(),
        Duration::from_secs(state.config.reaper_window_minutes * 60),
        Duration::from_secs(state.config.reaper_tick_seconds),
    );
    info!(
        "Reaper active: window {}m, tick {}s",
        state.config.reaper_window_minutes, state.config.reaper_tick_seconds
    );

    let bind_address = state.config.bind_address.clone();
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {bind_address}: {e}");
            std::process::exit(1);
        }
    };
    info!("Listening on {bind_address}");

    if let Err(e) = axum::serve(listener, app_router(state)).await {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
