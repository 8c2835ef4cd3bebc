mod api;
mod config;
mod error;
mod import_runner;
mod jobs;
mod models;
mod progress_parser;
mod queue;
mod simulator;

use anyhow::Result;
use config::Config;
use import_runner::ImportRunner;
use jobs::JobManager;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jobs: JobManager,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nd_import_api=info,tower_http=info".into()),
        )
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(err) if err.not_found() => {}
        Err(err) => warn!("Failed to load .env file: {err}"),
    }

    let config = Config::from_env()?;
    let runner = ImportRunner::new(config.import_bin.clone(), config.mock_import);
    let jobs = JobManager::new(runner, config.log_limit);
    queue::spawn_import_worker(jobs.clone());

    if config.music_path.is_none() && !config.mock_import {
        warn!("NAVIDROME_MUSIC_PATH is not set; import requests will be rejected");
    }

    let state = AppState {
        config: config.clone(),
        jobs,
    };

    let mut app = api::router(state);
    if config.web_dist.is_dir() {
        info!("Serving web UI from {}", config.web_dist.display());
        let index = config.web_dist.join("index.html");
        app = app.fallback_service(ServeDir::new(&config.web_dist).fallback(ServeFile::new(index)));
    }

    let app = app
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let mode = if config.mock_import { "MOCK" } else { "real" };
    info!(
        "nd-import-api listening on {} ({mode} mode, binary {})",
        config.bind_addr, config.import_bin
    );
    axum::serve(listener, app).await?;
    Ok(())
}
