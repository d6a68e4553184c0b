// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use hunt_battle_server::{
    api::router,
    battle::ExpirySweeper,
    clock::SystemClock,
    config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER},
    error::GameError,
    inventory::{Catalog, CatalogError},
    state::{AppState, EngineSettings},
    storage::{GameDatabase, StorageError},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("engine error: {0}")]
    Game(#[from] GameError),
    #[error("AUTH_JWT_SECRET is not set (build with the `dev` feature to accept unsigned tokens)")]
    AuthNotConfigured,
}

#[tokio::main]
async fn main() {
    init_tracing(LogFormat::from_env());

    if let Err(e) = run(AppConfig::from_env()).await {
        error!(error = %e, "Server terminated with error");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

async fn run(config: AppConfig) -> Result<(), StartupError> {
    if !config.auth.is_production() {
        if cfg!(feature = "dev") {
            warn!("AUTH_JWT_SECRET not set: accepting unsigned development tokens");
        } else {
            return Err(StartupError::AuthNotConfigured);
        }
    }

    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(GameDatabase::open(&config.database_path())?);
    info!(path = %config.database_path().display(), "Battle database opened");

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::from_json_file(path)?,
        None => Catalog::builtin(),
    };
    info!(items = catalog.items().len(), "Item catalog loaded");

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        db,
        catalog,
        Arc::new(SystemClock),
        EngineSettings {
            battle: config.battle,
            starting_balance: config.starting_balance,
        },
        shutdown.clone(),
    )
    .with_auth_config(config.auth.clone());

    state.battles.rearm_all()?;

    let sweeper = tokio::spawn(
        ExpirySweeper::new(state.battles.clone(), config.sweep_interval).run(shutdown.clone()),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!(
        addr = %config.bind_address(),
        challenge_ttl_secs = config.battle.challenge_ttl.num_seconds(),
        defense_window_secs = config.battle.defense_window.num_seconds(),
        "Hunt battle server listening (docs at /docs)"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Expiry sweeper task failed");
    }
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels `shutdown`, which also ends
/// open WebSocket streams so the graceful shutdown can finish.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Shutdown signal received");
    shutdown.cancel();
}
