// src/main.rs
//! ReplayCDN Engine
//!
//! Serves archived HTTP exchanges through the configured request/response
//! modifiers.

use anyhow::{Context, Result};
use replaycdn_engine::interception::{HttpInterceptor, InterceptorConfig};
use replaycdn_engine::modifiers::{ModifierParser, ModifierRegistry};
use replaycdn_engine::observability::{init_metrics, init_tracing};
use replaycdn_engine::replay::ReplayEngine;
use replaycdn_engine::utils::config::EngineConfig;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load()?;

    // Initialize observability (tracing, metrics)
    init_tracing(config.observability.log_format)?;
    init_metrics(config.observability.metrics_addr)?;

    info!("Starting ReplayCDN Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    // Startup faults stop here, before the listener binds
    let engine = ReplayEngine::open(
        &config.replay.archive_path,
        &config.replay.inject_scripts,
        config.control.shutdown,
    )
    .with_context(|| format!("opening archive {}", config.replay.archive_path.display()))?;
    info!("Replay time seed: {} ms", engine.time_seed_ms());

    let modifiers = match &config.modifiers.config_path {
        Some(path) => Arc::new(
            ModifierRegistry::initialize(path, ModifierParser::default())
                .with_context(|| format!("loading modifiers from {}", path.display()))?,
        ),
        None => Arc::new(ModifierRegistry::default()),
    };

    #[cfg(unix)]
    if let Some(path) = config.modifiers.config_path.clone() {
        spawn_reload_on_hangup(Arc::clone(&modifiers), path)?;
    }

    let interceptor_config = InterceptorConfig {
        listen_addr: config.listen_addr()?,
        ..InterceptorConfig::default()
    };
    let interceptor = Arc::new(HttpInterceptor::new(
        interceptor_config,
        modifiers,
        Arc::new(engine),
    ));

    tokio::select! {
        result = interceptor.start() => {
            if let Err(e) = &result {
                error!("Server error: {}", e);
            }
            result?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing CTRL+C signal handler")?;
            info!("Received shutdown signal, stopping");
        }
    }

    Ok(())
}

/// Re-read the modifier document on every SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(modifiers: Arc<ModifierRegistry>, path: std::path::PathBuf) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("Received SIGHUP, reloading modifiers from {}", path.display());

            let result = std::fs::read(&path)
                .map_err(replaycdn_engine::EngineError::from)
                .and_then(|body| modifiers.apply_config(&body));

            if let Err(e) = result {
                error!("Modifier reload failed, keeping current configuration: {}", e);
            }
        }
    });

    Ok(())
}
