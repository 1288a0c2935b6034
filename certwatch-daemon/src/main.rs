//! certwatch-daemon -- observe storage lifecycle for one test case.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use certwatch_core::types::TestCase;
use certwatch_daemon::cli::DaemonCli;
use certwatch_daemon::{logging, metrics_server, orchestrator};
use certwatch_observer::{KubeWatchSource, ObserverConfig};
use certwatch_store::StoreBackend;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    let (config, from_file) = cli.load_config().await?;

    logging::init_tracing(&config.general)?;
    if !from_file {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    if cli.validate {
        tracing::info!(path = %cli.config.display(), "configuration is valid");
        return Ok(());
    }

    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)?;
    }

    let store = Arc::new(StoreBackend::from_config(&config.store)?);
    let observer_config = ObserverConfig::from_core(&config.observer);
    let source = Arc::new(
        KubeWatchSource::try_default(
            observer_config.namespace.clone(),
            observer_config.notification_buffer,
        )
        .await?,
    );

    let test_case = TestCase::new(cli.test_case.clone(), cli.run_name());
    tracing::info!(
        store = store.name(),
        run = %test_case.run_name,
        namespace = %observer_config.namespace,
        "certwatch-daemon starting"
    );

    let outcome = orchestrator::run_observation(
        source,
        store,
        observer_config,
        test_case,
        shutdown_signal(cli.duration()),
    )
    .await?;

    if cli.print_metrics {
        if let Some(metrics) = &outcome.metrics {
            println!("{}", serde_json::to_string_pretty(metrics)?);
        }
    }

    if !outcome.report.is_clean() {
        anyhow::bail!(
            "test case {} ended with incomplete observer sessions",
            outcome.test_case.id
        );
    }

    tracing::info!("certwatch-daemon shut down");
    Ok(())
}

/// Ctrl-C, or the end of the observation window when one is given.
async fn shutdown_signal(window: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    match window {
        Some(window) => {
            tokio::select! {
                _ = ctrl_c => tracing::info!("shutdown signal received"),
                _ = tokio::time::sleep(window) => {
                    tracing::info!(secs = window.as_secs(), "observation window elapsed");
                }
            }
        }
        None => {
            ctrl_c.await;
            tracing::info!("shutdown signal received");
        }
    }
}
