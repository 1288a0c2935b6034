//! Observation orchestrator.
//!
//! Drives one test case end to end: registers it in the store, runs every
//! observer until shutdown, records the outcome and collects metrics.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use certwatch_collector::{CollectorError, MetricsCollector, TestCaseMetrics};
use certwatch_core::store::EventStore;
use certwatch_core::types::TestCase;
use certwatch_observer::{ObserverConfig, RunnerBuilder, RunnerReport, WatchSource};

/// Result of one observed test case.
#[derive(Debug)]
pub struct Outcome {
    /// Test case as stored, with its assigned id.
    pub test_case: TestCase,
    /// Per-observer session reports.
    pub report: RunnerReport,
    /// Derived metrics. `None` when nothing was observed.
    pub metrics: Option<TestCaseMetrics>,
}

/// Observe one test case until `shutdown` resolves.
///
/// A test case counts as successful only when every observer session ended
/// through a clean shutdown flush.
pub async fn run_observation<W, S, F>(
    source: Arc<W>,
    store: Arc<S>,
    config: ObserverConfig,
    mut test_case: TestCase,
    shutdown: F,
) -> Result<Outcome>
where
    W: WatchSource,
    S: EventStore,
    F: Future<Output = ()>,
{
    store
        .create_test_case(&mut test_case)
        .await
        .context("failed to create test case")?;
    info!(
        tc_id = test_case.id,
        test_case = %test_case.name,
        run = %test_case.run_name,
        "test case started"
    );

    let mut runner = RunnerBuilder::new()
        .source(source)
        .store(Arc::clone(&store))
        .config(config)
        .with_default_observers()
        .build()?;
    runner.start(&test_case)?;

    shutdown.await;
    info!(tc_id = test_case.id, "shutdown requested, stopping observers");

    let report = runner.stop_and_wait().await;
    let success = report.is_clean();
    if !success {
        warn!(tc_id = test_case.id, "one or more observer sessions ended early");
    }
    store
        .finish_test_case(test_case.id, success)
        .await
        .context("failed to finish test case")?;

    let metrics = match MetricsCollector::new(Arc::clone(&store))
        .collect(test_case.id)
        .await
    {
        Ok(metrics) => Some(metrics),
        Err(CollectorError::RunNotFound(reason)) => {
            warn!(tc_id = test_case.id, %reason, "no lifecycle events observed");
            None
        }
        Err(e) => return Err(e.into()),
    };

    let test_case = store
        .get_test_case(test_case.id)
        .await?
        .unwrap_or(test_case);

    info!(
        tc_id = test_case.id,
        events = report.events_persisted(),
        success,
        "test case finished"
    );

    Ok(Outcome {
        test_case,
        report,
        metrics,
    })
}
