use super::orchestrator::Conductor;
use crate::resolver::resolve_batches;
use crate::status::{ComponentStage, ComponentStatus};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Wait for `status` to reach `target`, bounded by an optional limit.
/// Returns false if the limit elapsed first.
async fn wait_stage(
    status: &ComponentStatus,
    target: ComponentStage,
    limit: Option<Duration>,
) -> bool {
    match limit {
        Some(limit) => timeout(limit, status.wait_for(target)).await.is_ok(),
        None => {
            status.wait_for(target).await;
            true
        }
    }
}

impl Conductor {
    /// Grant one component its preparing phase and wait until it reports
    /// prepared (or its task ends).
    pub(crate) async fn component_prepare(&self, id: String, status: Arc<ComponentStatus>) {
        info!("Component {} is preparing", id);
        status.advance(ComponentStage::Preparing);

        let limit = self.inner.config.timeout.prepare();
        if !wait_stage(&status, ComponentStage::Prepared, limit).await {
            error!(
                "Component {} did not finish preparing within {:?}; giving up on it",
                id, limit
            );
            return;
        }
        info!("Component {} is prepared", id);
    }

    /// Grant one component its cleanup phase and wait until its task ends.
    pub(crate) async fn component_cleanup(&self, id: String, status: Arc<ComponentStatus>) {
        let limit = self.inner.config.timeout.cleanup();

        if status.stage() < ComponentStage::WaitingForCleanup {
            info!("Waiting for component {} to reach cleanup", id);
            if !wait_stage(&status, ComponentStage::WaitingForCleanup, limit).await {
                error!(
                    "Component {} never became ready for cleanup within {:?}",
                    id, limit
                );
                return;
            }
        }

        info!("Component {} entering cleanup", id);
        status.advance(ComponentStage::Cleanup);

        if !wait_stage(&status, ComponentStage::Finished, limit).await {
            error!(
                "Component {} did not finish cleanup within {:?}",
                id, limit
            );
            return;
        }
        info!("Component {} cleanup completed", id);
    }

    /// Drive the preparing phase: resolver batches strictly in order, all
    /// preparing-declaring components of one batch granted concurrently. A
    /// stop request interrupts the remaining batches.
    pub(crate) async fn run_prepare_batches(&self, batches: &[Vec<String>]) {
        for batch in batches {
            if self.inner.status.exiting() {
                warn!("Shutdown requested; skipping remaining preparing batches");
                return;
            }

            let grants: Vec<(String, Arc<ComponentStatus>)> = {
                let registry = self.inner.registry.lock();
                batch
                    .iter()
                    .filter_map(|id| {
                        registry.get(id).and_then(|entry| {
                            entry
                                .component
                                .stages()
                                .preparing
                                .then(|| (id.clone(), Arc::clone(&entry.status)))
                        })
                    })
                    .collect()
            };
            if grants.is_empty() {
                continue;
            }

            let batch_prepare = join_all(
                grants
                    .into_iter()
                    .map(|(id, status)| self.component_prepare(id, status)),
            );
            tokio::select! {
                _ = self.inner.status.wait_exiting() => {
                    warn!("Shutdown requested during preparing; abandoning the current batch");
                    return;
                }
                _ = batch_prepare => {}
            }
        }
    }

    /// Drive the cleanup phase: batches in reverse dependency order over the
    /// primary cohort (sideloaded components are torn down by their
    /// trackers beforehand). Always runs to the end; shutdown does not
    /// interrupt cleanup.
    pub(crate) async fn run_cleanup_batches(&self) {
        let pairs: Vec<(String, Vec<String>)> = {
            let registry = self.inner.registry.lock();
            registry
                .values()
                .filter(|entry| !entry.sideloaded)
                .map(|entry| {
                    (
                        entry.component.id().to_string(),
                        entry.component.dependencies(),
                    )
                })
                .collect()
        };

        let batches = match resolve_batches(&pairs, true) {
            Ok(batches) => batches,
            Err(err) => {
                // Cannot happen for a graph that resolved at startup; fall
                // back to a single unordered batch.
                error!("Failed to order cleanup batches: {}", err);
                vec![pairs.iter().map(|(id, _)| id.clone()).collect()]
            }
        };

        for batch in batches {
            let grants: Vec<(String, Arc<ComponentStatus>)> = {
                let registry = self.inner.registry.lock();
                batch
                    .iter()
                    .filter_map(|id| {
                        registry.get(id).and_then(|entry| {
                            entry
                                .component
                                .stages()
                                .cleanup
                                .then(|| (id.clone(), Arc::clone(&entry.status)))
                        })
                    })
                    .collect()
            };
            if grants.is_empty() {
                continue;
            }

            join_all(
                grants
                    .into_iter()
                    .map(|(id, status)| self.component_cleanup(id, status)),
            )
            .await;
        }
    }
}
