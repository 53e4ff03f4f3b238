use super::orchestrator::Conductor;
use crate::component::{Component, ComponentContext};
use crate::status::{ComponentStage, ComponentStatus, ConductorStage, ConductorStatus};
use crate::task_group::{SideloadHandle, TaskGroup};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl Conductor {
    pub(crate) fn spawn_sideload(
        &self,
        group: Arc<TaskGroup>,
        component: Arc<dyn Component>,
        id: String,
        status: Arc<ComponentStatus>,
        cancel: CancellationToken,
    ) {
        let removal = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        group.register_sideload(
            &id,
            SideloadHandle {
                cancel: removal.clone(),
                done: done_rx,
            },
        );

        let conductor = self.clone();
        let tracker = tokio::spawn(async move {
            conductor
                .sideload_tracker(component, id, status, cancel, removal)
                .await;
            let _ = done_tx.send(true);
        });
        group.add(async move {
            let _ = tracker.await;
        });
    }

    /// Drive one sideloaded component through its full lifecycle,
    /// independently of the batch plan. Cancelling the `removal` token (by
    /// `remove_component` or by the run's teardown) skips ahead to the
    /// cleanup handshake.
    async fn sideload_tracker(
        &self,
        component: Arc<dyn Component>,
        id: String,
        status: Arc<ComponentStatus>,
        cancel: CancellationToken,
        removal: CancellationToken,
    ) {
        info!("Sideload {}: injecting", id);

        // The component observes a local phase view, not the global one:
        // its lifecycle runs detached from the conductor's current phase.
        let local = Arc::new(ConductorStatus::new());
        let context = ComponentContext {
            id: id.clone(),
            status: Arc::clone(&status),
            phase: Arc::clone(&local),
            cancel: cancel.clone(),
            conductor: self.clone(),
        };
        let task = self.spawn_supervisor(Arc::clone(&component), context);
        let stages = component.stages();

        local.advance(ConductorStage::Preparing);
        let mut interrupted = false;

        if stages.preparing {
            for dependency in component.dependencies() {
                match self.status_of(&dependency) {
                    Ok(dep_status) => {
                        info!("Sideload {}: waiting for dependency {}", id, dependency);
                        tokio::select! {
                            _ = removal.cancelled() => {
                                interrupted = true;
                                break;
                            }
                            _ = dep_status.wait_for(ComponentStage::Prepared) => {}
                        }
                    }
                    Err(_) => warn!(
                        "Sideload {}: dependency {} is not registered; skipping wait",
                        id, dependency
                    ),
                }
            }
            if !interrupted {
                tokio::select! {
                    _ = removal.cancelled() => interrupted = true,
                    _ = self.component_prepare(id.clone(), Arc::clone(&status)) => {}
                }
            }
        }

        if !interrupted {
            local.advance(ConductorStage::Blocking);
            if stages.blocking {
                info!("Sideload {}: blocking", id);
                tokio::select! {
                    _ = removal.cancelled() => {}
                    _ = status.wait_for(ComponentStage::BlockingCompleted) => {
                        info!("Sideload {}: blocking completed", id);
                    }
                }
            }
        }

        // Exiting on the local view first, then the component's token.
        local.advance(ConductorStage::Cleaning);
        local.set_exiting();
        cancel.cancel();

        if stages.cleanup {
            self.component_cleanup(id.clone(), Arc::clone(&status)).await;
        }

        match self.inner.config.timeout.finale() {
            Some(limit) => {
                let abort = task.abort_handle();
                if timeout(limit, task).await.is_err() {
                    warn!(
                        "Sideload {}: task still pending after {:?}; aborting it",
                        id, limit
                    );
                    abort.abort();
                }
            }
            None => {
                let _ = task.await;
            }
        }

        info!("Sideload {}: completed", id);
        self.inner.registry.lock().remove(&id);
        if let Some(group) = self.inner.task_group.lock().clone() {
            group.remove_sideload(&id);
        }
    }
}
