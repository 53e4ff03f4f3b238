use super::orchestrator::Conductor;
use crate::component::ComponentContext;
use crate::error::{ConductorError, Result};
use crate::resolver::resolve_batches;
use crate::status::{ComponentStage, ConductorStage};
use crate::task_group::TaskGroup;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

impl Conductor {
    /// Drive every registered component through the full lifecycle.
    ///
    /// Fails with [`ConductorError::CyclicDependency`] before any component
    /// task starts if the dependency graph cannot be ordered, and with
    /// [`ConductorError::AlreadyRunning`] if a run is active or has already
    /// completed on this conductor.
    pub async fn run(&self) -> Result<()> {
        // Claim the run and spawn the cohort atomically against concurrent
        // registration, so every later add is a sideload.
        let (group, cohort, batches) = {
            let mut registry = self.inner.registry.lock();

            let pairs: Vec<(String, Vec<String>)> = registry
                .values()
                .map(|entry| {
                    (
                        entry.component.id().to_string(),
                        entry.component.dependencies(),
                    )
                })
                .collect();
            let batches = resolve_batches(&pairs, false)?;

            if !self.inner.status.begin() {
                return Err(ConductorError::AlreadyRunning);
            }

            let group = Arc::new(TaskGroup::new());
            *self.inner.task_group.lock() = Some(Arc::clone(&group));

            for (id, entry) in registry.iter_mut() {
                let context = ComponentContext {
                    id: id.clone(),
                    status: Arc::clone(&entry.status),
                    phase: self.status(),
                    cancel: entry.cancel.clone(),
                    conductor: self.clone(),
                };
                entry.task = Some(self.spawn_supervisor(Arc::clone(&entry.component), context));
            }

            let cohort: Vec<String> = registry.keys().cloned().collect();
            (group, cohort, batches)
        };

        info!(
            "Conductor starting with {} component(s) in {} batch(es)",
            cohort.len(),
            batches.len()
        );
        self.run_prepare_batches(&batches).await;

        self.inner.status.advance(ConductorStage::Blocking);
        info!("Conductor entering blocking phase");
        {
            let registry = self.inner.registry.lock();
            for id in &cohort {
                if let Some(entry) = registry.get(id) {
                    if entry.component.stages().blocking {
                        let status = Arc::clone(&entry.status);
                        let id = id.clone();
                        group.add(async move {
                            status.wait_for(ComponentStage::BlockingCompleted).await;
                            debug!("Component {} completed blocking", id);
                        });
                    }
                }
            }
        }
        group.join().await;

        // Exiting is raised before any cancellation goes out, so components
        // can tell a forced shutdown from normal completion.
        self.inner.status.set_exiting();
        info!("Entering cleanup phase");

        let pending = group.sideload_handles();
        if !pending.is_empty() {
            info!("Cancelling {} pending sideload tracker(s)", pending.len());
            for (_, handle) in &pending {
                handle.cancel.cancel();
            }
            for (id, handle) in pending {
                let mut done = handle.done;
                if done.wait_for(|done| *done).await.is_err() {
                    warn!("Sideload {} tracker ended without reporting completion", id);
                }
            }
        }

        self.inner.status.advance(ConductorStage::Cleaning);
        self.run_cleanup_batches().await;

        self.inner.status.advance(ConductorStage::Finished);
        info!("Lifecycle finished, waiting for supervising tasks");

        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut registry = self.inner.registry.lock();
            registry
                .iter_mut()
                .filter_map(|(id, entry)| entry.task.take().map(|task| (id.clone(), task)))
                .collect()
        };
        self.finale(handles).await;

        *self.inner.task_group.lock() = None;
        info!("Conductor run finished");
        Ok(())
    }

    /// Await the supervising tasks that are still alive after cleanup. With
    /// a finale timeout configured, stragglers are aborted once it elapses.
    async fn finale(&self, handles: Vec<(String, JoinHandle<()>)>) {
        let aborts: Vec<_> = handles
            .iter()
            .map(|(id, task)| (id.clone(), task.abort_handle()))
            .collect();

        let join_remaining = async {
            for (id, task) in handles {
                if let Err(err) = task.await {
                    if err.is_cancelled() {
                        warn!("Component {} task was aborted", id);
                    } else {
                        error!("Component {} task panicked: {}", id, err);
                    }
                }
            }
        };

        match self.inner.config.timeout.finale() {
            Some(limit) => {
                if timeout(limit, join_remaining).await.is_err() {
                    warn!(
                        "Supervising tasks still pending after {:?}; aborting them",
                        limit
                    );
                    for (id, abort) in aborts {
                        debug!("Aborting task of component {}", id);
                        abort.abort();
                    }
                }
            }
            None => join_remaining.await,
        }
    }

    /// Request a graceful shutdown: raise `exiting` and release the
    /// blocking phase. The run then tears down sideloads, executes the
    /// cleanup batches and finishes normally.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.inner.status.set_exiting();
        if let Some(group) = self.inner.task_group.lock().clone() {
            group.request_stop();
        }
    }

    /// Run the lifecycle with interrupt-style signal handling installed for
    /// its duration: SIGINT (and SIGTERM on unix) trigger a graceful
    /// shutdown. The listeners are torn down once the run completes.
    pub async fn run_until_signal(&self) -> Result<()> {
        let listeners = self.spawn_signal_listeners();
        let result = self.run().await;
        for listener in listeners {
            listener.abort();
        }
        result
    }

    fn spawn_signal_listeners(&self) -> Vec<JoinHandle<()>> {
        let mut listeners = Vec::new();

        #[cfg(unix)]
        {
            let conductor = self.clone();
            listeners.push(tokio::spawn(async move {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        if stream.recv().await.is_some() {
                            warn!("Received SIGTERM");
                            conductor.request_stop();
                        }
                    }
                    Err(err) => error!("Failed to register SIGTERM handler: {}", err),
                }
            }));
        }

        let conductor = self.clone();
        listeners.push(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received SIGINT (Ctrl+C)");
                conductor.request_stop();
            }
        }));

        listeners
    }
}
