use crate::component::{Component, ComponentContext};
use crate::config::ConductorConfig;
use crate::error::Cancelled;
use crate::status::{ComponentStage, ComponentStatus, ConductorStage, ConductorStatus};
use crate::task_group::TaskGroup;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Process-wide supervisor driving registered components through the staged
/// lifecycle: dependency-ordered preparation, a concurrent blocking phase,
/// and reverse-ordered cleanup.
///
/// Cloning is cheap and shares the same instance; the clone handed to each
/// component through its [`ComponentContext`] is how components reach their
/// siblings.
#[derive(Clone)]
pub struct Conductor {
    pub(crate) inner: Arc<ConductorInner>,
}

pub(crate) struct ConductorInner {
    pub(crate) config: ConductorConfig,
    pub(crate) status: Arc<ConductorStatus>,
    pub(crate) registry: Mutex<HashMap<String, Registered>>,
    pub(crate) task_group: Mutex<Option<Arc<TaskGroup>>>,
}

/// Registry entry for one component.
pub(crate) struct Registered {
    pub(crate) component: Arc<dyn Component>,
    pub(crate) status: Arc<ComponentStatus>,
    pub(crate) cancel: CancellationToken,
    /// Supervising task handle; `None` until the run spawns it, and always
    /// `None` for sideloaded components (their tracker owns the handle).
    pub(crate) task: Option<JoinHandle<()>>,
    pub(crate) sideloaded: bool,
}

impl Conductor {
    pub fn new() -> Self {
        Self::with_config(ConductorConfig::default())
    }

    pub fn with_config(config: ConductorConfig) -> Self {
        Self {
            inner: Arc::new(ConductorInner {
                config,
                status: Arc::new(ConductorStatus::new()),
                registry: Mutex::new(HashMap::new()),
                task_group: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.inner.config
    }

    /// The conductor's own status tracker.
    pub fn status(&self) -> Arc<ConductorStatus> {
        Arc::clone(&self.inner.status)
    }

    /// Current global phase.
    pub fn stage(&self) -> ConductorStage {
        self.inner.status.stage()
    }

    /// Whether a run is currently active.
    pub fn is_running(&self) -> bool {
        self.inner.task_group.lock().is_some()
    }

    pub(crate) fn spawn_supervisor(
        &self,
        component: Arc<dyn Component>,
        context: ComponentContext,
    ) -> JoinHandle<()> {
        tokio::spawn(supervise(self.clone(), component, context))
    }
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one component's `launch` and absorb its outcome: failures are logged
/// with their full cause and contained, cooperative cancellation is logged
/// as expected, and the status is force-advanced to the terminal stage so
/// that no waiter outlives the task.
async fn supervise(
    conductor: Conductor,
    component: Arc<dyn Component>,
    context: ComponentContext,
) {
    let id = component.id().to_string();
    let status = context.status();
    let stages = component.stages();

    match component.launch(context).await {
        Ok(()) => {}
        Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
            warn!("Component {} was cancelled during shutdown", id);
        }
        Err(err) => {
            error!("Component {} raised an error: {:#}", id, err);
        }
    }

    match conductor.stage() {
        ConductorStage::Preparing => {
            if stages.preparing && status.stage() < ComponentStage::Prepared {
                error!("Component {} exited before completing preparation", id);
            }
        }
        ConductorStage::Blocking => {
            if stages.cleanup && status.stage() < ComponentStage::Cleanup {
                warn!("Component {} exited without cleanup", id);
            } else {
                info!("Component {} finished", id);
            }
        }
        ConductorStage::Cleaning => {
            if stages.cleanup && status.stage() < ComponentStage::Cleanup {
                warn!("Component {} exited before completing cleanup", id);
            } else {
                info!("Component {} finished", id);
            }
        }
        _ => {}
    }

    info!("Component {} completed", id);
    status.advance(ComponentStage::Finished);
}
