use super::orchestrator::{Conductor, Registered};
use crate::component::Component;
use crate::error::{ConductorError, Result};
use crate::status::{ComponentStage, ComponentStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

impl Conductor {
    /// Register a component under its id.
    ///
    /// Before the run has started this only records the component; the run
    /// will schedule it inside the batch plan. While a run is active the
    /// component is sideloaded instead: a dedicated tracker task drives its
    /// full lifecycle outside the batch plan, honoring its declared
    /// dependencies by waiting on the already-running siblings.
    pub fn add_component(&self, component: Arc<dyn Component>) -> Result<()> {
        let id = component.id().to_string();

        let (group, status, cancel) = {
            let mut registry = self.inner.registry.lock();
            // Read the group under the registry lock: the run claims both
            // together, so an add lands either in the cohort or as a
            // sideload, never in between.
            let group = self.inner.task_group.lock().clone();
            if registry.contains_key(&id) {
                return Err(ConductorError::duplicate(id));
            }
            let status = Arc::new(ComponentStatus::new());
            let cancel = self.inner.status.exit_token().child_token();
            registry.insert(
                id.clone(),
                Registered {
                    component: Arc::clone(&component),
                    status: Arc::clone(&status),
                    cancel: cancel.clone(),
                    task: None,
                    sideloaded: group.is_some(),
                },
            );
            (group, status, cancel)
        };

        if let Some(group) = group {
            self.spawn_sideload(group, component, id, status, cancel);
        } else {
            info!("Component {} registered", id);
        }
        Ok(())
    }

    /// Look up a registered component.
    pub fn get_component(&self, id: &str) -> Result<Arc<dyn Component>> {
        self.inner
            .registry
            .lock()
            .get(id)
            .map(|entry| Arc::clone(&entry.component))
            .ok_or_else(|| ConductorError::not_found(id))
    }

    /// Look up a registered component's status tracker, e.g. to wait on a
    /// sibling from inside a running component.
    pub fn status_of(&self, id: &str) -> Result<Arc<ComponentStatus>> {
        self.inner
            .registry
            .lock()
            .get(id)
            .map(|entry| Arc::clone(&entry.status))
            .ok_or_else(|| ConductorError::not_found(id))
    }

    /// Snapshot of every registered component's current stage.
    pub fn component_stages(&self) -> HashMap<String, ComponentStage> {
        self.inner
            .registry
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.status.stage()))
            .collect()
    }

    /// Deregister a component.
    ///
    /// Outside a run any component can be removed. During a run only a
    /// sideloaded component in a settled stage (`prepared`, `blocking`,
    /// `blocking-completed`, `waiting-for-cleanup`) is removable; removal
    /// cancels its tracker, which runs the component's declared cleanup
    /// before purging it from the registry. Removing a sideloaded component
    /// whose tracker has already finished is a no-op.
    pub fn remove_component(&self, id: &str) -> Result<()> {
        let group = self.inner.task_group.lock().clone();

        let Some(group) = group else {
            return match self.inner.registry.lock().remove(id) {
                Some(_) => {
                    info!("Component {} deregistered", id);
                    Ok(())
                }
                None => Err(ConductorError::not_found(id)),
            };
        };

        let entry_state = {
            let registry = self.inner.registry.lock();
            registry
                .get(id)
                .map(|entry| (entry.sideloaded, entry.status.stage()))
        };

        let Some((sideloaded, stage)) = entry_state else {
            if group.has_sideload(id) {
                // Tracker already tearing the component down; let it pass.
                return Ok(());
            }
            return Err(ConductorError::not_found(id));
        };

        if !sideloaded {
            return Err(ConductorError::invalid_removal(
                id,
                "only sideloaded components can be removed at runtime",
            ));
        }

        let Some(handle) = group.sideload(id) else {
            // Tracker completed and purged itself between the two lookups.
            return Ok(());
        };
        if *handle.done.borrow() {
            return Ok(());
        }

        match stage {
            ComponentStage::Prepared
            | ComponentStage::Blocking
            | ComponentStage::BlockingCompleted
            | ComponentStage::WaitingForCleanup => {}
            other => {
                return Err(ConductorError::InvalidRemoval {
                    id: id.to_string(),
                    reason: format!("stage {} is not removable", other),
                });
            }
        }

        info!("Component {} removal requested", id);
        handle.cancel.cancel();
        Ok(())
    }
}
