use crate::conductor::Conductor;
use crate::error::Cancelled;
use crate::status::{ComponentStage, ComponentStatus, ConductorStage, ConductorStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The three lifecycle phases a component may opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preparing,
    Blocking,
    Cleanup,
}

/// Set of lifecycle phases declared by a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageSet {
    pub preparing: bool,
    pub blocking: bool,
    pub cleanup: bool,
}

impl StageSet {
    pub const fn all() -> Self {
        Self {
            preparing: true,
            blocking: true,
            cleanup: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            preparing: false,
            blocking: false,
            cleanup: false,
        }
    }

    pub fn contains(&self, stage: Stage) -> bool {
        match stage {
            Stage::Preparing => self.preparing,
            Stage::Blocking => self.blocking,
            Stage::Cleanup => self.cleanup,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.preparing && !self.blocking && !self.cleanup
    }
}

/// An independently schedulable unit of the managed process.
///
/// Implementors declare which lifecycle phases they participate in and drive
/// themselves through those phases inside `launch`, using the handshake
/// methods on the provided [`ComponentContext`]. A component must only pass
/// through the stages it declares; the conductor takes care of ordering
/// across components.
#[async_trait]
pub trait Component: Send + Sync {
    /// Unique identity within one conductor.
    fn id(&self) -> &str;

    /// Lifecycle phases this component participates in.
    fn stages(&self) -> StageSet {
        StageSet::all()
    }

    /// Ids of components that must be prepared before this one prepares,
    /// and that are cleaned up only after this one finished cleanup.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run the component's lifecycle. Called exactly once per run, on a
    /// dedicated supervising task; an error is contained and logged, it
    /// never propagates to sibling components.
    async fn launch(&self, context: ComponentContext) -> anyhow::Result<()>;
}

/// Handle a component receives for its lifecycle run.
///
/// Carries the component's own status, the phase view it synchronizes
/// against (the conductor's status, or a local one when sideloaded), a
/// cancellation token observed at the component's suspension points, and a
/// conductor handle for reaching sibling components.
pub struct ComponentContext {
    pub(crate) id: String,
    pub(crate) status: Arc<ComponentStatus>,
    pub(crate) phase: Arc<ConductorStatus>,
    pub(crate) cancel: CancellationToken,
    pub(crate) conductor: Conductor,
}

impl ComponentContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// This component's own status tracker.
    pub fn status(&self) -> Arc<ComponentStatus> {
        Arc::clone(&self.status)
    }

    /// The conductor this component is registered with, for sibling lookup
    /// and runtime attach/detach.
    pub fn conductor(&self) -> &Conductor {
        &self.conductor
    }

    /// Whether the surrounding lifecycle is shutting down.
    pub fn is_exiting(&self) -> bool {
        self.phase.exiting()
    }

    /// Whether this component has been asked to stop. Set on process
    /// shutdown and on sideload removal.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await this component's stop request. Long-running blocking work
    /// should race against this.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Wait until the conductor grants this component's preparing phase.
    /// Resolves to [`Cancelled`] if shutdown starts first.
    pub async fn enter_preparing(&self) -> Result<(), Cancelled> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Cancelled),
            _ = self.status.wait_for(ComponentStage::Preparing) => Ok(()),
        }
    }

    /// Report that preparation is complete, unblocking dependents.
    pub fn mark_prepared(&self) {
        self.status.advance(ComponentStage::Prepared);
    }

    /// Wait until the global blocking phase starts. Resolves to
    /// [`Cancelled`] if shutdown starts first; a component that still wants
    /// its cleanup phase should swallow the error and fall through to
    /// [`enter_cleanup`](Self::enter_cleanup).
    pub async fn enter_blocking(&self) -> Result<(), Cancelled> {
        let entered = tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.phase.wait_for(ConductorStage::Blocking) => true,
        };
        if entered {
            self.status.advance(ComponentStage::Blocking);
            Ok(())
        } else {
            Err(Cancelled)
        }
    }

    /// Report that the blocking work is over.
    pub fn finish_blocking(&self) {
        self.status.advance(ComponentStage::BlockingCompleted);
    }

    /// Report readiness for cleanup and wait for the conductor's grant.
    /// Never bails on cancellation: cleanup is always granted, by the
    /// cleanup batches or by the sideload tracker.
    pub async fn enter_cleanup(&self) {
        self.status.advance(ComponentStage::WaitingForCleanup);
        self.status.wait_for(ComponentStage::Cleanup).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_set_contains() {
        let set = StageSet {
            preparing: true,
            blocking: false,
            cleanup: true,
        };
        assert!(set.contains(Stage::Preparing));
        assert!(!set.contains(Stage::Blocking));
        assert!(set.contains(Stage::Cleanup));
        assert!(!set.is_empty());
    }

    #[test]
    fn stage_set_all_and_none() {
        assert!(StageSet::all().contains(Stage::Blocking));
        assert!(StageSet::none().is_empty());
        assert_eq!(StageSet::default(), StageSet::none());
    }
}
