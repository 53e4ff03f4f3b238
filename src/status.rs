use std::fmt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fine-grained progression of a single component through its lifecycle.
///
/// The ordering of the variants is meaningful: a status only ever moves
/// forward, and waiting for a stage resolves as soon as the status reaches
/// or passes it. `Finished` is the implicit terminal every component ends
/// on, whatever stages it declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentStage {
    WaitingForPrepare,
    Preparing,
    Prepared,
    Blocking,
    BlockingCompleted,
    WaitingForCleanup,
    Cleanup,
    Finished,
}

impl fmt::Display for ComponentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentStage::WaitingForPrepare => "waiting-for-prepare",
            ComponentStage::Preparing => "preparing",
            ComponentStage::Prepared => "prepared",
            ComponentStage::Blocking => "blocking",
            ComponentStage::BlockingCompleted => "blocking-completed",
            ComponentStage::WaitingForCleanup => "waiting-for-cleanup",
            ComponentStage::Cleanup => "cleanup",
            ComponentStage::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}

/// Global phase of a conductor run. Strictly sequential, terminal at
/// `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConductorStage {
    Idle,
    Preparing,
    Blocking,
    Cleaning,
    Finished,
}

impl fmt::Display for ConductorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConductorStage::Idle => "idle",
            ConductorStage::Preparing => "preparing",
            ConductorStage::Blocking => "blocking",
            ConductorStage::Cleaning => "cleaning",
            ConductorStage::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}

/// Observable stage tracker for one component.
///
/// Writes go through `advance`, which rejects backward transitions; every
/// write atomically wakes all waiters whose target stage has been reached
/// or passed.
#[derive(Debug)]
pub struct ComponentStatus {
    stage: watch::Sender<ComponentStage>,
}

impl ComponentStatus {
    pub(crate) fn new() -> Self {
        let (stage, _) = watch::channel(ComponentStage::WaitingForPrepare);
        Self { stage }
    }

    /// Current stage.
    pub fn stage(&self) -> ComponentStage {
        *self.stage.borrow()
    }

    /// Move the stage forward. Backward or same-stage writes are ignored;
    /// returns whether the stage actually changed.
    pub(crate) fn advance(&self, next: ComponentStage) -> bool {
        let changed = self.stage.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Component stage advanced to {}", next);
        }
        changed
    }

    /// Wait until the stage reaches or passes `target`. Returns immediately
    /// if it already has; a transition can never be missed between the check
    /// and the subscription.
    pub async fn wait_for(&self, target: ComponentStage) {
        let mut rx = self.stage.subscribe();
        // The sender lives in self, so the channel cannot close mid-wait.
        let _ = rx.wait_for(|stage| *stage >= target).await;
    }
}

/// Observable phase tracker for a conductor (or for the local view a
/// sideloaded component observes), plus the monotonic `exiting` flag.
#[derive(Debug)]
pub struct ConductorStatus {
    stage: watch::Sender<ConductorStage>,
    exit: CancellationToken,
}

impl ConductorStatus {
    pub(crate) fn new() -> Self {
        let (stage, _) = watch::channel(ConductorStage::Idle);
        Self {
            stage,
            exit: CancellationToken::new(),
        }
    }

    /// Current phase.
    pub fn stage(&self) -> ConductorStage {
        *self.stage.borrow()
    }

    /// Atomically claim the `Idle -> Preparing` transition. Returns false if
    /// the conductor has already been started (or already finished a run).
    pub(crate) fn begin(&self) -> bool {
        self.stage.send_if_modified(|current| {
            if *current == ConductorStage::Idle {
                *current = ConductorStage::Preparing;
                true
            } else {
                false
            }
        })
    }

    /// Move the phase forward; backward writes are ignored.
    pub(crate) fn advance(&self, next: ConductorStage) -> bool {
        self.stage.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the phase reaches or passes `target`.
    pub async fn wait_for(&self, target: ConductorStage) {
        let mut rx = self.stage.subscribe();
        let _ = rx.wait_for(|stage| *stage >= target).await;
    }

    /// Whether shutdown has been requested. Once set, never cleared.
    pub fn exiting(&self) -> bool {
        self.exit.is_cancelled()
    }

    /// Await the `exiting` flag.
    pub async fn wait_exiting(&self) {
        self.exit.cancelled().await;
    }

    pub(crate) fn set_exiting(&self) {
        self.exit.cancel();
    }

    /// Token backing the `exiting` flag; component cancellation tokens are
    /// children of it so that shutdown reaches every component.
    pub(crate) fn exit_token(&self) -> &CancellationToken {
        &self.exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn component_stage_ordering() {
        assert!(ComponentStage::WaitingForPrepare < ComponentStage::Preparing);
        assert!(ComponentStage::Prepared < ComponentStage::Blocking);
        assert!(ComponentStage::WaitingForCleanup < ComponentStage::Cleanup);
        assert!(ComponentStage::Cleanup < ComponentStage::Finished);
    }

    #[test]
    fn advance_is_monotonic() {
        let status = ComponentStatus::new();
        assert!(status.advance(ComponentStage::Prepared));
        assert!(!status.advance(ComponentStage::Preparing));
        assert_eq!(status.stage(), ComponentStage::Prepared);
        assert!(!status.advance(ComponentStage::Prepared));
    }

    #[tokio::test]
    async fn wait_for_returns_immediately_when_already_passed() {
        let status = ComponentStatus::new();
        status.advance(ComponentStage::Blocking);
        // Subscribing after satisfaction must not block.
        timeout(Duration::from_secs(1), status.wait_for(ComponentStage::Prepared))
            .await
            .expect("wait_for should resolve immediately");
    }

    #[tokio::test]
    async fn wait_for_wakes_on_transition() {
        let status = Arc::new(ComponentStatus::new());
        let waiter = {
            let status = Arc::clone(&status);
            tokio::spawn(async move { status.wait_for(ComponentStage::Prepared).await })
        };
        tokio::task::yield_now().await;
        status.advance(ComponentStage::Prepared);
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should complete")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn multiple_waiters_all_resolve() {
        let status = Arc::new(ComponentStatus::new());
        let mut waiters = Vec::new();
        for target in [
            ComponentStage::Preparing,
            ComponentStage::Prepared,
            ComponentStage::Prepared,
        ] {
            let status = Arc::clone(&status);
            waiters.push(tokio::spawn(async move { status.wait_for(target).await }));
        }
        tokio::task::yield_now().await;
        status.advance(ComponentStage::Finished);
        for waiter in waiters {
            timeout(Duration::from_secs(1), waiter)
                .await
                .expect("every waiter should resolve")
                .expect("waiter task should not panic");
        }
    }

    #[test]
    fn begin_claims_the_run_once() {
        let status = ConductorStatus::new();
        assert!(status.begin());
        assert!(!status.begin());
        assert_eq!(status.stage(), ConductorStage::Preparing);
        status.advance(ConductorStage::Finished);
        assert!(!status.begin());
    }

    #[tokio::test]
    async fn exiting_flag_is_observable() {
        let status = ConductorStatus::new();
        assert!(!status.exiting());
        status.set_exiting();
        assert!(status.exiting());
        timeout(Duration::from_secs(1), status.wait_exiting())
            .await
            .expect("wait_exiting should resolve after set_exiting");
    }
}
