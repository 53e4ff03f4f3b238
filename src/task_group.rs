use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bookkeeping for one sideloaded component's tracker task.
#[derive(Debug, Clone)]
pub(crate) struct SideloadHandle {
    /// Cancels the tracker, which then drives the component's cleanup.
    pub(crate) cancel: CancellationToken,
    /// Latched true once the tracker has purged the component.
    pub(crate) done: watch::Receiver<bool>,
}

/// A join point over concurrently running members that can keep growing
/// while it is being awaited.
///
/// Members are added with [`add`](Self::add) at any time, including while
/// [`join`](Self::join) is in flight; the joiner picks them up without
/// missing completions. Requesting a stop makes the join return as soon as
/// it observes the flag, with members still pending; pending sideload
/// trackers stay registered here so the conductor can cancel and await them
/// afterwards instead of abandoning them.
pub struct TaskGroup {
    staged: Mutex<Vec<BoxFuture<'static, ()>>>,
    added: Notify,
    stop: CancellationToken,
    sideloads: Mutex<HashMap<String, SideloadHandle>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            staged: Mutex::new(Vec::new()),
            added: Notify::new(),
            stop: CancellationToken::new(),
            sideloads: Mutex::new(HashMap::new()),
        }
    }

    /// Add a member. Wakes the joiner if it is already waiting.
    pub fn add<F>(&self, member: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.staged.lock().push(Box::pin(member));
        self.added.notify_one();
    }

    /// Ask the current join to complete even with members pending.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Await all members, including ones added along the way. Returns when
    /// every member has completed or when a stop is requested, whichever
    /// comes first.
    pub async fn join(&self) {
        let mut active: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
        loop {
            {
                let mut staged = self.staged.lock();
                for member in staged.drain(..) {
                    active.push(member);
                }
            }
            if active.is_empty() {
                return;
            }
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!("Task group stop requested with {} member(s) pending", active.len());
                    return;
                }
                _ = self.added.notified() => {}
                _ = active.next() => {}
            }
        }
    }

    pub(crate) fn register_sideload(&self, id: &str, handle: SideloadHandle) {
        self.sideloads.lock().insert(id.to_string(), handle);
    }

    pub(crate) fn remove_sideload(&self, id: &str) {
        self.sideloads.lock().remove(id);
    }

    pub(crate) fn sideload(&self, id: &str) -> Option<SideloadHandle> {
        self.sideloads.lock().get(id).cloned()
    }

    pub(crate) fn has_sideload(&self, id: &str) -> bool {
        self.sideloads.lock().contains_key(id)
    }

    pub(crate) fn sideload_handles(&self) -> Vec<(String, SideloadHandle)> {
        self.sideloads
            .lock()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    #[tokio::test]
    async fn join_with_no_members_returns_immediately() {
        let group = TaskGroup::new();
        timeout(Duration::from_secs(1), group.join())
            .await
            .expect("empty join should not block");
    }

    #[tokio::test]
    async fn join_waits_for_all_members() {
        let group = TaskGroup::new();
        let (tx, rx) = oneshot::channel::<()>();
        group.add(async move {
            let _ = rx.await;
        });
        group.add(async {});

        let joined = tokio::spawn({
            let group = Arc::new(group);
            let group2 = Arc::clone(&group);
            async move { group2.join().await }
        });
        tokio::task::yield_now().await;
        assert!(!joined.is_finished());

        tx.send(()).expect("receiver should be alive");
        timeout(Duration::from_secs(1), joined)
            .await
            .expect("join should complete once all members finish")
            .expect("join task should not panic");
    }

    #[tokio::test]
    async fn members_can_be_added_while_joining() {
        let group = Arc::new(TaskGroup::new());
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let (late_tx, late_rx) = oneshot::channel::<()>();
        group.add(async move {
            let _ = first_rx.await;
        });

        let joined = {
            let group = Arc::clone(&group);
            tokio::spawn(async move { group.join().await })
        };
        tokio::task::yield_now().await;

        // The join is already in flight; add another member, then release
        // the first. The join must still wait on the late member.
        group.add(async move {
            let _ = late_rx.await;
        });
        first_tx.send(()).expect("receiver should be alive");
        tokio::task::yield_now().await;
        assert!(!joined.is_finished());

        late_tx.send(()).expect("receiver should be alive");
        timeout(Duration::from_secs(1), joined)
            .await
            .expect("join should pick up the late member")
            .expect("join task should not panic");
    }

    #[tokio::test]
    async fn stop_releases_join_with_members_pending() {
        let group = Arc::new(TaskGroup::new());
        group.add(std::future::pending::<()>());

        let joined = {
            let group = Arc::clone(&group);
            tokio::spawn(async move { group.join().await })
        };
        tokio::task::yield_now().await;
        assert!(!joined.is_finished());

        group.request_stop();
        assert!(group.stop_requested());
        timeout(Duration::from_secs(1), joined)
            .await
            .expect("stop should release the join")
            .expect("join task should not panic");
    }
}
