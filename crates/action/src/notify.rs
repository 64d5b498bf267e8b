//! Best-effort rescan requests after a settled action.

use async_trait::async_trait;
use client::Api;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[async_trait]
pub trait SyncNotifier: Send + Sync {
    async fn notify(&self, wallet_id: &str, target_id: &str, tx_id: &str) -> eyre::Result<()>;
}

/// Asks the API to rescan wallet metrics for a contract.
#[derive(Debug, Clone)]
pub struct GraphQlNotifier {
    api: Api,
}

impl GraphQlNotifier {
    pub const fn new(api: Api) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SyncNotifier for GraphQlNotifier {
    async fn notify(&self, wallet_id: &str, target_id: &str, tx_id: &str) -> eyre::Result<()> {
        let accepted = self
            .api
            .wallet_metric_scan(wallet_id, target_id, tx_id)
            .await?;
        if !accepted {
            eyre::bail!("Metric scan not accepted");
        }
        Ok(())
    }
}

/// Background dispatcher, attempting each notification at most once.
///
/// Requests run on their own tasks; [`RemoteSync::drain`] waits for the ones
/// still in flight.
#[derive(Clone)]
pub struct RemoteSync {
    notifier: Arc<dyn SyncNotifier>,
    sent: Arc<Mutex<HashSet<(String, String, String)>>>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RemoteSync {
    pub fn new(notifier: Arc<dyn SyncNotifier>) -> Self {
        Self {
            notifier,
            sent: Arc::new(Mutex::new(HashSet::new())),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Spawn the notification. `false` when this triple was already attempted.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, wallet_id: String, target_id: String, tx_id: String) -> bool {
        let first = lock(&self.sent).insert((wallet_id.clone(), target_id.clone(), tx_id.clone()));
        if !first {
            debug!(%wallet_id, %target_id, %tx_id, "Remote sync already attempted");
            return false;
        }

        let notifier = Arc::clone(&self.notifier);
        let mut tasks = lock(&self.tasks);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            match notifier.notify(&wallet_id, &target_id, &tx_id).await {
                Ok(()) => debug!(%wallet_id, %target_id, %tx_id, "Remote sync requested"),
                Err(e) => warn!(
                    %wallet_id,
                    %target_id,
                    %tx_id,
                    error = %e,
                    "Remote sync failed"
                ),
            }
        });
        true
    }

    /// Requests spawned and not yet collected by [`RemoteSync::drain`].
    pub fn in_flight(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Wait up to `timeout` for the requests in flight. Requests still running
    /// afterwards are aborted; returns how many were.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *lock(&self.tasks));
        if tasks.is_empty() {
            return 0;
        }

        let finished = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if finished.is_ok() {
            return 0;
        }

        let abandoned = tasks.len();
        warn!(abandoned, "Remote sync requests still running, aborting");
        tasks.shutdown().await;
        abandoned
    }
}
