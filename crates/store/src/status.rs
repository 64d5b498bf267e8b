//! Per-action status bus.
//!
//! Every (target, kind) pair owns a status that moves through
//! `Idle -> Checking -> Submitted -> Confirming -> Settled`, with `Failed`
//! reachable from `Checking` and `Confirming` and `Idle` reachable from
//! anywhere. Each transition happens under one lock and is delivered to
//! subscribers in order.

use adapter::ActionKind;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey {
    pub target_id: String,
    pub kind: ActionKind,
}

impl ActionKey {
    pub fn new(target_id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            target_id: target_id.into(),
            kind,
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_id, self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ActionStatus {
    #[default]
    Idle,
    Checking,
    Submitted,
    Confirming,
    Settled,
    Failed(String),
}

impl ActionStatus {
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Checking | Self::Submitted | Self::Confirming)
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed(_))
    }

    pub const fn can_transition(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Idle)
                | (Self::Idle, Self::Checking)
                | (Self::Checking, Self::Submitted | Self::Failed(_))
                | (Self::Submitted, Self::Confirming)
                | (Self::Confirming, Self::Settled | Self::Failed(_))
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Submitted => "submitted",
            Self::Confirming => "confirming",
            Self::Settled => "settled",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(message) => write!(f, "failed: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Action {0} is already in progress")]
    AlreadyInProgress(ActionKey),

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: ActionStatus, to: ActionStatus },

    #[error("Action {0} was reset")]
    Superseded(ActionKey),
}

/// A status change, as seen by process-wide listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub key: ActionKey,
    pub status: ActionStatus,
}

/// Proof that the holder started the current run of an action.
///
/// Resetting the action invalidates the ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    key: ActionKey,
    generation: u64,
}

impl Ticket {
    pub const fn key(&self) -> &ActionKey {
        &self.key
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Default)]
struct Entry {
    status: ActionStatus,
    generation: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<ActionStatus>)>,
}

/// Settled and failed statuses nobody subscribed to, kept for `status` reads.
pub const RETAINED_TERMINAL: usize = 256;

#[derive(Default)]
struct Inner {
    entries: HashMap<ActionKey, Entry>,
    retained_terminal: usize,
    // Monotonic across keys so a removed entry never reissues a generation.
    generation: u64,
    next_subscriber: u64,
    listeners: Vec<mpsc::UnboundedSender<StatusUpdate>>,
}

impl Inner {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn prune(&mut self, key: &ActionKey) {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.status == ActionStatus::Idle && entry.subscribers.is_empty())
        {
            self.entries.remove(key);
        }
    }

    /// Drop the oldest unobserved terminal entries beyond the retention limit.
    fn evict_unobserved(&mut self) {
        let mut unobserved: Vec<(u64, ActionKey)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.status.is_terminal() && entry.subscribers.is_empty())
            .map(|(key, entry)| (entry.generation, key.clone()))
            .collect();
        let Some(excess) = unobserved.len().checked_sub(self.retained_terminal) else {
            return;
        };

        unobserved.sort_unstable_by_key(|(generation, _)| *generation);
        for (_, key) in unobserved.into_iter().take(excess) {
            trace!(%key, "Evicting unobserved terminal status");
            self.entries.remove(&key);
        }
    }
}

fn publish(
    entry: &mut Entry,
    listeners: &mut Vec<mpsc::UnboundedSender<StatusUpdate>>,
    key: &ActionKey,
    status: ActionStatus,
) {
    trace!(%key, from = %entry.status, to = %status, "Status transition");
    entry.status = status;
    entry
        .subscribers
        .retain(|(_, sender)| sender.send(entry.status.clone()).is_ok());
    listeners.retain(|listener| {
        listener
            .send(StatusUpdate {
                key: key.clone(),
                status: entry.status.clone(),
            })
            .is_ok()
    });
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared status store. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct StatusBus {
    inner: Arc<Mutex<Inner>>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        Self::with_retention(RETAINED_TERMINAL)
    }

    /// Bus keeping at most `retained_terminal` terminal statuses that have no
    /// subscriber; older ones read as `Idle` again.
    pub fn with_retention(retained_terminal: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                retained_terminal,
                ..Inner::default()
            })),
        }
    }

    pub fn status(&self, key: &ActionKey) -> ActionStatus {
        lock(&self.inner)
            .entries
            .get(key)
            .map(|entry| entry.status.clone())
            .unwrap_or_default()
    }

    /// Start a run of `key`, moving it to `Checking`.
    ///
    /// A terminal status from a previous run is cleared to `Idle` first.
    pub fn begin(&self, key: &ActionKey) -> Result<Ticket, StoreError> {
        let mut inner = lock(&self.inner);
        let generation = inner.next_generation();
        let Inner {
            entries, listeners, ..
        } = &mut *inner;
        let entry = entries.entry(key.clone()).or_default();

        if entry.status.is_in_flight() {
            return Err(StoreError::AlreadyInProgress(key.clone()));
        }
        if entry.status.is_terminal() {
            publish(entry, listeners, key, ActionStatus::Idle);
        }

        entry.generation = generation;
        publish(entry, listeners, key, ActionStatus::Checking);
        debug!(%key, generation, "Action started");

        Ok(Ticket {
            key: key.clone(),
            generation,
        })
    }

    /// Move the ticket's action to `status` if the ticket is still current.
    pub fn advance(&self, ticket: &Ticket, status: ActionStatus) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        let Inner {
            entries, listeners, ..
        } = &mut *inner;

        let Some(entry) = entries
            .get_mut(&ticket.key)
            .filter(|entry| entry.generation == ticket.generation)
        else {
            return Err(StoreError::Superseded(ticket.key.clone()));
        };

        if !entry.status.can_transition(&status) {
            return Err(StoreError::InvalidTransition {
                from: entry.status.clone(),
                to: status,
            });
        }

        let terminal = status.is_terminal();
        publish(entry, listeners, &ticket.key, status);
        if terminal {
            inner.evict_unobserved();
        }
        Ok(())
    }

    /// Whether `ticket` still owns its action.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        lock(&self.inner)
            .entries
            .get(&ticket.key)
            .is_some_and(|entry| entry.generation == ticket.generation)
    }

    pub fn fail(&self, ticket: &Ticket, message: impl Into<String>) -> Result<(), StoreError> {
        self.advance(ticket, ActionStatus::Failed(message.into()))
    }

    /// Clear `key` back to `Idle`. Outstanding tickets become stale.
    pub fn reset(&self, key: &ActionKey) {
        let mut inner = lock(&self.inner);
        let generation = inner.next_generation();
        let Inner {
            entries, listeners, ..
        } = &mut *inner;

        if let Some(entry) = entries.get_mut(key) {
            entry.generation = generation;
            if entry.status != ActionStatus::Idle {
                publish(entry, listeners, key, ActionStatus::Idle);
            }
        }
        inner.prune(key);
    }

    /// Clear every action back to `Idle`.
    pub fn reset_all(&self) {
        let mut inner = lock(&self.inner);
        let generation = inner.next_generation();
        let Inner {
            entries, listeners, ..
        } = &mut *inner;

        for (key, entry) in entries.iter_mut() {
            entry.generation = generation;
            if entry.status != ActionStatus::Idle {
                publish(entry, listeners, key, ActionStatus::Idle);
            }
        }
        entries.retain(|_, entry| !entry.subscribers.is_empty());
    }

    /// Receive every transition of `key` from now on.
    pub fn subscribe(&self, key: &ActionKey) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        inner.next_subscriber += 1;
        let id = inner.next_subscriber;

        let entry = inner.entries.entry(key.clone()).or_default();
        entry.subscribers.push((id, sender));

        Subscription {
            key: key.clone(),
            id,
            initial: entry.status.clone(),
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Receive every transition of every action.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<StatusUpdate> {
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.inner).listeners.push(sender);
        receiver
    }

    /// Number of live subscriptions on `key`.
    pub fn subscribers(&self, key: &ActionKey) -> usize {
        lock(&self.inner)
            .entries
            .get(key)
            .map_or(0, |entry| entry.subscribers.len())
    }
}

/// Subscription to one action's status. Dropping it unsubscribes.
pub struct Subscription {
    key: ActionKey,
    id: u64,
    initial: ActionStatus,
    receiver: mpsc::UnboundedReceiver<ActionStatus>,
    bus: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub const fn key(&self) -> &ActionKey {
        &self.key
    }

    /// Status at the time of subscribing.
    pub const fn initial(&self) -> &ActionStatus {
        &self.initial
    }

    pub async fn recv(&mut self) -> Option<ActionStatus> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ActionStatus> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut inner = lock(&bus);
        let Inner {
            entries, listeners, ..
        } = &mut *inner;

        if let Some(entry) = entries.get_mut(&self.key) {
            entry.subscribers.retain(|(id, _)| *id != self.id);
            if entry.subscribers.is_empty() && entry.status.is_terminal() {
                publish(entry, listeners, &self.key, ActionStatus::Idle);
            }
        }
        inner.prune(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: ActionKind) -> ActionKey {
        ActionKey::new("contract-1", kind)
    }

    fn drain(subscription: &mut Subscription) -> Vec<ActionStatus> {
        std::iter::from_fn(|| subscription.try_recv()).collect()
    }

    #[test]
    fn test_allowed_edges() {
        use ActionStatus::*;
        let failed = Failed("boom".to_string());

        assert!(Idle.can_transition(&Checking));
        assert!(Checking.can_transition(&Submitted));
        assert!(Checking.can_transition(&failed));
        assert!(Submitted.can_transition(&Confirming));
        assert!(Confirming.can_transition(&Settled));
        assert!(Confirming.can_transition(&failed));
        for status in [Checking, Submitted, Confirming, Settled, failed.clone()] {
            assert!(status.can_transition(&Idle));
        }

        assert!(!Idle.can_transition(&Submitted));
        assert!(!Checking.can_transition(&Settled));
        assert!(!Submitted.can_transition(&failed));
        assert!(!Settled.can_transition(&Checking));
        assert!(!failed.can_transition(&Confirming));
    }

    #[test]
    fn test_full_run_is_delivered_in_order() {
        let bus = StatusBus::new();
        let key = key(ActionKind::Stake);
        let mut subscription = bus.subscribe(&key);
        assert_eq!(subscription.initial(), &ActionStatus::Idle);

        let ticket = bus.begin(&key).unwrap();
        bus.advance(&ticket, ActionStatus::Submitted).unwrap();
        bus.advance(&ticket, ActionStatus::Confirming).unwrap();
        bus.advance(&ticket, ActionStatus::Settled).unwrap();

        assert_eq!(
            drain(&mut subscription),
            vec![
                ActionStatus::Checking,
                ActionStatus::Submitted,
                ActionStatus::Confirming,
                ActionStatus::Settled,
            ]
        );
    }

    #[test]
    fn test_begin_rejects_in_flight() {
        let bus = StatusBus::new();
        let key = key(ActionKind::Stake);

        let _ticket = bus.begin(&key).unwrap();
        assert_eq!(
            bus.begin(&key).unwrap_err(),
            StoreError::AlreadyInProgress(key.clone())
        );
    }

    #[test]
    fn test_begin_clears_terminal_status() {
        let bus = StatusBus::new();
        let key = key(ActionKind::Claim);
        let mut subscription = bus.subscribe(&key);

        let ticket = bus.begin(&key).unwrap();
        bus.fail(&ticket, "rejected").unwrap();
        bus.begin(&key).unwrap();

        assert_eq!(
            drain(&mut subscription),
            vec![
                ActionStatus::Checking,
                ActionStatus::Failed("rejected".to_string()),
                ActionStatus::Idle,
                ActionStatus::Checking,
            ]
        );
    }

    #[test]
    fn test_invalid_transition() {
        let bus = StatusBus::new();
        let key = key(ActionKind::Stake);
        let ticket = bus.begin(&key).unwrap();

        assert_eq!(
            bus.advance(&ticket, ActionStatus::Settled).unwrap_err(),
            StoreError::InvalidTransition {
                from: ActionStatus::Checking,
                to: ActionStatus::Settled
            }
        );
        assert_eq!(bus.status(&key), ActionStatus::Checking);
    }

    #[test]
    fn test_reset_supersedes_ticket() {
        let bus = StatusBus::new();
        let key = key(ActionKind::Unstake);

        let ticket = bus.begin(&key).unwrap();
        assert!(bus.is_current(&ticket));
        bus.reset(&key);
        assert!(!bus.is_current(&ticket));
        assert_eq!(bus.status(&key), ActionStatus::Idle);
        assert_eq!(
            bus.advance(&ticket, ActionStatus::Submitted).unwrap_err(),
            StoreError::Superseded(key.clone())
        );

        // A new run gets a fresh ticket; the stale one stays dead.
        let fresh = bus.begin(&key).unwrap();
        assert!(bus.advance(&ticket, ActionStatus::Submitted).is_err());
        assert!(bus.advance(&fresh, ActionStatus::Submitted).is_ok());
    }

    #[test]
    fn test_reset_all() {
        let bus = StatusBus::new();
        let stake = key(ActionKind::Stake);
        let claim = key(ActionKind::Claim);
        let stake_ticket = bus.begin(&stake).unwrap();
        let claim_ticket = bus.begin(&claim).unwrap();

        bus.reset_all();

        assert_eq!(bus.status(&stake), ActionStatus::Idle);
        assert_eq!(bus.status(&claim), ActionStatus::Idle);
        assert!(bus.advance(&stake_ticket, ActionStatus::Submitted).is_err());
        assert!(bus.advance(&claim_ticket, ActionStatus::Submitted).is_err());
    }

    #[test]
    fn test_dropped_subscription_receives_nothing() {
        let bus = StatusBus::new();
        let key = key(ActionKind::Stake);
        let subscription = bus.subscribe(&key);
        assert_eq!(bus.subscribers(&key), 1);

        drop(subscription);
        assert_eq!(bus.subscribers(&key), 0);

        let ticket = bus.begin(&key).unwrap();
        bus.advance(&ticket, ActionStatus::Submitted).unwrap();
    }

    #[test]
    fn test_last_unsubscribe_clears_terminal() {
        let bus = StatusBus::new();
        let key = key(ActionKind::Vote);
        let first = bus.subscribe(&key);
        let second = bus.subscribe(&key);

        let ticket = bus.begin(&key).unwrap();
        bus.fail(&ticket, "no voting power").unwrap();

        drop(first);
        assert!(bus.status(&key).is_terminal());
        drop(second);
        assert_eq!(bus.status(&key), ActionStatus::Idle);
    }

    #[test]
    fn test_keys_are_independent() {
        let bus = StatusBus::new();
        let stake = key(ActionKind::Stake);
        let claim = key(ActionKind::Claim);

        let _stake = bus.begin(&stake).unwrap();
        assert!(bus.begin(&claim).is_ok());
        assert!(bus.begin(&ActionKey::new("contract-2", ActionKind::Stake)).is_ok());
    }

    #[test]
    fn test_subscribe_all() {
        let bus = StatusBus::new();
        let mut updates = bus.subscribe_all();
        let key = key(ActionKind::Stake);

        let ticket = bus.begin(&key).unwrap();
        bus.fail(&ticket, "denied").unwrap();

        let first = updates.try_recv().unwrap();
        assert_eq!(first.key, key);
        assert_eq!(first.status, ActionStatus::Checking);
        assert_eq!(
            updates.try_recv().unwrap().status,
            ActionStatus::Failed("denied".to_string())
        );
    }

    #[test]
    fn test_unobserved_terminal_statuses_are_bounded() {
        let bus = StatusBus::with_retention(2);
        let watched = ActionKey::new("watched", ActionKind::Stake);
        let _subscription = bus.subscribe(&watched);
        let ticket = bus.begin(&watched).unwrap();
        bus.fail(&ticket, "denied").unwrap();

        for id in ["c1", "c2", "c3"] {
            let ticket = bus.begin(&ActionKey::new(id, ActionKind::Stake)).unwrap();
            bus.fail(&ticket, "denied").unwrap();
        }

        // Oldest unobserved entry went first; the subscribed one stays.
        assert_eq!(bus.status(&ActionKey::new("c1", ActionKind::Stake)), ActionStatus::Idle);
        assert!(bus.status(&ActionKey::new("c2", ActionKind::Stake)).is_terminal());
        assert!(bus.status(&ActionKey::new("c3", ActionKind::Stake)).is_terminal());
        assert!(bus.status(&watched).is_terminal());
        assert_eq!(lock(&bus.inner).entries.len(), 3);

        // In-flight entries are never evicted.
        let running = ActionKey::new("c4", ActionKind::Stake);
        let _ticket = bus.begin(&running).unwrap();
        let ticket = bus.begin(&ActionKey::new("c5", ActionKind::Stake)).unwrap();
        bus.fail(&ticket, "denied").unwrap();
        assert_eq!(bus.status(&running), ActionStatus::Checking);
    }
}
