//! Wake-up plumbing for blocked flips and passive watchers.
//!
//! [`WaitRegistry`] parks callers per grid position until that card is given
//! up. [`ChangeFeed`] is a level-triggered version counter: watchers wake when
//! it moves past the value they last saw, and bursts of changes coalesce.

use crate::board::Position;
use std::collections::HashMap;
use tokio::sync::{oneshot, watch};

/// Handle identifying one parked caller, used to withdraw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterId(u64);

/// Callers blocked on a card controlled by someone else, keyed by position.
#[derive(Debug, Default)]
pub struct WaitRegistry {
    next_id: u64,
    waiting: HashMap<Position, Vec<(WaiterId, oneshot::Sender<()>)>>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a new waiter on `pos`. The receiver completes on the next wake.
    ///
    /// Waiters on `pos` whose receiver was dropped without being forgotten are
    /// pruned here.
    pub fn register(&mut self, pos: Position) -> (WaiterId, oneshot::Receiver<()>) {
        let id = WaiterId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        let queue = self.waiting.entry(pos).or_default();
        queue.retain(|(_, waiter)| !waiter.is_closed());
        queue.push((id, tx));
        (id, rx)
    }

    /// Wakes every waiter on `pos`. Waiters that already left are skipped.
    pub fn wake_all(&mut self, pos: Position) -> usize {
        let Some(waiters) = self.waiting.remove(&pos) else {
            return 0;
        };

        waiters
            .into_iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(_, tx)| tx.send(()))
            .filter(Result::is_ok)
            .count()
    }

    /// Withdraws a waiter that stopped waiting. Returns false if it was
    /// already woken.
    pub fn forget(&mut self, pos: Position, id: WaiterId) -> bool {
        let Some(waiters) = self.waiting.get_mut(&pos) else {
            return false;
        };

        let before = waiters.len();
        waiters.retain(|(waiter, _)| *waiter != id);
        let removed = waiters.len() != before;

        if waiters.is_empty() {
            self.waiting.remove(&pos);
        }
        removed
    }

    /// Live waiters on `pos`.
    pub fn waiting_on(&self, pos: Position) -> usize {
        self.waiting
            .get(&pos)
            .map_or(0, |queue| queue.iter().filter(|(_, tx)| !tx.is_closed()).count())
    }

    /// Queued entries across all positions, including departed ones not yet
    /// pruned.
    pub fn len(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

/// Board-wide change counter with any number of subscribers.
#[derive(Debug)]
pub struct ChangeFeed {
    version: watch::Sender<u64>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { version }
    }

    /// Advances the counter and wakes current subscribers.
    pub fn publish(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// A watcher that has already seen the current version.
    pub fn subscribe(&self) -> ChangeWatcher {
        let rx = self.version.subscribe();
        let seen = *rx.borrow();
        ChangeWatcher { rx, seen }
    }

    pub fn subscribers(&self) -> usize {
        self.version.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber end of a [`ChangeFeed`].
#[derive(Debug, Clone)]
pub struct ChangeWatcher {
    rx: watch::Receiver<u64>,
    seen: u64,
}

impl ChangeWatcher {
    /// Last version this watcher observed.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Waits until the counter moves past [`seen`](Self::seen) and returns the
    /// new version, or `None` once the feed is gone.
    pub async fn changed(&mut self) -> Option<u64> {
        self.rx.changed().await.ok()?;
        self.seen = *self.rx.borrow_and_update();
        Some(self.seen)
    }
}
