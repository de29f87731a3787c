//! Per-meeting serialization of engine operations.
//!
//! Every read-modify-write of a meeting runs under that meeting's async
//! mutex, so a second request for the same meeting queues instead of
//! interleaving messages; operations on distinct meetings run in parallel.
//! The coordinator also owns each meeting's cancellation token and the chain
//! depth of the currently held guard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct Slot {
    lock: Arc<Mutex<()>>,
    /// Replaced with a fresh token after each stop, so one cancellation does
    /// not poison later turns.
    cancel: Arc<StdMutex<CancellationToken>>,
    depth: Arc<AtomicU32>,
    waiters: Arc<AtomicUsize>,
}

impl Slot {
    fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            cancel: Arc::new(StdMutex::new(CancellationToken::new())),
            depth: Arc::new(AtomicU32::new(0)),
            waiters: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel.lock().expect("cancel mutex poisoned").clone()
    }

    fn cancel_and_reset(&self) {
        let mut guard = self.cancel.lock().expect("cancel mutex poisoned");
        guard.cancel();
        *guard = CancellationToken::new();
    }
}

/// Exclusive access to one meeting for the duration of an operation.
///
/// Dropping the guard releases the lock and resets the chain depth.
pub struct TurnGuard {
    _permit: OwnedMutexGuard<()>,
    cancel: CancellationToken,
    depth: Arc<AtomicU32>,
    waiters: Arc<AtomicUsize>,
}

impl TurnGuard {
    /// Token observed by the adapter call of the current turn. Cancelled by
    /// an explicit stop, meeting end, or meeting deletion.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn chain_depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }

    /// Record one more chained follow-up turn; returns the new depth.
    pub fn bump_chain_depth(&self) -> u32 {
        self.depth.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether another request is queued on this meeting's lock. Chains yield
    /// to explicit requests between hops.
    pub fn has_waiters(&self) -> bool {
        self.waiters.load(Ordering::Acquire) > 0
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.depth.store(0, Ordering::Release);
    }
}

#[derive(Default)]
pub struct TurnCoordinator {
    slots: RwLock<HashMap<String, Slot>>,
}

impl TurnCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, meeting_id: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(meeting_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(meeting_id.to_string())
            .or_insert_with(Slot::new)
            .clone()
    }

    /// Wait for exclusive access to `meeting_id`.
    pub async fn acquire(&self, meeting_id: &str) -> TurnGuard {
        let slot = self.slot(meeting_id).await;
        slot.waiters.fetch_add(1, Ordering::AcqRel);
        let permit = slot.lock.clone().lock_owned().await;
        slot.waiters.fetch_sub(1, Ordering::AcqRel);
        TurnGuard {
            _permit: permit,
            cancel: slot.current_token().child_token(),
            depth: slot.depth.clone(),
            waiters: slot.waiters.clone(),
        }
    }

    /// Cancel whatever is in flight for this meeting (user stop, meeting
    /// ended). Later turns get a fresh token.
    pub async fn stop(&self, meeting_id: &str) {
        if let Some(slot) = self.slots.read().await.get(meeting_id) {
            slot.cancel_and_reset();
        }
    }

    /// Cancel in-flight work and forget the meeting entirely (deletion).
    pub async fn remove(&self, meeting_id: &str) {
        if let Some(slot) = self.slots.write().await.remove(meeting_id) {
            slot.cancel_and_reset();
        }
    }
}
