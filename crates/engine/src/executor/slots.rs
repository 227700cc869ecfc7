//! Execution slots with a live-adjustable limit
//!
//! A slot is granted only while `active < target` and the gate is not paused.
//! Lowering the target never revokes a granted slot: the active count drains
//! down to the new target as holders drop their slots.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct GateState {
    active: usize,
    target: usize,
    paused: bool,
}

/// Counting gate bounding the number of concurrently running workers
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use multirun_engine::executor::SlotGate;
///
/// let gate = Arc::new(SlotGate::new(2));
/// let first = gate.try_acquire().unwrap();
/// let _second = gate.try_acquire().unwrap();
/// assert!(gate.try_acquire().is_none());
///
/// drop(first);
/// assert_eq!(gate.available_slots(), 1);
/// ```
#[derive(Debug)]
pub struct SlotGate {
    state: Mutex<GateState>,
    changed: Notify,
}

/// A granted slot; dropping it releases the slot back to the gate
#[derive(Debug)]
#[must_use = "dropping a slot releases it immediately"]
pub struct Slot {
    gate: Arc<SlotGate>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl SlotGate {
    /// Create a gate with the given slot limit
    pub fn new(target: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                target,
                ..Default::default()
            }),
            changed: Notify::new(),
        }
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(self: &Arc<Self>) -> Option<Slot> {
        let mut state = self.state.lock();
        if state.paused || state.active >= state.target {
            return None;
        }
        state.active += 1;
        Some(Slot {
            gate: Arc::clone(self),
        })
    }

    /// Wait for a slot
    ///
    /// Returns `None` when `interrupt` fires before a slot became free.
    pub async fn acquire(self: &Arc<Self>, interrupt: &CancellationToken) -> Option<Slot> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Registered before the check so a release racing with it is not lost
            notified.as_mut().enable();

            if interrupt.is_cancelled() {
                return None;
            }
            if let Some(slot) = self.try_acquire() {
                return Some(slot);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = interrupt.cancelled() => return None,
            }
        }
    }

    /// Wait until no slot is held
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().active == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Change the slot limit
    ///
    /// Raising it wakes waiters immediately; lowering it only affects future acquisitions.
    pub fn set_target(&self, target: usize) {
        self.state.lock().target = target;
        self.changed.notify_waiters();
    }

    /// Stop granting slots; held slots are unaffected
    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    /// Grant slots again
    pub fn resume(&self) {
        self.state.lock().paused = false;
        self.changed.notify_waiters();
    }

    /// Number of slots currently held
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Current slot limit
    pub fn target(&self) -> usize {
        self.state.lock().target
    }

    /// Whether the gate is paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Slots that could be granted right now
    pub fn available_slots(&self) -> usize {
        let state = self.state.lock();
        if state.paused {
            return 0;
        }
        state.target.saturating_sub(state.active)
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }
}
