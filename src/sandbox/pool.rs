//! Bounded pool of isolation-context slots.
//!
//! The pool caps how many contexts (and so how much guest memory) exist on
//! the host at once. A slot is a token in a bounded channel; holding a
//! [`SlotGuard`] means holding the token, and dropping the guard puts it back
//! whatever the exit path.

use crate::config::types::{GradeError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

#[derive(Debug)]
struct Slot(usize);

#[derive(Clone)]
pub struct SlotPool {
    capacity: usize,
    release: Sender<Slot>,
    acquire: Receiver<Slot>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(GradeError::Config(
                "slot pool capacity must be at least 1".to_string(),
            ));
        }
        let (release, acquire) = bounded(capacity);
        for index in 0..capacity {
            release
                .send(Slot(index))
                .map_err(|_| GradeError::Infrastructure("slot pool closed".to_string()))?;
        }
        Ok(SlotPool {
            capacity,
            release,
            acquire,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.acquire.len()
    }

    /// Wait up to `timeout` for a free slot.
    pub fn acquire(&self, timeout: Duration) -> Result<SlotGuard> {
        match self.acquire.recv_timeout(timeout) {
            Ok(slot) => Ok(SlotGuard {
                slot: Some(slot),
                release: self.release.clone(),
            }),
            Err(RecvTimeoutError::Timeout) => Err(GradeError::Infrastructure(format!(
                "no isolation slot free after {} ms",
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(GradeError::Infrastructure("slot pool closed".to_string()))
            }
        }
    }
}

/// Scoped ownership of one slot
#[derive(Debug)]
pub struct SlotGuard {
    slot: Option<Slot>,
    release: Sender<Slot>,
}

impl SlotGuard {
    pub fn index(&self) -> usize {
        self.slot.as_ref().map(|s| s.0).unwrap_or_default()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            // Capacity equals the number of tokens, so this never blocks.
            let _ = self.release.send(slot);
        }
    }
}
