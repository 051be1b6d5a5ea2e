use std::collections::HashMap;

use tokio::task::AbortHandle;

use crate::store::PrKey;

pub type TimerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Debounce before the shadow branch follows the head
    Sync,
    /// Countdown statuses published while the sync timer runs
    Countdown,
}

/// Live timer handles per pull request. Never persisted.
#[derive(Debug, Default)]
pub struct TimerTable {
    next_id: TimerId,
    timers: HashMap<(PrKey, TimerKind), (TimerId, AbortHandle)>,
}

impl TimerTable {
    /// Arm a timer, aborting the one it replaces. `spawn` receives the id the task must
    /// present to [`TimerTable::release`]. Returns true when a previous timer was aborted.
    pub fn arm(&mut self, key: PrKey, kind: TimerKind, spawn: impl FnOnce(TimerId) -> AbortHandle) -> bool {
        self.next_id += 1;
        let id = self.next_id;
        let handle = spawn(id);

        match self.timers.insert((key, kind), (id, handle)) {
            Some((_, previous)) => {
                previous.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel(&mut self, key: &PrKey, kind: TimerKind) -> bool {
        match self.timers.remove(&(key.clone(), kind)) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer of a pull request, returning how many were outstanding
    pub fn cancel_all(&mut self, key: &PrKey) -> usize {
        [TimerKind::Sync, TimerKind::Countdown]
            .into_iter()
            .filter(|kind| self.cancel(key, *kind))
            .count()
    }

    /// Called by a timer task once it fires. Returns false if the timer was replaced in the meantime.
    pub fn release(&mut self, key: &PrKey, kind: TimerKind, id: TimerId) -> bool {
        let entry = (key.clone(), kind);
        match self.timers.get(&entry) {
            Some((current, _)) if *current == id => {
                self.timers.remove(&entry);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: &PrKey, kind: TimerKind) -> bool {
        self.timers.contains_key(&(key.clone(), kind))
    }

    pub fn has_outstanding(&self, key: &PrKey) -> bool {
        self.is_armed(key, TimerKind::Sync) || self.is_armed(key, TimerKind::Countdown)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
