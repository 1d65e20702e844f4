//! Id-to-process map shared by every pool operation.
//!
//! All reads and writes go through one mutex. Admission runs the capacity
//! check, the launch and the insert inside a single critical section, so
//! concurrent spawns can never jointly exceed the cap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::handle::ManagedProcess;
use crate::error::{PoolError, Result};

#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<String, Arc<ManagedProcess>>,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    slots: Mutex<Slots>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Critical sections never leave the map half-updated.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check capacity, run `launch`, and register its process atomically.
    ///
    /// Nothing is launched when the pool is closed, full, or already holds `id`.
    pub(crate) fn admit<F>(&self, id: &str, max: usize, launch: F) -> Result<Arc<ManagedProcess>>
    where
        F: FnOnce() -> Result<ManagedProcess>,
    {
        let mut slots = self.lock();
        if slots.closed {
            return Err(PoolError::Closed);
        }
        let current = slots.entries.len();
        if current >= max {
            return Err(PoolError::Capacity { max, current });
        }
        if slots.entries.contains_key(id) {
            return Err(PoolError::AlreadyExists { id: id.to_string() });
        }

        let process = Arc::new(launch()?);
        slots.entries.insert(id.to_string(), process.clone());
        Ok(process)
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<ManagedProcess>> {
        self.lock().entries.get(id).cloned()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<ManagedProcess>> {
        self.lock().entries.values().cloned().collect()
    }

    /// Remove `id`, whichever process holds it.
    pub(crate) fn remove(&self, id: &str) -> Option<Arc<ManagedProcess>> {
        self.lock().entries.remove(id)
    }

    /// Remove `id` only if it still belongs to the process with `serial`.
    ///
    /// Protects a reused id from a stale exit notification.
    pub(crate) fn remove_if_current(&self, id: &str, serial: u64) -> bool {
        let mut slots = self.lock();
        if slots.entries.get(id).is_some_and(|p| p.serial() == serial) {
            slots.entries.remove(id);
            true
        } else {
            false
        }
    }

    /// Remove and return every entry.
    pub(crate) fn drain(&self) -> Vec<Arc<ManagedProcess>> {
        self.lock().entries.drain().map(|(_, p)| p).collect()
    }

    /// Refuse further admissions and remove every entry.
    pub(crate) fn close(&self) -> Vec<Arc<ManagedProcess>> {
        let mut slots = self.lock();
        slots.closed = true;
        slots.entries.drain().map(|(_, p)| p).collect()
    }
}
