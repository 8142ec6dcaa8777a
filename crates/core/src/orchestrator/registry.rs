//! Process-wide map of running import tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use super::types::RunSignal;

struct RunControl {
    signal: watch::Sender<RunSignal>,
    generation: u64,
}

/// Handle given to a task when it registers.
pub(crate) struct Registration {
    pub generation: u64,
    pub signal: watch::Receiver<RunSignal>,
}

/// Maps run ids to the control channel of the task currently driving them.
///
/// Each registration gets a fresh generation. A task only removes the entry it
/// created, so a task finishing late never drops a newer task's entry.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunControl>>,
    next_generation: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunControl>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register(&self, run_id: &str) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(RunSignal::Continue);
        self.lock().insert(
            run_id.to_string(),
            RunControl {
                signal: tx,
                generation,
            },
        );
        Registration {
            generation,
            signal: rx,
        }
    }

    /// Register `run_id` unless a task already owns it.
    pub(crate) fn try_register(&self, run_id: &str) -> Option<Registration> {
        let mut runs = self.lock();
        if runs.contains_key(run_id) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(RunSignal::Continue);
        runs.insert(
            run_id.to_string(),
            RunControl {
                signal: tx,
                generation,
            },
        );
        Some(Registration {
            generation,
            signal: rx,
        })
    }

    /// Remove the entry if it still belongs to `generation`.
    pub(crate) fn deregister(&self, run_id: &str, generation: u64) -> bool {
        let mut runs = self.lock();
        match runs.get(run_id) {
            Some(control) if control.generation == generation => {
                runs.remove(run_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, run_id: &str) -> bool {
        self.lock().contains_key(run_id)
    }

    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub(crate) fn request_cancel(&self, run_id: &str) -> bool {
        match self.lock().get(run_id) {
            Some(control) => {
                control.signal.send_replace(RunSignal::Cancel);
                true
            }
            None => false,
        }
    }

    /// Ask the task to stop at its next checkpoint. A pending cancel wins.
    pub(crate) fn request_pause(&self, run_id: &str) -> bool {
        match self.lock().get(run_id) {
            Some(control) if *control.signal.borrow() != RunSignal::Cancel => {
                control.signal.send_replace(RunSignal::Pause);
                true
            }
            _ => false,
        }
    }

    /// Take back a pause the task has not acted on yet.
    ///
    /// Returns the signal that was pending, or `None` when no task owns the run.
    /// Only a pending pause is withdrawn; a pending cancel stays in place.
    pub(crate) fn withdraw_pause(&self, run_id: &str) -> Option<RunSignal> {
        let runs = self.lock();
        let control = runs.get(run_id)?;
        let pending = *control.signal.borrow();
        if pending == RunSignal::Pause {
            control.signal.send_replace(RunSignal::Continue);
        }
        Some(pending)
    }

    /// Called by a task that observed a pause: deregisters it unless the pause
    /// was withdrawn in the meantime.
    pub(crate) fn confirm_pause(&self, run_id: &str, generation: u64) -> bool {
        let mut runs = self.lock();
        let confirmed = matches!(
            runs.get(run_id),
            Some(control)
                if control.generation == generation
                    && *control.signal.borrow() == RunSignal::Pause
        );
        if confirmed {
            runs.remove(run_id);
        }
        confirmed
    }

    /// Pause every registered run. Returns the ids signalled.
    pub(crate) fn pause_all(&self) -> Vec<String> {
        let runs = self.lock();
        let mut ids = Vec::with_capacity(runs.len());
        for (id, control) in runs.iter() {
            if *control.signal.borrow() == RunSignal::Continue {
                control.signal.send_replace(RunSignal::Pause);
                ids.push(id.clone());
            }
        }
        ids
    }
}
