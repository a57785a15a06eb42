//! Single-slot rebuild mailbox between the watcher and the build loop.
//!
//! The watcher task is the only writer and the build loop the only reader.
//! A signal raised while one is already pending is dropped, so a burst of
//! changes during a build results in exactly one rebuild afterwards.

use crate::error::{ArenaError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::debug;

/// A pending request to rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSignal;

/// Capacity-1 coalescing signal with a terminal error state.
#[derive(Debug, Default)]
pub struct RebuildGate {
    pending: AtomicBool,
    terminal: Mutex<Option<String>>,
    notify: Notify,
    coalesced: AtomicU64,
}

impl RebuildGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to raise a rebuild signal without blocking.
    ///
    /// Returns `false` when a signal was already pending; the new one is dropped.
    pub fn signal(&self) -> bool {
        if self.pending.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            self.notify.notify_one();
            true
        } else {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!("Rebuild already pending, coalescing change");
            false
        }
    }

    /// Put the gate in its terminal state. The first reason is kept.
    pub fn fail(&self, reason: impl Into<String>) {
        {
            let mut terminal = self.terminal.lock().unwrap_or_else(|e| e.into_inner());
            if terminal.is_none() {
                *terminal = Some(reason.into());
            }
        }
        self.notify.notify_one();
    }

    /// Whether a signal is waiting to be consumed.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of signals dropped because one was already pending.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    fn terminal_error(&self) -> Option<ArenaError> {
        let terminal = self.terminal.lock().unwrap_or_else(|e| e.into_inner());
        terminal.as_ref().map(|reason| ArenaError::WatchFailed { reason: reason.clone() })
    }

    /// Wait for the next rebuild signal.
    ///
    /// A terminal error takes precedence over a pending signal and is
    /// returned on every call once set.
    pub async fn wait(&self) -> Result<RebuildSignal> {
        loop {
            if let Some(err) = self.terminal_error() {
                return Err(err);
            }
            let claimed = self
                .pending
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if claimed {
                return Ok(RebuildSignal);
            }
            // notify_one stores a permit when nobody is waiting, so a signal
            // raised between the checks above and this await is not lost
            self.notify.notified().await;
        }
    }
}
