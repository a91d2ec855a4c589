use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Default quiescence window for both notification kinds
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Kinds of audio system notifications, each with its own pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    DeviceListChanged,
    DefaultDeviceChanged,
}

/// Trailing-edge debouncer with one pending task per notification kind.
///
/// Scheduling aborts whatever is still pending for the same kind, so a burst
/// of notifications results in a single run after the burst goes quiet.
/// Notifications can arrive on threads the runtime does not own, so tasks are
/// spawned through a captured runtime handle. The task itself runs on the
/// blocking pool.
pub struct Debouncer {
    runtime: Handle,
    pending: Mutex<HashMap<NotificationKind, JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Run `task` once `delay` has passed without another call for `kind`
    pub fn schedule<T>(&self, kind: NotificationKind, delay: Duration, task: T)
    where
        T: FnOnce() + Send + 'static,
    {
        let mut pending = self.lock_pending();
        if let Some(previous) = pending.remove(&kind) {
            previous.abort();
            trace!("Cancelled pending {:?} task", kind);
        }

        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Handlers lock engine state and call into the audio system
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                warn!("Debounced {:?} task failed: {}", kind, e);
            }
        });
        pending.insert(kind, handle);
        trace!("Scheduled {:?} task in {:?}", kind, delay);
    }

    /// Whether a task for `kind` is scheduled and has not finished
    pub fn is_pending(&self, kind: NotificationKind) -> bool {
        self.lock_pending()
            .get(&kind)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort every pending task
    pub fn cancel_all(&self) {
        for (kind, handle) in self.lock_pending().drain() {
            handle.abort();
            trace!("Cancelled pending {:?} task", kind);
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<NotificationKind, JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
