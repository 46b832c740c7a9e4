//! Periodic full-wipe task.

use crate::cache::GenericEntityCache;
use parking_lot::{Condvar, Mutex};
use portalsync_store::{EntityStore, NamedEntity};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default interval between full wipes.
pub const DEFAULT_WIPE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Background task that wipes a cache on a fixed schedule.
///
/// The wipe races benignly with concurrent cache access: an evicted entry
/// is reloaded on the next miss. The task stops when it is dropped, when
/// [`WipeTask::stop`] is called, or when the cache itself is dropped.
pub struct WipeTask {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl WipeTask {
    /// Starts a wipe task over the given cache.
    pub fn start<E, S>(cache: &Arc<GenericEntityCache<E, S>>, interval: Duration) -> Self
    where
        E: NamedEntity,
        S: EntityStore<E> + 'static,
    {
        let weak = Arc::downgrade(cache);
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = std::thread::spawn(move || loop {
            {
                let (lock, condvar) = &*thread_shutdown;
                let mut stopped = lock.lock();
                if !*stopped {
                    let _ = condvar.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }
            match weak.upgrade() {
                Some(cache) => cache.wipe(),
                None => break,
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stops the task and waits for the thread to exit.
    pub fn stop(mut self) {
        self.signal_and_join();
    }

    fn signal_and_join(&mut self) {
        {
            let (lock, condvar) = &*self.shutdown;
            *lock.lock() = true;
            condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WipeTask {
    fn drop(&mut self) {
        self.signal_and_join();
    }
}
