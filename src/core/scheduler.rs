use crate::types::WaterfallResult;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// Owns the runtime that delayed tasks run on
pub struct Scheduler {
    runtime: Runtime,
}

impl Scheduler {
    pub fn new() -> WaterfallResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sonarfall-scheduler")
            .enable_time()
            .build()?;
        Ok(Self { runtime })
    }

    /// A slot where each newly scheduled task replaces the pending one
    pub fn debounced(&self, delay: Duration) -> Debounced {
        Debounced {
            handle: self.runtime.handle().clone(),
            delay,
            pending: Mutex::new(None),
        }
    }
}

/// Cancelable delayed task slot
pub struct Debounced {
    handle: Handle,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debounced {
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the delay unless superseded or cancelled first
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = self.delay;
        let next = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.replace(next) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }
}

impl Drop for Debounced {
    fn drop(&mut self) {
        self.cancel();
    }
}
