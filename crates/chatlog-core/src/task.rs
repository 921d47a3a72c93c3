use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Owner of at most one background task (debounce timer, poll loop, push
/// channel). Starting a new task aborts the previous one; dropping the slot
/// aborts whatever is still running.
#[derive(Default)]
pub(crate) struct TaskSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Abort the running task. Returns true if one was still running.
    pub fn abort(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the current task to finish on its own.
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_spawn_replaces_previous_task() {
        let slot = TaskSlot::new();
        let first_done = Arc::new(AtomicBool::new(false));
        let second_done = Arc::new(AtomicBool::new(false));

        let flag = first_done.clone();
        slot.spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });
        let flag = second_done.clone();
        slot.spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!first_done.load(Ordering::SeqCst));
        assert!(second_done.load(Ordering::SeqCst));
        assert!(!slot.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_stops_task() {
        let slot = TaskSlot::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        slot.spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(slot.abort());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!done.load(Ordering::SeqCst));
        assert!(!slot.abort());
    }
}
