use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Bounded MPMC queue for background jobs. When full, the oldest job is
/// dropped and counted; the caller is never blocked.
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, job: T) {
        let mut queue = self.inner.lock();
        if queue.len() == self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(job);
        drop(queue);
        self.available.notify_one();
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut queue = self.inner.lock();
        if let Some(job) = queue.pop_front() {
            return Some(job);
        }
        self.available.wait_for(&mut queue, timeout);
        queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Named background threads sharing one shutdown flag. Shutdown drains
/// within a grace window; stragglers are detached, never joined forever.
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Spawn a worker draining a queue. The handler runs one job at a time;
    /// on shutdown the queue is drained before the thread exits.
    pub fn spawn_queue_worker<T, F>(
        &self,
        name: &str,
        queue: Arc<BoundedQueue<T>>,
        mut handler: F,
    ) -> std::io::Result<()>
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    match queue.pop_timeout(Duration::from_millis(250)) {
                        Some(job) => handler(job),
                        None => {
                            if shutdown.load(Ordering::Relaxed) {
                                break;
                            }
                        }
                    }
                    if shutdown.load(Ordering::Relaxed) && queue.is_empty() {
                        break;
                    }
                }
            })?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Spawn a periodic worker invoking `tick` every `interval`.
    pub fn spawn_periodic<F>(
        &self,
        name: &str,
        interval: Duration,
        mut tick: F,
    ) -> std::io::Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    tick();
                    // Sleep in slices so shutdown is observed promptly.
                    let deadline = Instant::now() + interval;
                    while Instant::now() < deadline {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(50).min(interval));
                    }
                }
            })?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Broadcast shutdown and wait up to `grace` for workers to drain.
    pub fn shutdown(&self, grace: Duration) {
        self.shutdown.store(true, Ordering::Relaxed);
        let deadline = Instant::now() + grace;
        let mut handles = self.handles.lock();

        while !handles.is_empty() && Instant::now() < deadline {
            handles.retain(|handle| !handle.is_finished());
            if handles.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        for handle in handles.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(thread = ?handle.thread().name(), "worker did not drain in grace window");
            }
        }
        debug!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let queue = BoundedQueue::new(3);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped_count(), 2);
        // 0 and 1 were dropped.
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Some(2));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Some(3));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Some(4));
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(2);
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_worker_drains_queue_before_shutdown() {
        let pool = WorkerPool::new();
        let queue = Arc::new(BoundedQueue::new(100));
        let processed = Arc::new(AtomicUsize::new(0));

        let seen = processed.clone();
        pool.spawn_queue_worker("test-worker", queue.clone(), move |_job: u32| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        for i in 0..50 {
            queue.push(i);
        }
        pool.shutdown(Duration::from_secs(2));
        assert_eq!(processed.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_periodic_worker_ticks_and_stops() {
        let pool = WorkerPool::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        pool.spawn_periodic("ticker", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(80));
        pool.shutdown(Duration::from_secs(1));
        let count = ticks.load(Ordering::SeqCst);
        assert!(count >= 2, "expected several ticks, got {}", count);
    }
}
