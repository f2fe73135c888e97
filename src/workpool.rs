use threadpool::ThreadPool;

/// Dispatches status/publish/ack callbacks off the event-loop thread (§5):
/// a slow or blocking callback must never stall packet processing or the
/// keep-alive ping. Backed by a small, bounded worker pool rather than
/// spawning a thread per callback.
pub struct Workpool {
    pool: ThreadPool,
}

impl Workpool {
    pub fn new(threads: usize) -> Self {
        Workpool {
            pool: ThreadPool::new(threads.max(1)),
        }
    }

    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        self.pool.execute(job);
    }

    /// Blocks until every queued callback has run; used by `Drop` so a
    /// controller teardown doesn't race a still-running status callback.
    pub fn join(&self) {
        self.pool.join();
    }
}

impl Default for Workpool {
    fn default() -> Self {
        Self::new(4)
    }
}
