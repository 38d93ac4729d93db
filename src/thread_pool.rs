//! A fixed-size worker pool draining a shared task queue, with a sticky
//! error callback invoked on the first task failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// A unit of work submitted to the pool. Returns `Err(message)` on failure.
pub type Task = Box<dyn FnOnce() -> Result<(), String> + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    accepting: AtomicBool,
}

/// A fixed-size thread pool. Dropping the pool drains any queued tasks
/// without running them, then joins every worker (`await_stop` semantics).
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// `num_threads` is clamped to `[1, available_parallelism]`.
    #[must_use]
    pub fn new<F>(num_threads: usize, on_task_error: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let max = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let num_threads = num_threads.clamp(1, max);

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            accepting: AtomicBool::new(true),
        });
        let on_task_error = Arc::new(on_task_error);

        let workers = (0..num_threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let on_task_error = Arc::clone(&on_task_error);
                std::thread::spawn(move || Self::worker_loop(&shared, on_task_error.as_ref()))
            })
            .collect();

        Self { shared, workers }
    }

    fn worker_loop(shared: &Shared, on_task_error: &(dyn Fn(String) + Send + Sync)) {
        loop {
            let task = {
                let mut queue = shared.queue.lock();
                loop {
                    if let Some(task) = queue.pop_front() {
                        break Some(task);
                    }
                    if !shared.accepting.load(Ordering::Acquire) {
                        break None;
                    }
                    shared.condvar.wait(&mut queue);
                }
            };

            let Some(task) = task else { break };
            if let Err(message) = task() {
                on_task_error(message);
            }
        }
    }

    /// Enqueue a task. Returns `Err` if the pool is no longer accepting work
    /// (after [`Self::await_stop`] has been called).
    pub fn push_job(&self, task: Task) -> Result<(), String> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err("thread pool is no longer accepting jobs".to_string());
        }
        self.shared.queue.lock().push_back(task);
        self.shared.condvar.notify_one();
        Ok(())
    }

    /// Stop accepting new jobs and block until every worker has drained the
    /// queue and exited.
    pub fn await_stop(&mut self) {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shared.queue.lock().clear();
            self.await_stop();
        }
    }
}

/// A countdown latch used to wait for a batch of thread-pool jobs to finish.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl Latch {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new((Mutex::new(count), Condvar::new())),
        }
    }

    pub fn count_down(&self) {
        let (lock, cvar) = &*self.inner;
        let mut count = lock.lock();
        if *count > 0 {
            *count -= 1;
        }
        if *count == 0 {
            cvar.notify_all();
        }
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut count = lock.lock();
        while *count > 0 {
            cvar.wait(&mut count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_all_jobs_and_reports_errors() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = Arc::clone(&errors);
        let mut pool = ThreadPool::new(4, move |msg| errors_clone.lock().push(msg));

        let successes = Arc::new(AtomicUsize::new(0));
        let latch = Latch::new(10);
        for i in 0..10 {
            let successes = Arc::clone(&successes);
            let latch = latch.clone();
            pool.push_job(Box::new(move || {
                latch.count_down();
                if i == 7 {
                    Err("boom".to_string())
                } else {
                    successes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
            .unwrap();
        }
        latch.wait();
        pool.await_stop();

        assert_eq!(successes.load(Ordering::SeqCst), 9);
        assert_eq!(errors.lock().as_slice(), ["boom".to_string()]);
    }

    #[test]
    fn rejects_jobs_after_await_stop() {
        let mut pool = ThreadPool::new(1, |_| {});
        pool.await_stop();
        assert!(pool.push_job(Box::new(|| Ok(()))).is_err());
    }
}
