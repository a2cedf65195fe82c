//! The single-logical-owner thread abstraction an [`Interface`](crate::Interface)
//! runs all of its state-machine transitions on.
//!
//! Grounded in rustradio's two `GraphRunner` implementations: `Graph` runs
//! everything on the caller's thread, `MTGraph` spawns one named worker per
//! block and joins it through a cancellation signal. An interface only ever
//! needs one worker -- not one per block -- so this collapses `MTGraph`'s
//! shape to a single background thread draining a task queue, with the
//! inline variant standing in for `Graph`'s single-threaded walk.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;

use openlcb_core::net_debug;

/// A unit of work submitted to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks such that every task submitted to the same executor instance
/// observes a consistent single-threaded view of whatever state they close
/// over -- the concurrency model's single-logical-owner-thread requirement.
pub trait Executor: Send + Sync {
    /// Enqueue `task` for execution; does not block on the task completing.
    fn submit(&self, task: Task);

    /// Enqueue `task` and block the caller until it has run to completion.
    fn run_and_wait(&self, task: Task);

    /// Stop accepting work and wait for anything already enqueued to drain.
    fn dispose(&self);
}

/// Runs every task on the caller's thread, immediately. Used by tests that
/// want dispatch to be deterministic and synchronous.
#[derive(Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, task: Task) {
        task();
    }

    fn run_and_wait(&self, task: Task) {
        task();
    }

    fn dispose(&self) {}
}

enum Job {
    Run(Task),
    RunAndSignal(Task, Sender<()>),
}

/// One named background thread draining an unbounded queue of tasks in
/// submission order.
pub struct ThreadPoolExecutor {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadPoolExecutor {
    /// Spawn the worker thread, named `name` for diagnostics (visible in a
    /// panic backtrace or a thread dump).
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                for job in rx {
                    match job {
                        Job::Run(task) => task(),
                        Job::RunAndSignal(task, done) => {
                            task();
                            let _ = done.send(());
                        }
                    }
                }
            })
            .expect("failed to spawn interface executor thread");

        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl Executor for ThreadPoolExecutor {
    fn submit(&self, task: Task) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(Job::Run(task));
        }
    }

    fn run_and_wait(&self, task: Task) {
        let (done_tx, done_rx) = mpsc::channel();
        let sent = self
            .sender
            .lock()
            .unwrap()
            .as_ref()
            .map(|sender| sender.send(Job::RunAndSignal(task, done_tx)).is_ok())
            .unwrap_or(false);
        if sent {
            let _ = done_rx.recv();
        }
    }

    fn dispose(&self) {
        // Dropping the sender closes the channel; the worker's `for job in
        // rx` loop then exits on its own once the queue drains.
        self.sender.lock().unwrap().take();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            net_debug!("executor: joining worker thread {:?}", worker.thread().name());
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn inline_executor_runs_synchronously() {
        let exec = InlineExecutor;
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        exec.run_and_wait(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_pool_executor_preserves_submission_order() {
        let exec = ThreadPoolExecutor::new("test-exec");
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = order.clone();
            exec.submit(Box::new(move || {
                order.lock().unwrap().push(i);
            }));
        }
        exec.run_and_wait(Box::new(|| {}));
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn dispose_joins_the_worker_and_is_idempotent() {
        let exec = ThreadPoolExecutor::new("test-exec-dispose");
        exec.submit(Box::new(|| {}));
        exec.dispose();
        exec.dispose();
    }
}
