//! Single background thread consuming a task queue.
use crate::error::{Result, StoreError};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

enum Queue<T> {
    Bounded(SyncSender<T>),
    Unbounded(Sender<T>),
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        match self {
            Queue::Bounded(tx) => Queue::Bounded(tx.clone()),
            Queue::Unbounded(tx) => Queue::Unbounded(tx.clone()),
        }
    }
}

impl<T> Queue<T> {
    fn send(&self, task: T) -> std::result::Result<(), mpsc::SendError<T>> {
        match self {
            Queue::Bounded(tx) => tx.send(task),
            Queue::Unbounded(tx) => tx.send(task),
        }
    }
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn done(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Tasks run one at a time, in submission order.
///
/// With a non-zero `capacity`, `push` blocks while that many tasks are
/// queued. After [`shutdown`](Worker::shutdown) no task is accepted; those
/// already queued still run.
pub(crate) struct Worker<T: Send + 'static> {
    name: String,
    queue: Mutex<Option<Queue<T>>>,
    pending: Arc<Pending>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn<F>(name: &str, capacity: usize, mut handler: F) -> io::Result<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        let (queue, rx): (Queue<T>, Receiver<T>) = if capacity > 0 {
            let (tx, rx) = mpsc::sync_channel(capacity);
            (Queue::Bounded(tx), rx)
        } else {
            let (tx, rx) = mpsc::channel();
            (Queue::Unbounded(tx), rx)
        };

        let pending = Arc::new(Pending::default());
        let counter = Arc::clone(&pending);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            for task in rx {
                handler(task);
                counter.done();
            }
        })?;
        debug!("Started worker {}", name);

        Ok(Self {
            name: name.to_string(),
            queue: Mutex::new(Some(queue)),
            pending,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn push(&self, task: T) -> Result<()> {
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::ShuttingDown)?;

        *self.pending.lock() += 1;
        if queue.send(task).is_err() {
            self.pending.done();
            return Err(StoreError::ShuttingDown);
        }
        Ok(())
    }

    /// Blocks until every queued task has run.
    pub fn wait(&self) {
        let mut count = self.pending.lock();
        while *count > 0 {
            count = self
                .pending
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_running(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn shutdown(&self) {
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(queue);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Worker {} panicked", self.name);
            }
            debug!("Stopped worker {}", self.name);
        }
    }
}

impl<T: Send + 'static> Drop for Worker<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
