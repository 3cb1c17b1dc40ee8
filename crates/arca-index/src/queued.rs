use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use arca_model::{ModelEvent, ModelObserver, ObserverResult};

/// Runs another observer on a background worker.
///
/// `notify` only enqueues, so the model service is not held up by index
/// latency. Events are applied in the order they were emitted. On
/// [`shutdown`](Self::shutdown) (or drop) the queue is drained before the
/// worker exits.
pub struct QueuedObserver {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<ModelEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl QueuedObserver {
    pub fn new(inner: Arc<dyn ModelObserver>) -> Self {
        let name = format!("queued:{}", inner.name());
        let (sender, mut receiver) = mpsc::unbounded_channel::<ModelEvent>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = pending.clone();
        let worker = std::thread::spawn(move || {
            while let Some(event) = receiver.blocking_recv() {
                match catch_unwind(AssertUnwindSafe(|| inner.notify(&event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(observer = inner.name(), event = %event, error = %e, "queued observer failed");
                    }
                    Err(payload) => {
                        error!(
                            observer = inner.name(),
                            event = %event,
                            panic = panic_message(payload.as_ref()),
                            "queued observer panicked"
                        );
                    }
                }
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }
            debug!(observer = inner.name(), "queue drained; worker stopped");
        });

        Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            pending,
        }
    }

    /// Events accepted but not yet applied.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Block until every accepted event has been applied or `timeout`
    /// elapses. Returns whether the queue is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    /// Stop accepting events, apply everything queued, and join the worker.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().expect("lock poisoned").take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let worker = self.worker.lock().expect("lock poisoned").take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!(observer = %self.name, "queued observer worker panicked");
            }
        }
        info!(observer = %self.name, "queued observer shut down");
    }
}

impl ModelObserver for QueuedObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, event: &ModelEvent) -> ObserverResult {
        let sender = self.sender.lock().expect("lock poisoned");
        let Some(sender) = sender.as_ref() else {
            return Err(format!("{} is shut down", self.name).into());
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(event.clone()).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(format!("{} worker has stopped", self.name).into());
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

impl Drop for QueuedObserver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for QueuedObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedObserver")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}
