//! CommandQueue: per-device FIFO executor that runs one Task at a time to
//! completion (§4.4).

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::errors::TaskValidationError;
use crate::domain::store::DeviceStore;
use crate::domain::task::Task;
use crate::domain::value_objects::DeviceId;

struct Inner {
    tasks: VecDeque<Arc<dyn Task>>,
    stopped: bool,
}

/// One instance per Device. Owns a FIFO of Tasks and a worker task.
/// Ordering guarantee: within a single device, tasks execute strictly in
/// enqueue order; there is no intra-device parallelism (§4.4, §5).
pub struct CommandQueue {
    device_id: DeviceId,
    store: Arc<dyn DeviceStore>,
    inner: Mutex<Inner>,
    notify: tokio::sync::Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    pub fn new(device_id: DeviceId, store: Arc<dyn DeviceStore>) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            store,
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                stopped: false,
            }),
            notify: tokio::sync::Notify::new(),
            worker: Mutex::new(None),
        })
    }

    /// Validate `task` against the device's current state, reject on a
    /// uniqueness conflict with an already-pending task of the same kind,
    /// then append it. Starts the worker if it is not already running.
    pub async fn enqueue_task(self: &Arc<Self>, task: Arc<dyn Task>) -> Result<(), TaskValidationError> {
        let mut inner = self.inner.lock().await;

        if task.unique()
            && inner
                .tasks
                .iter()
                .any(|pending| pending.kind() == task.kind())
        {
            return Err(TaskValidationError::AlreadyQueued(self.device_id));
        }

        task.validate(self.store.as_ref()).await?;
        inner.tasks.push_back(task);
        drop(inner);

        self.ensure_worker_running().await;
        self.notify.notify_one();
        Ok(())
    }

    /// Pending task kinds, for RPC observation (`Commander::get_queue_list`).
    pub async fn pending_kinds(&self) -> Vec<&'static str> {
        self.inner
            .lock()
            .await
            .tasks
            .iter()
            .map(|t| match t.kind() {
                crate::domain::task::TaskKind::Init => "DeviceInitializationTask",
                crate::domain::task::TaskKind::Configure => "DeviceConfigurationTask",
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.tasks.is_empty()
    }

    /// True once the queue is empty and the worker has exited — the signal
    /// the Commander's supervisor sweep uses to reap this queue (§4.5).
    pub async fn is_drained(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.tasks.is_empty() && self.worker.lock().await.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Idempotent: tells the worker to exit once its current queue drains.
    pub async fn stop(&self) {
        self.inner.lock().await.stopped = true;
        self.notify.notify_one();
    }

    async fn ensure_worker_running(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().map(|h| h.is_finished()).unwrap_or(true) {
            let queue = Arc::clone(self);
            *worker = Some(tokio::spawn(async move { queue.run_worker().await }));
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let head = {
                let inner = self.inner.lock().await;
                inner.tasks.front().cloned()
            };

            let Some(task) = head else {
                let stopped = self.inner.lock().await.stopped;
                if stopped {
                    return;
                }
                let _ = tokio::time::timeout(std::time::Duration::from_secs(1), self.notify.notified()).await;
                let inner = self.inner.lock().await;
                if inner.tasks.is_empty() && inner.stopped {
                    return;
                }
                continue;
            };

            let final_state = task.run(self.store.as_ref()).await;
            task.post(self.store.as_ref(), self.device_id, final_state).await;

            let mut inner = self.inner.lock().await;
            inner.tasks.pop_front();
        }
    }
}
