/// Single-worker dispatch queue in front of the actuator.
///
/// Architecture:
///
/// ```text
///   DispatchQueue::submit(job) ──mpsc──▶ worker task (exactly one)
///         │                                  │
///         └── DispatchHandle ◀──oneshot──────┴── spawn_blocking(actuator.perform)
/// ```
///
/// The actuator drives one shared browser window, so jobs run strictly one at
/// a time in submission order. The next job is dequeued only after the
/// previous `perform` call has returned.
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actuator::Actuator;
use crate::model::DispatchJob;

const QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch queue is closed")]
    Closed,
    #[error("dispatch worker dropped the job")]
    Dropped,
}

struct PendingJob {
    job: DispatchJob,
    reply: oneshot::Sender<String>,
}

/// Completion handle for one submitted job.
pub struct DispatchHandle {
    pub job: DispatchJob,
    reply: oneshot::Receiver<String>,
}

impl DispatchHandle {
    /// Resolves with the actuator's result string once it returns.
    pub async fn wait(self) -> Result<String, DispatchError> {
        self.reply.await.map_err(|_| DispatchError::Dropped)
    }

    /// Run `f` once, after the actuator returns (or the job is lost).
    pub fn on_complete<F, Fut>(self, f: F) -> JoinHandle<()>
    where
        F: FnOnce(DispatchJob, Result<String, DispatchError>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let job = self.job.clone();
            let outcome = self.wait().await;
            f(job, outcome).await;
        })
    }
}

pub struct DispatchQueue {
    tx: Option<mpsc::Sender<PendingJob>>,
    worker: JoinHandle<()>,
    pending: Arc<AtomicUsize>,
}

impl DispatchQueue {
    pub fn spawn(actuator: Arc<dyn Actuator>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(rx, actuator, Arc::clone(&pending)));
        Self {
            tx: Some(tx),
            worker,
            pending,
        }
    }

    /// Queue a job behind everything already submitted.
    pub async fn submit(&self, job: DispatchJob) -> Result<DispatchHandle, DispatchError> {
        let tx = self.tx.as_ref().ok_or(DispatchError::Closed)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        let ahead = self.pending.fetch_add(1, Ordering::SeqCst);
        if ahead > 0 {
            info!("[dispatch] {} queued behind {} job(s)", job.video_id, ahead);
        }
        let sent = tx
            .send(PendingJob {
                job: job.clone(),
                reply: reply_tx,
            })
            .await;
        if sent.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::Closed);
        }

        Ok(DispatchHandle {
            job,
            reply: reply_rx,
        })
    }

    /// Jobs submitted but not yet finished, the running one included.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs. Already queued ones still run.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Wait for the worker to drain the queue. Only returns once the queue
    /// has been closed.
    pub async fn join(self) {
        if let Err(e) = self.worker.await {
            warn!("[dispatch] worker ended abnormally: {}", e);
        }
    }

    pub async fn shutdown(mut self) {
        self.close();
        self.join().await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<PendingJob>,
    actuator: Arc<dyn Actuator>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(PendingJob { job, reply }) = rx.recv().await {
        info!("[dispatch] {} start (channel {})", job.video_id, job.channel_id);
        let started = Instant::now();

        let actuator = Arc::clone(&actuator);
        let video_id = job.video_id.clone();
        let message = job.message.clone();
        let result = tokio::task::spawn_blocking(move || actuator.perform(&video_id, &message))
            .await
            .unwrap_or_else(|e| format!("actuator panicked: {}", e));

        info!(
            "[dispatch] {} done in {:.1}s: {}",
            job.video_id,
            started.elapsed().as_secs_f64(),
            result
        );
        pending.fetch_sub(1, Ordering::SeqCst);
        if reply.send(result).is_err() {
            warn!("[dispatch] {} finished but nobody was waiting", job.video_id);
        }
    }
    info!("[dispatch] queue closed, worker exiting");
}
