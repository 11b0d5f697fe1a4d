/// Poll cycle controller: the loop that turns channel pages into dispatch jobs.
///
/// One cycle:
///
/// ```text
///   registry.load() ──▶ probe × N (≤ probe_workers in flight)
///                          │  mpsc, collected until cycle deadline
///                          ▼
///          ledger has it? ─▶ skip
///          tracker.claim()  ─▶ AlreadySeen / BudgetExhausted ─▶ skip
///                          └─▶ Granted ─▶ DispatchQueue::submit
///                                              └─ on_complete ─▶ ledger.record
/// ```
///
/// Probes that miss the deadline are abandoned: their task runs on to its own
/// HTTP timeout, but the receiver is gone and the result is dropped. They are
/// simply probed again next cycle.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::capture::ScreenCapture;
use crate::config::{Config, PollConfig};
use crate::dispatch::DispatchQueue;
use crate::ledger::CompletionLedger;
use crate::model::{Channel, DispatchJob, LatestVideo, LedgerEntry};
use crate::probe::{FeedProber, ProbeError};
use crate::registry::ChannelRegistry;
use crate::tracker::{Claim, TimeoutPolicy, Tracker};

/// What one cycle did; logged, and handy in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub channels: usize,
    /// Probes that fetched a page (with or without a video id).
    pub fetched: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub dispatched: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub dispatched: u64,
    pub remaining_budget: u32,
}

struct ProbeOutcome {
    channel: Channel,
    timeout: Duration,
    result: Result<Option<LatestVideo>, ProbeError>,
}

pub struct PollController {
    poll: PollConfig,
    registry: ChannelRegistry,
    ledger: CompletionLedger,
    prober: Arc<FeedProber>,
    tracker: Arc<Tracker>,
    queue: DispatchQueue,
    capture: Option<ScreenCapture>,
    stop: CancellationToken,
    /// Ledger writes waiting on in-flight dispatch jobs.
    completions: Vec<JoinHandle<()>>,
}

impl PollController {
    /// Wire up registry, ledger, prober and the dispatch worker. Must be
    /// called inside a tokio runtime.
    pub fn new(
        config: &Config,
        actuator: Arc<dyn Actuator>,
        stop: CancellationToken,
    ) -> anyhow::Result<Self> {
        let capture = config
            .capture
            .enabled
            .then(|| ScreenCapture::new(&config.paths.captures_dir, config.capture.clone()));
        Ok(Self {
            poll: config.poll.clone(),
            registry: ChannelRegistry::new(&config.paths.channel_list),
            ledger: CompletionLedger::open(&config.paths.ledger)?,
            prober: Arc::new(FeedProber::new(&config.probe)?),
            tracker: Arc::new(Tracker::new(
                config.poll.budget,
                config.poll.test_runs,
                TimeoutPolicy::from_config(&config.probe),
            )),
            queue: DispatchQueue::spawn(actuator),
            capture,
            stop,
            completions: Vec::new(),
        })
    }

    pub fn tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.tracker)
    }

    pub fn ledger(&self) -> CompletionLedger {
        self.ledger.clone()
    }

    /// Startup pass: probe every channel once and remember its newest video
    /// without dispatching anything.
    pub async fn initialize(&self) {
        let channels = match self.registry.load() {
            Ok(c) => c,
            Err(e) => {
                error!("[poll] init: cannot read channel list: {:#}", e);
                return;
            }
        };
        info!("[poll] init: probing {} channels", channels.len());

        let total = channels.len();
        let mut rx = self.fan_out(channels);
        let deadline = tokio::time::Instant::now() + self.poll.cycle_deadline();
        let mut received = 0;
        while received < total {
            let outcome = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(o)) => o,
                Ok(None) => break,
                Err(_) => {
                    warn!("[poll] init: {} probes missed the deadline", total - received);
                    break;
                }
            };
            received += 1;
            let id = &outcome.channel.channel_id;
            match outcome.result {
                Ok(Some(video)) => {
                    self.tracker.record_success(id);
                    self.tracker.seed(id, &video.video_id);
                    info!(
                        "[poll] init: {} ({}) at {}",
                        outcome.channel.display_name, id, video.video_id
                    );
                }
                Ok(None) => {
                    self.tracker.record_success(id);
                    warn!("[poll] init: {} has no video id", id);
                }
                Err(e) => {
                    if e.is_transient() {
                        self.tracker.record_failure(id);
                    }
                    error!("[poll] init: {} failed: {}", id, e);
                }
            }
        }
        info!("[poll] init done: {:?}", self.tracker.last_seen_snapshot());
    }

    /// Poll until stopped or out of budget, then drain the dispatch queue.
    pub async fn run(mut self) -> RunSummary {
        let mut cycles = 0u64;
        let mut dispatched = 0u64;

        loop {
            if self.stop.is_cancelled() {
                info!("[poll] stop requested");
                break;
            }
            if self.tracker.budget() == 0 {
                info!("[poll] budget exhausted, no further cycles");
                break;
            }

            cycles += 1;
            let started = Instant::now();
            match self.run_cycle().await {
                Ok(report) => {
                    dispatched += report.dispatched as u64;
                    info!(
                        "[poll] cycle {}: {} channels, {} fetched, {} failed, {} abandoned, {} dispatched, budget {}",
                        cycles,
                        report.channels,
                        report.fetched,
                        report.failed,
                        report.abandoned,
                        report.dispatched,
                        self.tracker.budget()
                    );
                    let rest = self.poll.cycle_length().saturating_sub(started.elapsed());
                    if rest.is_zero() {
                        debug!(
                            "[poll] cycle overran {:?}, starting next immediately",
                            self.poll.cycle_length()
                        );
                    } else {
                        self.pause(rest).await;
                    }
                }
                Err(e) => {
                    error!("[poll] cycle {} failed: {:#}", cycles, e);
                    if let Some(capture) = &self.capture {
                        capture.capture_async("cycle-fault").await;
                    }
                    self.pause(self.poll.error_delay()).await;
                }
            }
        }

        let remaining_budget = self.tracker.budget();
        self.finish().await;
        RunSummary {
            cycles,
            dispatched,
            remaining_budget,
        }
    }

    /// One full cycle: load, fan out, collect until deadline, dispatch.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        self.completions.retain(|h| !h.is_finished());

        let channels = self.registry.load()?;
        let mut report = CycleReport {
            channels: channels.len(),
            ..CycleReport::default()
        };
        debug!("[poll] checking {} channels", channels.len());

        let total = channels.len();
        let mut rx = self.fan_out(channels);
        let deadline = tokio::time::Instant::now() + self.poll.cycle_deadline();
        let mut received = 0;

        while received < total {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(outcome)) => {
                    received += 1;
                    self.handle_outcome(outcome, &mut report).await;
                }
                Ok(None) => {
                    anyhow::bail!(
                        "{} probe task(s) ended without reporting",
                        total - received
                    );
                }
                Err(_) => {
                    report.abandoned = total - received;
                    warn!(
                        "[poll] {} probe(s) still running at the {:?} deadline, dropping their results",
                        report.abandoned,
                        self.poll.cycle_deadline()
                    );
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Stop accepting jobs, let queued ones finish, and wait for their
    /// ledger writes.
    pub async fn finish(self) {
        let pending = self.queue.pending();
        if pending > 0 {
            info!("[poll] waiting for {} dispatch job(s) to finish", pending);
        }
        self.queue.shutdown().await;
        for handle in self.completions {
            if let Err(e) = handle.await {
                error!("[poll] ledger update task failed: {}", e);
            }
        }
    }

    fn fan_out(&self, channels: Vec<Channel>) -> mpsc::Receiver<ProbeOutcome> {
        let permits = Arc::new(Semaphore::new(self.poll.probe_workers.max(1)));
        let (tx, rx) = mpsc::channel(channels.len().max(1));
        let min_probe_time = self.poll.min_probe_time();

        for channel in channels {
            let tx = tx.clone();
            let prober = Arc::clone(&self.prober);
            let permits = Arc::clone(&permits);
            let timeout = self.tracker.timeout_for(&channel.channel_id);
            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let started = Instant::now();
                let result = prober.probe(&channel.channel_id, timeout).await;
                let _ = tx
                    .send(ProbeOutcome {
                        channel,
                        timeout,
                        result,
                    })
                    .await;
                // Hold the slot so a worker starts at most one probe per min_probe_time.
                let rest = min_probe_time.saturating_sub(started.elapsed());
                if !rest.is_zero() {
                    tokio::time::sleep(rest).await;
                }
            });
        }
        rx
    }

    async fn handle_outcome(&mut self, outcome: ProbeOutcome, report: &mut CycleReport) {
        let ProbeOutcome {
            channel,
            timeout,
            result,
        } = outcome;
        let id = channel.channel_id.as_str();

        match result {
            Ok(Some(video)) => {
                self.tracker.record_success(id);
                report.fetched += 1;
                if self.consider(&channel, video).await {
                    report.dispatched += 1;
                }
            }
            Ok(None) => {
                self.tracker.record_success(id);
                report.fetched += 1;
            }
            Err(e) if e.is_transient() => {
                report.failed += 1;
                let failures = self.tracker.record_failure(id);
                warn!(
                    "[poll] {} ({}) {} with timeout {:?}; {} consecutive, next timeout {:?}",
                    channel.display_name,
                    id,
                    e,
                    timeout,
                    failures,
                    self.tracker.timeout_for(id)
                );
                // One capture per failure streak, not one per cycle.
                if failures == 1 {
                    if let Some(capture) = &self.capture {
                        let capture = capture.clone();
                        let reason = format!("network-{}", id);
                        tokio::spawn(async move { capture.capture_async(&reason).await });
                    }
                }
            }
            Err(e) => {
                report.failed += 1;
                error!("[poll] {} ({}) page request failed: {}", channel.display_name, id, e);
            }
        }
    }

    /// Decide on a fetched video. Returns true if a job was enqueued.
    async fn consider(&mut self, channel: &Channel, video: LatestVideo) -> bool {
        let id = channel.channel_id.as_str();
        if self.ledger.is_completed(id, &video.video_id).await {
            debug!("[poll] {} {} already handled", id, video.video_id);
            return false;
        }
        if self.stop.is_cancelled() {
            info!("[poll] stop requested, not dispatching {} {}", id, video.video_id);
            return false;
        }

        match self.tracker.claim(id, &video.video_id) {
            Claim::AlreadySeen => false,
            Claim::BudgetExhausted => {
                warn!("[poll] {} new video {} skipped: budget exhausted", id, video.video_id);
                false
            }
            Claim::Granted { budget_left, forced } => {
                info!(
                    "[poll] {} new video {}{} (budget left {})",
                    channel.display_name,
                    video.video_id,
                    if forced { " [test run]" } else { "" },
                    budget_left
                );
                let job = DispatchJob {
                    channel_id: channel.channel_id.clone(),
                    video_id: video.video_id,
                    title: video.title,
                    message: channel.message.clone(),
                };
                self.submit(job).await
            }
        }
    }

    async fn submit(&mut self, job: DispatchJob) -> bool {
        let handle = match self.queue.submit(job.clone()).await {
            Ok(h) => h,
            Err(e) => {
                error!("[poll] could not queue {}: {}", job.video_id, e);
                return false;
            }
        };

        let ledger = self.ledger.clone();
        let completion = handle.on_complete(move |job, outcome| async move {
            let result = match outcome {
                Ok(r) => r,
                Err(e) => {
                    error!("[poll] {} never reached the actuator: {}", job.video_id, e);
                    return;
                }
            };
            let entry = LedgerEntry::completed_now(&job, result);
            if let Err(e) = ledger.record(&job.channel_id, &job.video_id, entry).await {
                error!("[poll] {} handled but not recorded: {}", job.video_id, e);
            }
        });
        self.completions.push(completion);
        true
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop.cancelled() => {}
        }
    }
}
