use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, timeout, Instant};

/// What a queued operation reports back to the worker.
///
/// Rate limiting is a tagged outcome rather than an error message, so the
/// worker can reschedule the task without string matching.
#[derive(Debug)]
pub enum TaskOutcome<T, E> {
    Success(T),
    /// Upstream refused the call because of its rate limit
    RateLimited { retry_after: Option<Duration> },
    Failure(E),
}

/// Errors delivered to the caller of [`RequestQueue::enqueue`]
#[derive(Debug, Error)]
pub enum QueueError<E> {
    /// The operation itself failed
    #[error("{0}")]
    Operation(E),

    #[error("Still rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Task timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Request queue worker has stopped")]
    Closed,
}

/// Request queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of calls started within one window
    pub max_calls_per_window: u32,
    /// Length of the rate window
    pub window: Duration,
    /// Fixed pause between successive calls
    pub inter_task_delay: Duration,
    /// How often a rate-limited task is re-submitted before the caller gets an error
    pub max_retries: u32,
    /// Upper bound for a single task, `None` leaves it to the transport
    pub task_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_calls_per_window: 100,
            window: Duration::from_secs(30),
            inter_task_delay: Duration::from_millis(50),
            max_retries: 3,
            task_timeout: Some(Duration::from_secs(15)),
        }
    }
}

impl QueueConfig {
    /// Read queue settings from a JSON object, falling back to defaults per field
    pub fn from_json(config: &serde_json::Value) -> Self {
        let defaults = QueueConfig::default();
        let get_u64 = |name: &str| config.get(name).and_then(|v| v.as_u64());

        QueueConfig {
            max_calls_per_window: get_u64("max_calls_per_window")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_calls_per_window),
            window: get_u64("window_secs")
                .map(Duration::from_secs)
                .unwrap_or(defaults.window),
            inter_task_delay: get_u64("inter_task_delay_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.inter_task_delay),
            max_retries: get_u64("max_retries")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_retries),
            task_timeout: match config.get("task_timeout_secs") {
                Some(v) if v.is_null() => None,
                Some(v) => v.as_u64().filter(|s| *s > 0).map(Duration::from_secs),
                None => defaults.task_timeout,
            },
        }
    }
}

/// Snapshot of the queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Tasks that ran to a success or failure result
    pub executed: u64,
    /// Rate-limited responses seen (each retry counts)
    pub rate_limited: u64,
    /// Tasks that ended with an error of any kind
    pub failed: u64,
    /// Tasks submitted and not yet finished
    pub pending: usize,
}

#[derive(Default)]
struct QueueCounters {
    executed: AtomicU64,
    rate_limited: AtomicU64,
    failed: AtomicU64,
    pending: AtomicUsize,
}

enum JobStatus {
    Done { failed: bool },
    RateLimited(Option<Duration>),
}

enum Rejection {
    RetriesExhausted(u32),
    TimedOut(Duration),
}

/// A type-erased task: runs the wrapped operation and resolves its caller
#[async_trait]
trait Job: Send {
    async fn run(&mut self) -> JobStatus;
    fn reject(self: Box<Self>, rejection: Rejection);
}

struct TypedJob<T, E, F> {
    operation: F,
    reply: Option<oneshot::Sender<Result<T, QueueError<E>>>>,
}

impl<T, E, F> TypedJob<T, E, F> {
    fn resolve(&mut self, result: Result<T, QueueError<E>>) {
        if let Some(reply) = self.reply.take() {
            if reply.send(result).is_err() {
                debug!("Caller no longer waiting for queued task result");
            }
        }
    }
}

#[async_trait]
impl<T, E, F, Fut> Job for TypedJob<T, E, F>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = TaskOutcome<T, E>> + Send + 'static,
{
    async fn run(&mut self) -> JobStatus {
        match (self.operation)().await {
            TaskOutcome::Success(value) => {
                self.resolve(Ok(value));
                JobStatus::Done { failed: false }
            }
            TaskOutcome::Failure(e) => {
                self.resolve(Err(QueueError::Operation(e)));
                JobStatus::Done { failed: true }
            }
            TaskOutcome::RateLimited { retry_after } => JobStatus::RateLimited(retry_after),
        }
    }

    fn reject(mut self: Box<Self>, rejection: Rejection) {
        let error = match rejection {
            Rejection::RetriesExhausted(attempts) => QueueError::RetriesExhausted { attempts },
            Rejection::TimedOut(limit) => QueueError::TimedOut(limit),
        };
        self.resolve(Err(error));
    }
}

struct QueuedTask {
    job: Box<dyn Job>,
    enqueued_at: Instant,
    /// Rate-limited runs so far
    attempts: u32,
}

/// Fixed window call counter, reset wholesale when the window ends
struct RateWindow {
    max_calls: u32,
    duration: Duration,
    window_start: Instant,
    calls_in_window: u32,
    /// Set after an upstream rate-limit response
    resume_at: Option<Instant>,
}

impl RateWindow {
    fn new(max_calls: u32, duration: Duration) -> Self {
        RateWindow {
            max_calls: max_calls.max(1),
            duration,
            window_start: Instant::now(),
            calls_in_window: 0,
            resume_at: None,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.calls_in_window = 0;
    }

    fn pause_for(&mut self, pause: Duration) {
        self.resume_at = Some(Instant::now() + pause);
    }

    /// Wait until one more call may start and count it
    async fn acquire(&mut self) {
        if let Some(resume_at) = self.resume_at.take() {
            if resume_at > Instant::now() {
                debug!("Request queue paused until upstream rate limit clears");
                sleep_until(resume_at).await;
            }
            self.reset(Instant::now());
        }

        let now = Instant::now();
        if now >= self.window_start + self.duration {
            self.reset(now);
        }

        if self.calls_in_window >= self.max_calls {
            let window_end = self.window_start + self.duration;
            debug!(
                "Rate window full ({} calls), waiting {:?}",
                self.calls_in_window,
                window_end.saturating_duration_since(now)
            );
            sleep_until(window_end).await;
            self.reset(Instant::now());
        }

        self.calls_in_window += 1;
    }
}

struct Worker {
    incoming: mpsc::UnboundedReceiver<QueuedTask>,
    pending: VecDeque<QueuedTask>,
    window: RateWindow,
    config: QueueConfig,
    counters: Arc<QueueCounters>,
}

impl Worker {
    fn drain_incoming(&mut self) {
        while let Ok(task) = self.incoming.try_recv() {
            self.pending.push_back(task);
        }
    }

    fn finish(&self, failed: bool) {
        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
        if failed {
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn run(mut self) {
        debug!("Request queue worker started");

        loop {
            if self.pending.is_empty() {
                match self.incoming.recv().await {
                    Some(task) => self.pending.push_back(task),
                    None => break,
                }
            }
            self.drain_incoming();

            let Some(mut task) = self.pending.pop_front() else {
                continue;
            };

            self.window.acquire().await;
            debug!(
                "Running queued task (waited {:?}, attempt {})",
                task.enqueued_at.elapsed(),
                task.attempts + 1
            );

            let status = match self.config.task_timeout {
                Some(limit) => timeout(limit, task.job.run()).await.ok(),
                None => Some(task.job.run().await),
            };

            match status {
                Some(JobStatus::Done { failed }) => {
                    self.counters.executed.fetch_add(1, Ordering::SeqCst);
                    self.finish(failed);
                }
                Some(JobStatus::RateLimited(retry_after)) => {
                    self.counters.rate_limited.fetch_add(1, Ordering::SeqCst);
                    task.attempts += 1;

                    if task.attempts > self.config.max_retries {
                        error!("Task still rate limited after {} attempts, giving up", task.attempts);
                        let attempts = task.attempts;
                        task.job.reject(Rejection::RetriesExhausted(attempts));
                        self.finish(true);
                    } else {
                        let pause = retry_after.map_or(self.config.window, |r| r.max(self.config.window));
                        warn!(
                            "Upstream rate limit hit (attempt {}), re-queueing task and pausing for {:?}",
                            task.attempts, pause
                        );
                        self.window.pause_for(pause);
                        self.drain_incoming();
                        self.pending.push_back(task);
                    }
                }
                None => {
                    let limit = self.config.task_timeout.unwrap_or_default();
                    warn!("Queued task did not finish within {:?}, rejecting it", limit);
                    task.job.reject(Rejection::TimedOut(limit));
                    self.finish(true);
                }
            }

            sleep(self.config.inter_task_delay).await;
        }

        info!("Request queue worker stopped");
    }
}

/// Serializes outbound upstream calls through a single worker task.
///
/// Tasks run one at a time in submission order. At most
/// `max_calls_per_window` calls start per window; the worker sleeps out the
/// rest of the window once the cap is reached. A task whose operation reports
/// [`TaskOutcome::RateLimited`] is put at the back of the queue and the whole
/// queue pauses for at least one window. Retried operations must be safe to
/// repeat.
///
/// Cloning gives another handle to the same worker. The worker stops when
/// every handle is dropped and the queue is empty.
#[derive(Clone)]
pub struct RequestQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    counters: Arc<QueueCounters>,
    config: QueueConfig,
}

impl RequestQueue {
    /// Create a queue and spawn its worker. Must be called inside a tokio runtime.
    pub fn new(config: QueueConfig) -> Self {
        let (sender, incoming) = mpsc::unbounded_channel();
        let counters = Arc::new(QueueCounters::default());

        let worker = Worker {
            incoming,
            pending: VecDeque::new(),
            window: RateWindow::new(config.max_calls_per_window, config.window),
            config: config.clone(),
            counters: counters.clone(),
        };
        tokio::spawn(worker.run());

        info!(
            "Request queue started: {} calls per {:?}, {:?} between calls",
            config.max_calls_per_window, config.window, config.inter_task_delay
        );

        RequestQueue {
            sender,
            counters,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Submit an operation. The task is queued when this is called, not when
    /// the returned future is first polled, so call order is queue order.
    ///
    /// `operation` may be called more than once if upstream rate limits it.
    pub fn enqueue<T, E, F, Fut>(&self, operation: F) -> impl Future<Output = Result<T, QueueError<E>>>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome<T, E>> + Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let task = QueuedTask {
            job: Box::new(TypedJob {
                operation,
                reply: Some(reply),
            }),
            enqueued_at: Instant::now(),
            attempts: 0,
        };

        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        let submitted = match self.sender.send(task) {
            Ok(()) => true,
            Err(_) => {
                error!("Request queue worker is gone, rejecting task");
                self.counters.pending.fetch_sub(1, Ordering::SeqCst);
                false
            }
        };

        async move {
            if !submitted {
                return Err(QueueError::Closed);
            }
            result.await.unwrap_or_else(|_| Err(QueueError::Closed))
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            executed: self.counters.executed.load(Ordering::SeqCst),
            rate_limited: self.counters.rate_limited.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            pending: self.counters.pending.load(Ordering::SeqCst),
        }
    }
}
