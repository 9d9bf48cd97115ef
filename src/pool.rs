use super::{
    context::ContextRegistry,
    errors::{ConfigError, JobError, SpawnError},
    handle::{self, Job, WorkerHandle},
    model::{ContextTag, PoolMetrics},
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::{
    collections::HashMap,
    fmt::Display,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

pub const ENV_MAX_QSIZE: &str = "DISPATCH_POOL_MAX_QSIZE";
pub const ENV_TIMEOUT_MS: &str = "DISPATCH_POOL_TIMEOUT_MS";
pub const ENV_MAX_THREADS: &str = "DISPATCH_POOL_MAX_THREADS";

/// Pool configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Queue depth above which another worker is spawned.
    pub max_qsize: usize,
    /// How long an idle worker waits for a job before exiting.
    pub timeout: Duration,
    /// Hard cap on live workers.
    pub max_threads: usize,
    /// Worker thread name prefix.
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_qsize: 10,
            timeout: Duration::from_secs(1),
            max_threads: 20,
            thread_name: "dispatch-worker".to_string(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            max_qsize: 0,
            max_threads: num_cpus::get(),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        Self {
            max_threads: num_cpus::get() * 2,
            ..Default::default()
        }
    }

    /// Defaults overlaid with `DISPATCH_POOL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var::<usize, _>(&lookup, ENV_MAX_QSIZE)? {
            config.max_qsize = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_TIMEOUT_MS)? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, ENV_MAX_THREADS)? {
            config.max_threads = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

/// Receives job failures, called on the worker thread that caught them.
/// Must not panic.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, worker: &str, err: &JobError);
}

/// Default reporter: logs at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, worker: &str, err: &JobError) {
        tracing::error!(worker, error = %err, "job failed in thread pool");
    }
}

pub type ThreadPool = Arc<ThreadPoolInner>;

/// Self-sizing pool of blocking worker threads.
///
/// Grows when the queue backs up (up to `max_threads`) and shrinks back to
/// zero once workers sit idle for `timeout`. The queue itself is unbounded,
/// so submitting never blocks.
pub struct ThreadPoolInner {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    workers: Mutex<HashMap<usize, WorkerHandle>>,
    all_workers_exited: Condvar,
    next_worker_id: AtomicUsize,
    total_spawned: AtomicUsize,
    peak_workers: AtomicUsize,
    completed_jobs: AtomicUsize,
    failed_jobs: AtomicUsize,
    reporter: Arc<dyn ErrorReporter>,
    registry: ContextRegistry,
    config: Config,
}

impl ThreadPoolInner {
    pub fn new(max_qsize: usize, timeout: Duration, max_threads: usize) -> ThreadPool {
        let config = Config {
            max_qsize,
            timeout,
            max_threads,
            ..Default::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> ThreadPool {
        Self::with_reporter(config, Arc::new(LogReporter))
    }

    pub fn with_reporter(mut config: Config, reporter: Arc<dyn ErrorReporter>) -> ThreadPool {
        if config.validate().is_err() {
            tracing::warn!("max_threads is 0, using 1 so queued jobs still run");
            config.max_threads = 1;
        }
        let (sender, receiver) = channel::unbounded();

        Arc::new(ThreadPoolInner {
            sender,
            receiver,
            workers: Mutex::new(HashMap::new()),
            all_workers_exited: Condvar::new(),
            next_worker_id: AtomicUsize::new(0),
            total_spawned: AtomicUsize::new(0),
            peak_workers: AtomicUsize::new(0),
            completed_jobs: AtomicUsize::new(0),
            failed_jobs: AtomicUsize::new(0),
            reporter,
            registry: ContextRegistry::new(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queues `f` and returns immediately.
    ///
    /// Only fails when a needed worker thread cannot be created. The job is
    /// still queued in that case and runs once any worker exists.
    pub fn submit<F>(self: &Arc<Self>, f: F) -> Result<(), SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_job(handle::job(f))
    }

    /// Like [`submit`](Self::submit), but an `Err` from `f` is reported as a
    /// job failure.
    pub fn submit_fallible<F, E>(self: &Arc<Self>, f: F) -> Result<(), SpawnError>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Display,
    {
        self.push_job(handle::fallible_job(f))
    }

    fn push_job(self: &Arc<Self>, job: Job) -> Result<(), SpawnError> {
        // The pool owns a receiver, so the channel is never disconnected.
        let _ = self.sender.send(job);

        let mut workers = self.lock_workers();
        let live = workers.len();
        let should_spawn = live == 0 || self.receiver.len() > self.config.max_qsize;
        if should_spawn && live < self.config.max_threads {
            self.spawn_worker(&mut workers)?;
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, workers: &mut HashMap<usize, WorkerHandle>) -> Result<(), SpawnError> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::clone(self);
        let join = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name, id))
            .spawn(move || pool.worker_loop(id))?;

        // Inserted before the lock is released, so the worker cannot try to
        // remove itself first. The join handle is dropped: workers detach.
        workers.insert(id, WorkerHandle::new(id, join.thread().clone()));
        self.total_spawned.fetch_add(1, Ordering::Relaxed);
        self.peak_workers.fetch_max(workers.len(), Ordering::Relaxed);
        tracing::debug!(worker = id, live = workers.len(), "spawned pool worker");
        Ok(())
    }

    fn worker_loop(&self, id: usize) {
        self.registry.mark_as(ContextTag::PoolWorker);
        let name = thread::current()
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{}-{}", self.config.thread_name, id));

        loop {
            match self.receiver.recv_timeout(self.config.timeout) {
                Ok(job) => self.execute(&name, job),
                Err(RecvTimeoutError::Timeout) => {
                    let mut workers = self.lock_workers();
                    // A job may have landed after the timeout but before we
                    // took the lock; its submitter saw us as live and did not
                    // spawn, so we must not leave.
                    if !self.receiver.is_empty() {
                        continue;
                    }
                    self.retire(&mut workers, id);
                    tracing::debug!(worker = id, live = workers.len(), "idle pool worker exiting");
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let mut workers = self.lock_workers();
                    self.retire(&mut workers, id);
                    return;
                }
            }
        }
    }

    fn retire(&self, workers: &mut HashMap<usize, WorkerHandle>, id: usize) {
        workers.remove(&id);
        if workers.is_empty() {
            self.all_workers_exited.notify_all();
        }
    }

    fn execute(&self, worker: &str, job: Job) {
        match handle::run_job(job) {
            Ok(()) => {
                self.completed_jobs.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.failed_jobs.fetch_add(1, Ordering::Relaxed);
                self.reporter.report(worker, &err);
            }
        }
    }

    // Jobs never run under this lock, so a poisoned guard still holds a
    // consistent map.
    fn lock_workers(&self) -> MutexGuard<'_, HashMap<usize, WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn live_workers(&self) -> usize {
        self.lock_workers().len()
    }

    #[inline]
    pub fn queued_jobs(&self) -> usize {
        self.receiver.len()
    }

    /// Ids of the workers alive right now.
    pub fn worker_ids(&self) -> Vec<usize> {
        let mut ids: Vec<_> = self.lock_workers().values().map(WorkerHandle::id).collect();
        ids.sort_unstable();
        ids
    }

    /// Thread names of the workers alive right now, ordered by id.
    pub fn worker_names(&self) -> Vec<String> {
        let workers = self.lock_workers();
        let mut named: Vec<_> = workers
            .values()
            .map(|w| (w.id(), w.name().unwrap_or_default().to_string()))
            .collect();
        named.sort_unstable_by_key(|(id, _)| *id);
        named.into_iter().map(|(_, name)| name).collect()
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            live_workers: self.live_workers(),
            peak_workers: self.peak_workers.load(Ordering::Relaxed),
            queued_jobs: self.receiver.len(),
            total_spawned: self.total_spawned.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
        }
    }

    /// Blocks until every worker has exited or `timeout` elapses.
    /// Returns whether the pool reached zero workers.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let workers = self.lock_workers();
        let (workers, _) = self
            .all_workers_exited
            .wait_timeout_while(workers, timeout, |w| !w.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        workers.is_empty()
    }
}
