use super::errors::JobError;
use std::{
    fmt::Display,
    panic::{self, AssertUnwindSafe},
    thread::Thread,
};

/// Unit of work queued on the pool.
pub type Job = Box<dyn FnOnce() -> Result<(), JobError> + Send + 'static>;

pub(crate) fn job<F>(f: F) -> Job
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move || {
        f();
        Ok(())
    })
}

pub(crate) fn fallible_job<F, E>(f: F) -> Job
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Display,
{
    Box::new(move || f().map_err(|e| JobError::Failed(e.to_string())))
}

/// Runs a job, turning a panic into a [`JobError`].
#[inline]
pub(crate) fn run_job(job: Job) -> Result<(), JobError> {
    panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| Err(JobError::from_panic(payload)))
}

/// Live pool worker, keyed by its pool-local id.
///
/// Workers are detached: they retire themselves, so only the thread
/// identity is kept, never a join handle.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    thread: Thread,
}

impl WorkerHandle {
    pub(crate) fn new(id: usize, thread: Thread) -> Self {
        Self { id, thread }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.thread.name()
    }
}
