#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub live_workers: usize,
    pub peak_workers: usize,
    pub queued_jobs: usize,
    pub total_spawned: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
}

impl PoolMetrics {
    pub fn queue_pressure(&self) -> f64 {
        if self.live_workers == 0 {
            return self.queued_jobs as f64;
        }
        self.queued_jobs as f64 / self.live_workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_jobs + self.failed_jobs;
        if total == 0 {
            return 1.0;
        }
        self.completed_jobs as f64 / total as f64
    }
}

/// Role a thread can carry in the [`ContextRegistry`](crate::context::ContextRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextTag {
    LoopThread,
    PoolWorker,
}

impl ContextTag {
    #[inline]
    pub(crate) fn bit(self) -> u8 {
        match self {
            ContextTag::LoopThread => 0b01,
            ContextTag::PoolWorker => 0b10,
        }
    }
}
