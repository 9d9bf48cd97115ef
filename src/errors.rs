use std::io;

/// Worker thread could not be created.
///
/// The job that triggered the spawn stays queued.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn worker thread: {0}")]
    Io(#[from] io::Error),
}

/// Failure of a single job body. Reported, never propagated to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("job failed: {0}")]
    Failed(String),
}

impl JobError {
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        JobError::Panicked(msg)
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("max_threads must be at least 1")]
    NoThreads,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(
            JobError::from_panic(Box::new("boom")),
            JobError::Panicked("boom".into())
        );
        assert_eq!(
            JobError::from_panic(Box::new(String::from("owned"))),
            JobError::Panicked("owned".into())
        );
        assert_eq!(
            JobError::from_panic(Box::new(7u32)),
            JobError::Panicked("non-string panic payload".into())
        );
    }
}
