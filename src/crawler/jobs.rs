//! Cancellation registry for running jobs.
//!
//! Maps run ids to cancellation tokens so the API can stop a run that is
//! executing on a background worker. One conceptual run per source is live
//! at a time.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

use crate::models::Source;

struct JobHandle {
    token: CancellationToken,
    source: Source,
}

/// Process-wide map of live runs to their cancellation handles.
#[derive(Default)]
pub struct JobManager {
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run and return its cancellation token.
    pub fn register(&self, run_id: &str, source: Source) -> CancellationToken {
        let token = CancellationToken::new();
        self.jobs.write().expect("job map lock poisoned").insert(
            run_id.to_string(),
            JobHandle {
                token: token.clone(),
                source,
            },
        );
        token
    }

    /// Remove a run on completion (any terminal outcome).
    pub fn unregister(&self, run_id: &str) {
        self.jobs
            .write()
            .expect("job map lock poisoned")
            .remove(run_id);
    }

    /// Trip a run's cancellation handle. Returns false for unknown runs.
    pub fn cancel(&self, run_id: &str) -> bool {
        let mut jobs = self.jobs.write().expect("job map lock poisoned");
        if let Some(handle) = jobs.remove(run_id) {
            handle.token.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.jobs
            .read()
            .expect("job map lock poisoned")
            .contains_key(run_id)
    }

    /// Whether any live run exists for the given source.
    pub fn has_live_run(&self, source: Source) -> bool {
        self.jobs
            .read()
            .expect("job map lock poisoned")
            .values()
            .any(|h| h.source == source)
    }
}
