//! Credential pool with round-robin dispatch and per-credential breakers.
//!
//! Shared by all validator calls across runs. The mutex guards two integers
//! per operation, so the hot path never holds it across I/O.

use std::sync::Mutex;

/// One validator account.
#[derive(Debug, Clone)]
pub(crate) struct Credential {
    pub auth_id: String,
    pub auth_token: String,
}

#[derive(Debug)]
struct PoolState {
    next_index: usize,
    /// Consecutive rate-limit responses per credential; any success resets to 0.
    consecutive_limit: Vec<u32>,
}

/// Round-robin credential pool with per-credential circuit-breaker counters.
#[derive(Debug)]
pub(crate) struct CredentialPool {
    credentials: Vec<Credential>,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new(auth_ids: &[String], auth_tokens: &[String]) -> Self {
        let credentials: Vec<Credential> = auth_ids
            .iter()
            .zip(auth_tokens.iter())
            .map(|(id, token)| Credential {
                auth_id: id.clone(),
                auth_token: token.clone(),
            })
            .collect();
        let counters = vec![0; credentials.len()];
        Self {
            credentials,
            state: Mutex::new(PoolState {
                next_index: 0,
                consecutive_limit: counters,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn credential(&self, index: usize) -> &Credential {
        &self.credentials[index]
    }

    /// Round-robin start index for one dispatch, atomically advanced.
    pub fn next_start_index(&self) -> usize {
        let mut state = self.state.lock().expect("credential pool lock poisoned");
        let index = state.next_index;
        state.next_index = (state.next_index + 1) % self.credentials.len();
        index
    }

    /// Current consecutive rate-limit count for a credential.
    pub fn limit_count(&self, index: usize) -> u32 {
        let state = self.state.lock().expect("credential pool lock poisoned");
        state.consecutive_limit[index]
    }

    /// Record a rate-limit response; returns the new consecutive count.
    pub fn record_rate_limit(&self, index: usize) -> u32 {
        let mut state = self.state.lock().expect("credential pool lock poisoned");
        state.consecutive_limit[index] += 1;
        state.consecutive_limit[index]
    }

    /// A successful response closes the breaker for this credential.
    pub fn record_success(&self, index: usize) {
        let mut state = self.state.lock().expect("credential pool lock poisoned");
        state.consecutive_limit[index] = 0;
    }

    /// Mask an auth id for logging (first 8 chars only).
    pub fn mask(auth_id: &str) -> String {
        if auth_id.len() <= 8 {
            auth_id.to_string()
        } else {
            format!("{}...", &auth_id[..8])
        }
    }
}
