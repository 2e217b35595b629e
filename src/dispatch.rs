use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::credentials::CredentialPool;
use crate::error::UpstreamFailure;
use crate::upstream::{Upstream, UpstreamReply};

const RATE_LIMITED: u16 = 429;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per key while the upstream keeps answering 429.
    pub max_attempts_per_key: u32,
    /// Wait before retry `r` (0-indexed) is `rate_limit_backoff * 2^(r+1)`.
    pub rate_limit_backoff: Duration,
    /// Pause after a transport failure before failing over.
    pub transport_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_key: 3,
            rate_limit_backoff: Duration::from_secs(1),
            transport_cooldown: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn rate_limit_wait(&self, retry: u32) -> Duration {
        let pow = 1u32 << (retry + 1).min(20);
        self.rate_limit_backoff.saturating_mul(pow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RateLimited,
    Failed,
    Transport,
}

/// One upstream call. Lives only for the inbound request that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub key_index: usize,
    pub retry: u32,
    pub status: Option<u16>,
    pub outcome: AttemptOutcome,
    /// Sleep taken after this attempt, before the next action.
    pub waited: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Success(Value),
    Exhausted { last_error: Option<UpstreamFailure> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub result: DispatchResult,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SelectKey,
    Attempt,
    RateLimited,
    OtherFailure { transport: bool },
    Exhausted,
}

/// Tries keys strictly one at a time in the given rotation order.
///
/// 429 retries the same key with exponential backoff until its budget is spent;
/// any other status fails over immediately; transport errors fail over after a
/// fixed cooldown. The first 2xx ends the whole dispatch.
pub struct Dispatcher<'a> {
    upstream: &'a dyn Upstream,
    policy: &'a RetryPolicy,
}

impl<'a> Dispatcher<'a> {
    pub fn new(upstream: &'a dyn Upstream, policy: &'a RetryPolicy) -> Self {
        Self { upstream, policy }
    }

    pub async fn dispatch(
        &self,
        pool: &CredentialPool,
        order: &[usize],
        model: &str,
        prompt: &str,
    ) -> DispatchReport {
        let max_attempts = self.policy.max_attempts_per_key.max(1);
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last_error: Option<UpstreamFailure> = None;
        let mut cursor = 0usize;
        let mut key_index = 0usize;
        let mut retry = 0u32;
        let mut state = State::SelectKey;

        loop {
            state = match state {
                State::SelectKey => match order.get(cursor) {
                    Some(&idx) => {
                        cursor += 1;
                        key_index = idx;
                        retry = 0;
                        State::Attempt
                    }
                    None => State::Exhausted,
                },
                State::Attempt => {
                    let Some(key) = pool.get(key_index) else {
                        warn!(key_index, "rotation index outside credential pool; skipping");
                        state = State::SelectKey;
                        continue;
                    };
                    let mut record = AttemptRecord {
                        key_index,
                        retry,
                        status: None,
                        outcome: AttemptOutcome::Transport,
                        waited: Duration::ZERO,
                    };
                    let next = match self.upstream.generate(key, model, prompt).await {
                        Ok(UpstreamReply::Success(body)) => {
                            record.status = Some(200);
                            record.outcome = AttemptOutcome::Success;
                            attempts.push(record);
                            info!(key_index, retry, "upstream call succeeded");
                            return DispatchReport {
                                result: DispatchResult::Success(body),
                                attempts,
                            };
                        }
                        Ok(UpstreamReply::Failure { status, .. }) if status == RATE_LIMITED => {
                            record.status = Some(status);
                            record.outcome = AttemptOutcome::RateLimited;
                            State::RateLimited
                        }
                        Ok(UpstreamReply::Failure { status, body }) => {
                            warn!(key_index, retry, status, "upstream call failed");
                            record.status = Some(status);
                            record.outcome = AttemptOutcome::Failed;
                            last_error = Some(UpstreamFailure::status(status, body));
                            State::OtherFailure { transport: false }
                        }
                        Err(err) => {
                            warn!(key_index, retry, error = %err, "upstream transport error");
                            last_error = Some(UpstreamFailure::transport(err.to_string()));
                            State::OtherFailure { transport: true }
                        }
                    };
                    attempts.push(record);
                    next
                }
                State::RateLimited => {
                    if retry + 1 >= max_attempts {
                        debug!(key_index, retry, "rate-limit budget spent; failing over");
                        State::SelectKey
                    } else {
                        let wait = self.policy.rate_limit_wait(retry);
                        debug!(key_index, retry, wait_ms = wait.as_millis() as u64, "rate limited; backing off");
                        pause(&mut attempts, wait).await;
                        retry += 1;
                        State::Attempt
                    }
                }
                State::OtherFailure { transport } => {
                    if transport {
                        pause(&mut attempts, self.policy.transport_cooldown).await;
                    }
                    State::SelectKey
                }
                State::Exhausted => {
                    warn!(attempts = attempts.len(), "all upstream keys exhausted");
                    return DispatchReport {
                        result: DispatchResult::Exhausted { last_error },
                        attempts,
                    };
                }
            };
        }
    }
}

async fn pause(attempts: &mut [AttemptRecord], wait: Duration) {
    if let Some(last) = attempts.last_mut() {
        last.waited = wait;
    }
    if !wait.is_zero() {
        sleep(wait).await;
    }
}
