//! Bounded retry around a [`ConnectionRequester`].
//!
//! Attempts are strictly sequential with a fixed delay between a failure and
//! the next attempt. When the budget runs out the cause of the last attempt is
//! reported; earlier causes are only logged.

use crate::{ClientError, ConnectionHandle, ConnectionRequestSpec, ConnectionRequester};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Default number of attempts per network service
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default delay between attempts
pub const DEFAULT_INTER_DELAY: Duration = Duration::from_secs(5);

/// Fixed attempt count and fixed inter-attempt delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    inter_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` must be at least one
    pub fn new(max_attempts: u32, inter_delay: Duration) -> Result<Self, ClientError> {
        if max_attempts == 0 {
            return Err(ClientError::Policy("max_attempts must be at least 1".to_string()));
        }
        Ok(Self {
            max_attempts,
            inter_delay,
        })
    }

    /// Maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between a failed attempt and the next one
    pub fn inter_delay(&self) -> Duration {
        self.inter_delay
    }

    /// Upper bound on time spent sleeping before giving up
    pub fn max_blocking(&self) -> Duration {
        self.inter_delay * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            inter_delay: DEFAULT_INTER_DELAY,
        }
    }
}

/// Terminal result of a retried connection request
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// A connection was established
    Established(ConnectionHandle),
    /// Every attempt failed; carries the cause of the last one
    Failed(ClientError),
}

impl ConnectionOutcome {
    /// Convert into a `Result`
    pub fn into_result(self) -> Result<ConnectionHandle, ClientError> {
        match self {
            ConnectionOutcome::Established(handle) => Ok(handle),
            ConnectionOutcome::Failed(cause) => Err(cause),
        }
    }
}

/// Drives a requester under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryingConnector<R> {
    requester: R,
}

impl<R: ConnectionRequester> RetryingConnector<R> {
    /// Wrap a requester
    pub fn new(requester: R) -> Self {
        Self { requester }
    }

    /// The wrapped requester
    pub fn requester(&self) -> &R {
        &self.requester
    }

    /// Request a connection, retrying up to the policy bound
    pub async fn connect_retry(
        &self,
        spec: &ConnectionRequestSpec,
        policy: &RetryPolicy,
    ) -> ConnectionOutcome {
        let mut attempt = 1;
        loop {
            debug!(
                component = "retry",
                "Requesting network service {} (attempt {}/{})",
                spec.service_name, attempt, policy.max_attempts
            );

            match self.requester.request(spec).await {
                Ok(handle) => {
                    info!(
                        component = "retry",
                        "Connected to network service {} on attempt {}: {}",
                        spec.service_name, attempt, handle
                    );
                    return ConnectionOutcome::Established(handle);
                }
                Err(e) if attempt >= policy.max_attempts => {
                    warn!(
                        component = "retry",
                        "Giving up on network service {} after {} attempts: {}",
                        spec.service_name, attempt, e
                    );
                    return ConnectionOutcome::Failed(e);
                }
                Err(e) => {
                    warn!(
                        component = "retry",
                        "Failed to connect to network service {} (attempt {}/{}): {}. Retrying in {:?}",
                        spec.service_name, attempt, policy.max_attempts, e, policy.inter_delay
                    );
                    sleep(policy.inter_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spec, ScriptedRequester};
    use tokio::time::Instant;

    #[test]
    fn test_policy_bounds() {
        assert!(matches!(RetryPolicy::new(0, Duration::ZERO), Err(ClientError::Policy(_))));

        let policy = RetryPolicy::new(4, Duration::from_secs(3)).unwrap();
        assert_eq!(policy.max_blocking(), Duration::from_secs(9));
        assert_eq!(RetryPolicy::default().max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_requester_is_called_max_attempts_times() {
        let requester = ScriptedRequester::always_failing();
        let calls = requester.calls.clone();
        let connector = RetryingConnector::new(requester);
        let policy = RetryPolicy::new(4, Duration::from_secs(1)).unwrap();

        let outcome = connector.connect_retry(&spec("secure-intranet"), &policy).await;

        assert!(matches!(outcome, ConnectionOutcome::Failed(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_cause_is_reported() {
        let connector = RetryingConnector::new(ScriptedRequester::always_failing());
        let policy = RetryPolicy::new(3, Duration::from_millis(10)).unwrap();

        let cause = connector
            .connect_retry(&spec("secure-intranet"), &policy)
            .await
            .into_result()
            .unwrap_err();

        assert!(cause.to_string().contains("attempt 3"), "got {}", cause);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let requester = ScriptedRequester::succeeding_on(2);
        let calls = requester.calls.clone();
        let connector = RetryingConnector::new(requester);
        let policy = RetryPolicy::new(5, Duration::from_secs(1)).unwrap();

        let handle = connector
            .connect_retry(&spec("secure-intranet"), &policy)
            .await
            .into_result()
            .unwrap();

        assert_eq!(handle.network_service, "secure-intranet");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_spaced_by_inter_delay() {
        let requester = ScriptedRequester::always_failing();
        let attempts = requester.attempt_times.clone();
        let connector = RetryingConnector::new(requester);
        let delay = Duration::from_secs(2);
        let policy = RetryPolicy::new(4, delay).unwrap();

        let started = Instant::now();
        let _ = connector.connect_retry(&spec("secure-intranet"), &policy).await;

        assert!(started.elapsed() >= delay * 3);
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert!(pair[1] - pair[0] >= delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_attempts_with_two_second_delay() {
        let requester = ScriptedRequester::succeeding_on(3);
        let calls = requester.calls.clone();
        let connector = RetryingConnector::new(requester);
        let policy = RetryPolicy::new(3, Duration::from_secs(2)).unwrap();

        let started = Instant::now();
        let outcome = connector.connect_retry(&spec("secure-intranet"), &policy).await;

        assert!(matches!(outcome, ConnectionOutcome::Established(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_after_final_failure() {
        let connector = RetryingConnector::new(ScriptedRequester::always_failing());
        let policy = RetryPolicy::new(2, Duration::from_secs(5)).unwrap();

        let started = Instant::now();
        let _ = connector.connect_retry(&spec("secure-intranet"), &policy).await;

        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
