//! Bounded polling loops for transaction confirmation
//!
//! Two loops live here: the blocking approval-confirmation wait and the
//! detached bridge-completion poll. Both are bounded in attempts; the
//! detached loop runs behind a `PollHandle` that the owner must stop on
//! teardown.

use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::providers::{StatusProvider, TxStatus};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle to a detached polling task. The owning lifecycle must call
/// `stop()` on teardown; an unstopped poll keeps running until its attempt
/// ceiling.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Wait for an approval transaction to confirm.
///
/// Returns `Ok(true)` on an observed success, an error on an observed
/// on-chain failure, and `Ok(false)` when the attempt ceiling passes with
/// no definitive status and the flow is configured to proceed optimistically.
/// Transient lookup errors count as a missed attempt, not a failure.
pub async fn wait_for_confirmation(
    status: &Arc<dyn StatusProvider>,
    chain_id: u64,
    tx_hash: &str,
    interval: Duration,
    max_attempts: u32,
    fail_on_timeout: bool,
) -> EngineResult<bool> {
    for attempt in 1..=max_attempts {
        match status.get_transaction_detail(chain_id, tx_hash).await {
            Ok(TxStatus::Success) => return Ok(true),
            Ok(TxStatus::Fail) => {
                return Err(EngineError::Transaction(
                    "Approval transaction failed on chain".to_string(),
                ))
            }
            Ok(TxStatus::Pending) => {
                debug!(
                    "Approval {} pending ({}/{} attempts)",
                    tx_hash, attempt, max_attempts
                );
            }
            Err(e) => {
                debug!("Approval status lookup failed for {}: {}", tx_hash, e);
            }
        }
        tokio::time::sleep(interval).await;
    }

    if fail_on_timeout {
        return Err(EngineError::Timeout {
            operation: "approval confirmation".to_string(),
        });
    }

    // Deliberate risk acceptance: proceed without a confirmed approval
    // rather than blocking the user indefinitely. The event name below is
    // stable so log consumers can fail closed on their side.
    warn!(
        event = "approval_confirmation_timeout",
        tx_hash, chain_id, "Proceeding without confirmed approval"
    );
    metrics::record_approval_timeout();
    Ok(false)
}

/// Terminal outcome of the bridge-completion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    FailedOnChain,
    TimedOut,
}

/// Poll bridge status by source-transaction hash until it settles or the
/// attempt ceiling is reached. `on_pending` fires on every indeterminate
/// tick so the owner can reflect progress on its record.
pub async fn poll_bridge_status<F>(
    status: Arc<dyn StatusProvider>,
    chain_id: u64,
    tx_hash: String,
    interval: Duration,
    max_attempts: u32,
    mut on_pending: F,
) -> PollOutcome
where
    F: FnMut(u32) + Send,
{
    for attempt in 1..=max_attempts {
        metrics::record_bridge_poll_tick();
        match status.get_transaction_detail(chain_id, &tx_hash).await {
            Ok(TxStatus::Success) => return PollOutcome::Completed,
            Ok(TxStatus::Fail) => return PollOutcome::FailedOnChain,
            Ok(TxStatus::Pending) => on_pending(attempt),
            Err(e) => {
                debug!("Bridge status lookup failed for {}: {}", tx_hash, e);
            }
        }
        tokio::time::sleep(interval).await;
    }
    PollOutcome::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockStatusProvider;
    use std::sync::atomic::{AtomicU32, Ordering};

    const INTERVAL: Duration = Duration::from_secs(2);

    fn provider_with(status: TxStatus) -> Arc<dyn StatusProvider> {
        let mut mock = MockStatusProvider::new();
        mock.expect_get_transaction_detail()
            .returning(move |_, _| Ok(status));
        Arc::new(mock)
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_returns_on_first_success() {
        let status = provider_with(TxStatus::Success);
        let confirmed = wait_for_confirmation(&status, 1, "0xabc", INTERVAL, 30, false)
            .await
            .unwrap();
        assert!(confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_fails_on_chain_failure() {
        let status = provider_with(TxStatus::Fail);
        let result = wait_for_confirmation(&status, 1, "0xabc", INTERVAL, 30, false).await;
        assert!(matches!(result, Err(EngineError::Transaction(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_timeout_proceeds_optimistically() {
        let status = provider_with(TxStatus::Pending);
        let confirmed = wait_for_confirmation(&status, 1, "0xabc", INTERVAL, 30, false)
            .await
            .unwrap();
        assert!(!confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_timeout_can_fail_closed() {
        let status = provider_with(TxStatus::Pending);
        let result = wait_for_confirmation(&status, 1, "0xabc", INTERVAL, 30, true).await;
        assert!(matches!(result, Err(EngineError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_poll_reports_terminal_outcomes() {
        let interval = Duration::from_secs(10);

        let outcome = poll_bridge_status(
            provider_with(TxStatus::Success),
            1,
            "0xabc".into(),
            interval,
            60,
            |_| {},
        )
        .await;
        assert_eq!(outcome, PollOutcome::Completed);

        let outcome = poll_bridge_status(
            provider_with(TxStatus::Fail),
            1,
            "0xabc".into(),
            interval,
            60,
            |_| {},
        )
        .await;
        assert_eq!(outcome, PollOutcome::FailedOnChain);
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_poll_times_out_after_attempt_ceiling() {
        let ticks = AtomicU32::new(0);
        let outcome = poll_bridge_status(
            provider_with(TxStatus::Pending),
            1,
            "0xabc".into(),
            Duration::from_secs(10),
            60,
            |_| {
                ticks.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(ticks.load(Ordering::SeqCst), 60);
    }
}
