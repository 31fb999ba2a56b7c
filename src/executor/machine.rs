//! Swap/bridge execution state machine
//!
//! `SwapExecutor` drives one partially-irreversible flow per call:
//! approval check, approval submit + confirmation, source-chain submit,
//! then detached bridge-completion polling. Every flow gets a
//! `BridgeTransaction` record whose status updates are append-only for
//! audit; records are never deleted.

use super::polling::{self, PollHandle, PollOutcome};
use crate::amount;
use crate::config::ExecutorConfig;
use crate::error::{classify_provider_error, EngineError, EngineResult};
use crate::metrics;
use crate::providers::{BridgeProvider, StatusProvider, TokenRef, WalletProvider};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Idle,
    CheckingApproval,
    Approving,
    PendingSource,
    Bridging,
    PendingDestination,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Idle => "idle",
            ExecutionStatus::CheckingApproval => "checking-approval",
            ExecutionStatus::Approving => "approving",
            ExecutionStatus::PendingSource => "pending-source",
            ExecutionStatus::Bridging => "bridging",
            ExecutionStatus::PendingDestination => "pending-destination",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// Audit record for one swap/bridge flow.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeTransaction {
    pub id: String,
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_token: TokenRef,
    pub to_token: TokenRef,
    /// Human units
    pub from_amount: String,
    /// Expected destination amount, base units
    pub to_amount: Option<String>,
    pub status: ExecutionStatus,
    pub source_tx_hash: Option<String>,
    pub destination_tx_hash: Option<String>,
    pub bridge_name: Option<String>,
    pub estimated_time_secs: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Execution request as confirmed by the user.
#[derive(Debug, Clone)]
pub struct SwapParams {
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_token: TokenRef,
    pub to_token: TokenRef,
    /// Human decimal string
    pub amount: String,
    pub slippage_bps: u32,
    pub recipient: String,
    /// From the quote the user confirmed, base units
    pub expected_to_amount: Option<String>,
}

/// Drives swap/bridge flows and owns their transaction records.
pub struct SwapExecutor {
    wallet: Arc<dyn WalletProvider>,
    bridge: Arc<dyn BridgeProvider>,
    status: Arc<dyn StatusProvider>,
    transactions: Arc<RwLock<Vec<BridgeTransaction>>>,
    handles: Mutex<Vec<PollHandle>>,
    config: ExecutorConfig,
    seq: AtomicU64,
}

impl SwapExecutor {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        bridge: Arc<dyn BridgeProvider>,
        status: Arc<dyn StatusProvider>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            wallet,
            bridge,
            status,
            transactions: Arc::new(RwLock::new(Vec::new())),
            handles: Mutex::new(Vec::new()),
            config,
            seq: AtomicU64::new(0),
        }
    }

    /// Execute a swap or bridge to the point where the source-chain hash is
    /// known; completion is tracked by a detached poll afterwards.
    ///
    /// Every failure before that point is recorded on the transaction and
    /// returned to the caller.
    pub async fn execute_swap(&self, params: SwapParams) -> EngineResult<String> {
        let id = self.create_record(&params);
        info!("Execution {} started ({} -> {})", id, params.from_chain, params.to_chain);

        match self.run_flow(&id, &params).await {
            Ok(tx_hash) => Ok(tx_hash),
            Err(e) => {
                warn!("Execution {} failed: {}", id, e);
                self.update(&id, |tx| {
                    tx.status = ExecutionStatus::Failed;
                    tx.error = Some(e.to_string());
                });
                metrics::record_execution("failed");
                Err(e)
            }
        }
    }

    async fn run_flow(&self, id: &str, params: &SwapParams) -> EngineResult<String> {
        let amount_base = amount::to_base_units(&params.amount, params.from_token.decimals);
        if amount_base == "0" {
            return Err(EngineError::Transaction(
                "Amount is zero or invalid".to_string(),
            ));
        }

        let swap = self
            .bridge
            .get_cross_chain_swap(
                params.from_chain,
                params.to_chain,
                &params.from_token,
                &params.to_token,
                &amount_base,
                params.slippage_bps,
                &params.recipient,
            )
            .await?;
        if let Some(error) = swap.error {
            return Err(classify_provider_error(&error));
        }

        self.update(id, |tx| {
            tx.bridge_name = Some(swap.bridge_name.clone());
            tx.estimated_time_secs = Some(swap.estimated_time_secs);
        });

        // Native-asset transfers come back without approval data and skip
        // this step entirely.
        if let Some(approve) = &swap.approve {
            self.update(id, |tx| tx.status = ExecutionStatus::Approving);
            let approval_hash = self
                .wallet
                .send_transaction(params.from_chain, approve)
                .await?;
            polling::wait_for_confirmation(
                &self.status,
                params.from_chain,
                &approval_hash,
                Duration::from_millis(self.config.approval_poll_interval_ms),
                self.config.approval_poll_attempts,
                self.config.fail_on_approval_timeout,
            )
            .await?;
        }

        self.update(id, |tx| tx.status = ExecutionStatus::PendingSource);
        let tx_hash = self
            .wallet
            .send_transaction(params.from_chain, &swap.tx)
            .await?;

        self.update(id, |tx| {
            tx.source_tx_hash = Some(tx_hash.clone());
            tx.status = ExecutionStatus::Bridging;
        });
        info!("Execution {} submitted source tx {}", id, tx_hash);

        let handle = self.start_bridge_polling(id, params.from_chain, tx_hash.clone());
        self.handles
            .lock()
            .expect("poll handle list poisoned")
            .push(handle);

        Ok(tx_hash)
    }

    /// Detached completion poll. Terminal outcomes land on the record only;
    /// no error escapes to the original caller.
    fn start_bridge_polling(&self, id: &str, chain_id: u64, tx_hash: String) -> PollHandle {
        let status = self.status.clone();
        let transactions = self.transactions.clone();
        let id = id.to_string();
        let interval = Duration::from_millis(self.config.bridge_poll_interval_ms);
        let attempts = self.config.bridge_poll_attempts;

        let task = tokio::spawn(async move {
            let pending_tx = transactions.clone();
            let pending_id = id.clone();
            let outcome = polling::poll_bridge_status(
                status,
                chain_id,
                tx_hash,
                interval,
                attempts,
                move |_| {
                    update_record(&pending_tx, &pending_id, |tx| {
                        if !tx.status.is_terminal() {
                            tx.status = ExecutionStatus::PendingDestination;
                        }
                    });
                },
            )
            .await;

            match outcome {
                PollOutcome::Completed => {
                    info!("Execution {} completed", id);
                    metrics::record_execution("completed");
                    update_record(&transactions, &id, |tx| {
                        if !tx.status.is_terminal() {
                            tx.status = ExecutionStatus::Completed;
                        }
                    });
                }
                PollOutcome::FailedOnChain => {
                    warn!("Execution {} failed on chain", id);
                    metrics::record_execution("failed");
                    update_record(&transactions, &id, |tx| {
                        if !tx.status.is_terminal() {
                            tx.status = ExecutionStatus::Failed;
                            tx.error = Some("Transaction failed on chain".to_string());
                        }
                    });
                }
                PollOutcome::TimedOut => {
                    warn!("Execution {} bridge timed out", id);
                    metrics::record_execution("timed_out");
                    update_record(&transactions, &id, |tx| {
                        if !tx.status.is_terminal() {
                            tx.status = ExecutionStatus::Failed;
                            tx.error = Some("Bridge timed out".to_string());
                        }
                    });
                }
            }
        });

        PollHandle::new(task)
    }

    fn create_record(&self, params: &SwapParams) -> String {
        let id = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        );
        let record = BridgeTransaction {
            id: id.clone(),
            from_chain: params.from_chain,
            to_chain: params.to_chain,
            from_token: params.from_token.clone(),
            to_token: params.to_token.clone(),
            from_amount: params.amount.clone(),
            to_amount: params.expected_to_amount.clone(),
            status: ExecutionStatus::CheckingApproval,
            source_tx_hash: None,
            destination_tx_hash: None,
            bridge_name: None,
            estimated_time_secs: None,
            started_at: Utc::now(),
            error: None,
        };
        self.transactions
            .write()
            .expect("transaction list poisoned")
            .push(record);
        id
    }

    fn update<F: FnOnce(&mut BridgeTransaction)>(&self, id: &str, f: F) {
        update_record(&self.transactions, id, f);
    }

    /// Read-only snapshot for the history surface.
    pub fn transactions(&self) -> Vec<BridgeTransaction> {
        self.transactions
            .read()
            .expect("transaction list poisoned")
            .clone()
    }

    pub fn transaction(&self, id: &str) -> Option<BridgeTransaction> {
        self.transactions
            .read()
            .expect("transaction list poisoned")
            .iter()
            .find(|tx| tx.id == id)
            .cloned()
    }

    /// Stop every detached poll. Owning lifecycles must call this on
    /// teardown; skipping it leaves bounded-but-pointless polling behind.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().expect("poll handle list poisoned");
        for handle in handles.drain(..) {
            handle.stop();
        }
    }
}

fn update_record<F: FnOnce(&mut BridgeTransaction)>(
    transactions: &Arc<RwLock<Vec<BridgeTransaction>>>,
    id: &str,
    f: F,
) {
    let mut list = transactions.write().expect("transaction list poisoned");
    if let Some(tx) = list.iter_mut().find(|tx| tx.id == id) {
        f(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        CrossChainSwap, MockBridgeProvider, MockStatusProvider, MockWalletProvider, SwapCallData,
        TxStatus,
    };

    fn token(address: &str) -> TokenRef {
        TokenRef {
            address: address.to_string(),
            symbol: address.to_uppercase(),
            decimals: 18,
        }
    }

    fn params() -> SwapParams {
        SwapParams {
            from_chain: 1,
            to_chain: 137,
            from_token: token("0xaaa"),
            to_token: token("0xbbb"),
            amount: "1.5".to_string(),
            slippage_bps: 50,
            recipient: "0x9999999999999999999999999999999999999999".to_string(),
            expected_to_amount: Some("1490000000000000000".to_string()),
        }
    }

    fn call_data(tag: &str) -> SwapCallData {
        SwapCallData {
            to: "0x1111111111111111111111111111111111111111".to_string(),
            data: format!("0x{}", tag),
            value: "0".to_string(),
            gas: Some("0x5208".to_string()),
        }
    }

    fn swap_response(with_approval: bool) -> CrossChainSwap {
        CrossChainSwap {
            tx: call_data("deadbeef"),
            approve: with_approval.then(|| call_data("aabbccdd")),
            bridge_name: "hopline".to_string(),
            estimated_time_secs: 300,
            error: None,
        }
    }

    fn bridge_returning(swap: CrossChainSwap) -> Arc<dyn BridgeProvider> {
        let mut mock = MockBridgeProvider::new();
        mock.expect_get_cross_chain_swap()
            .returning(move |_, _, _, _, _, _, _| Ok(swap.clone()));
        Arc::new(mock)
    }

    fn wallet_returning(hash: &'static str) -> Arc<dyn WalletProvider> {
        let mut mock = MockWalletProvider::new();
        mock.expect_send_transaction()
            .returning(move |_, _| Ok(hash.to_string()));
        Arc::new(mock)
    }

    fn status_returning(status: TxStatus) -> Arc<dyn StatusProvider> {
        let mut mock = MockStatusProvider::new();
        mock.expect_get_transaction_detail()
            .returning(move |_, _| Ok(status));
        Arc::new(mock)
    }

    async fn wait_for_terminal(executor: &SwapExecutor, id: &str) -> BridgeTransaction {
        loop {
            if let Some(tx) = executor.transaction(id) {
                if tx.status.is_terminal() {
                    return tx;
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_completes_with_source_hash() {
        let executor = SwapExecutor::new(
            wallet_returning("0xsourcehash"),
            bridge_returning(swap_response(false)),
            status_returning(TxStatus::Success),
            ExecutorConfig::default(),
        );

        let hash = executor.execute_swap(params()).await.unwrap();
        assert_eq!(hash, "0xsourcehash");

        let id = executor.transactions()[0].id.clone();
        let record = wait_for_terminal(&executor, &id).await;
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.source_tx_hash.as_deref(), Some("0xsourcehash"));
        assert_eq!(record.bridge_name.as_deref(), Some("hopline"));
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn approval_step_runs_before_source_submit() {
        let mut wallet = MockWalletProvider::new();
        // Approval first, then the primary transaction
        wallet
            .expect_send_transaction()
            .times(2)
            .returning(|_, _| Ok("0xhash".to_string()));

        let executor = SwapExecutor::new(
            Arc::new(wallet),
            bridge_returning(swap_response(true)),
            status_returning(TxStatus::Success),
            ExecutorConfig::default(),
        );

        executor.execute_swap(params()).await.unwrap();
        let id = executor.transactions()[0].id.clone();
        let record = wait_for_terminal(&executor, &id).await;
        assert_eq!(record.status, ExecutionStatus::Completed);
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn bridge_timeout_marks_record_failed() {
        let executor = SwapExecutor::new(
            wallet_returning("0xsourcehash"),
            bridge_returning(swap_response(false)),
            status_returning(TxStatus::Pending),
            ExecutorConfig::default(),
        );

        executor.execute_swap(params()).await.unwrap();
        let id = executor.transactions()[0].id.clone();
        let record = wait_for_terminal(&executor, &id).await;

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Bridge timed out"));
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn provider_error_fails_fast_and_rethrows() {
        let mut bridge = MockBridgeProvider::new();
        bridge
            .expect_get_cross_chain_swap()
            .returning(|_, _, _, _, _, _, _| Err(crate::error::EngineError::NoRoute));

        let executor = SwapExecutor::new(
            wallet_returning("0xunused"),
            Arc::new(bridge),
            status_returning(TxStatus::Success),
            ExecutorConfig::default(),
        );

        let result = executor.execute_swap(params()).await;
        assert!(result.is_err());

        let transactions = executor.transactions();
        assert_eq!(transactions[0].status, ExecutionStatus::Failed);
        assert!(transactions[0].error.is_some());
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn wallet_rejection_is_recorded_and_rethrown() {
        let mut wallet = MockWalletProvider::new();
        wallet.expect_send_transaction().returning(|_, _| {
            Err(crate::error::EngineError::Wallet(
                "user rejected signing".to_string(),
            ))
        });

        let executor = SwapExecutor::new(
            Arc::new(wallet),
            bridge_returning(swap_response(false)),
            status_returning(TxStatus::Success),
            ExecutorConfig::default(),
        );

        let result = executor.execute_swap(params()).await;
        assert!(matches!(result, Err(crate::error::EngineError::Wallet(_))));

        let transactions = executor.transactions();
        assert_eq!(transactions[0].status, ExecutionStatus::Failed);
        executor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_amount_aborts_before_any_provider_call() {
        let executor = SwapExecutor::new(
            wallet_returning("0xunused"),
            bridge_returning(swap_response(false)),
            status_returning(TxStatus::Success),
            ExecutorConfig::default(),
        );

        let mut request = params();
        request.amount = "not-a-number".to_string();
        let result = executor.execute_swap(request).await;

        assert!(result.is_err());
        assert_eq!(executor.transactions()[0].status, ExecutionStatus::Failed);
        executor.shutdown();
    }
}
