//! 批量派发器
//!
//! 收款人按固定大小分批，批与批之间串行，批内并发提交。
//! 每批先一次性分配 nonce 区间，再为每个收款人签名一笔交易；
//! 重试时重发同一份签名字节，保证一个 nonce 只对应一笔交易。

use std::sync::Arc;

use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, H256, U256},
    utils::keccak256,
};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use super::{
    nonce_manager::{NonceAllocation, NonceSequencer},
    transaction_retry::{AttemptError, RetryPolicy},
};
use crate::{
    domain::{Asset, FailureCode, GasParams, TransactionIntent, TransactionOutcome},
    error::Result,
    infrastructure::{ChainRpc, RpcFailure},
};

pub const DEFAULT_BATCH_SIZE: usize = 5;

/// 派发结果：已尝试的收款人各有一个 outcome（与输入顺序一致），
/// 取消后未尝试的收款人记录在 `skipped`
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<TransactionOutcome>,
    pub skipped: Vec<Address>,
    pub allocations: Vec<NonceAllocation>,
    pub cancelled: bool,
}

/// 由最后一次失败推断失败码
pub fn classify_failure(error: &AttemptError<RpcFailure>) -> FailureCode {
    let failure = match error {
        AttemptError::TimedOut(_) => return FailureCode::Timeout,
        AttemptError::Failed(failure) => failure,
    };

    let message = failure.message.to_lowercase();
    if message.contains("nonce too low") {
        FailureCode::NonceTooLow
    } else if message.contains("underpriced") || message.contains("fee too low") {
        FailureCode::Underpriced
    } else if message.contains("insufficient funds") {
        FailureCode::InsufficientFunds
    } else if failure.is_transport() {
        if message.contains("timed out") || message.contains("timeout") {
            FailureCode::Timeout
        } else {
            FailureCode::Transport
        }
    } else {
        FailureCode::Rejected
    }
}

/// 节点已持有该交易（之前的某次尝试实际已送达）
fn is_already_known(failure: &RpcFailure) -> bool {
    let message = failure.message.to_lowercase();
    message.contains("already known") || message.contains("known transaction")
}

pub struct BatchDispatcher {
    rpc: Arc<dyn ChainRpc>,
    sequencer: Arc<NonceSequencer>,
    wallet: LocalWallet,
    asset: Asset,
    gas: GasParams,
    batch_size: usize,
    retry: RetryPolicy,
}

impl BatchDispatcher {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        sequencer: Arc<NonceSequencer>,
        wallet: LocalWallet,
        asset: Asset,
        gas: GasParams,
    ) -> Self {
        Self {
            rpc,
            sequencer,
            wallet,
            asset,
            gas,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 向全部收款人派发 `amount`
    ///
    /// 只在批与批之间检查取消；仅当首批 nonce 基线读取失败时返回错误。
    pub async fn dispatch(
        &self,
        recipients: &[Address],
        amount: U256,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let batch_count = recipients.len().div_ceil(self.batch_size);

        for (index, batch) in recipients.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                let attempted = index * self.batch_size;
                report.skipped = recipients[attempted..].to_vec();
                report.cancelled = true;
                tracing::warn!(
                    batch = index + 1,
                    skipped = report.skipped.len(),
                    "Dispersal cancelled, remaining recipients not attempted"
                );
                break;
            }

            let allocation = self.sequencer.allocate(batch.len() as u64).await?;
            tracing::info!(
                batch = index + 1,
                batches = batch_count,
                size = batch.len(),
                nonce_start = allocation.start,
                nonce_end = allocation.end(),
                "Dispatching batch"
            );

            let outcomes = self.dispatch_batch(batch, amount, allocation).await;
            report.outcomes.extend(outcomes);
            report.allocations.push(allocation);
        }

        Ok(report)
    }

    async fn dispatch_batch(
        &self,
        batch: &[Address],
        amount: U256,
        allocation: NonceAllocation,
    ) -> Vec<TransactionOutcome> {
        let mut slots: Vec<(Address, u64)> = Vec::with_capacity(batch.len());
        let mut handles = Vec::with_capacity(batch.len());

        for (&recipient, nonce) in batch.iter().zip(allocation.iter()) {
            let intent = TransactionIntent::new(&self.asset, recipient, amount, nonce, self.gas);
            slots.push((recipient, nonce));

            let raw = match self.sign(&intent) {
                Ok(raw) => raw,
                Err(reason) => {
                    handles.push(tokio::spawn(async move {
                        TransactionOutcome::Failure {
                            recipient,
                            nonce,
                            reason,
                            error_code: FailureCode::Internal,
                            attempts_used: 0,
                        }
                    }));
                    continue;
                }
            };

            let rpc = self.rpc.clone();
            let retry = self.retry;
            handles.push(tokio::spawn(submit(rpc, retry, intent, raw)));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(slots)
            .map(|(joined, (recipient, nonce))| {
                joined.unwrap_or_else(|e| {
                    tracing::error!(recipient = ?recipient, nonce, error = %e, "submission task aborted");
                    TransactionOutcome::Failure {
                        recipient,
                        nonce,
                        reason: format!("submission task aborted: {}", e),
                        error_code: FailureCode::Internal,
                        attempts_used: 0,
                    }
                })
            })
            .collect()
    }

    fn sign(&self, intent: &TransactionIntent) -> std::result::Result<Bytes, String> {
        let tx = intent.to_typed_transaction(self.wallet.address(), self.wallet.chain_id());
        let signature = self
            .wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| format!("signing failed: {}", e))?;
        Ok(tx.rlp_signed(&signature))
    }
}

async fn submit(
    rpc: Arc<dyn ChainRpc>,
    retry: RetryPolicy,
    intent: TransactionIntent,
    raw: Bytes,
) -> TransactionOutcome {
    let local_hash = H256::from(keccak256(&raw));
    let recipient = intent.recipient;
    let nonce = intent.nonce;

    let outcome = retry
        .run(|attempt| {
            let rpc = rpc.clone();
            let raw = raw.clone();
            async move {
                crate::metrics::inc_broadcast_attempt();
                match rpc.send_raw_transaction(raw).await {
                    Ok(hash) => Ok(hash),
                    Err(e) if is_already_known(&e) => Ok(local_hash),
                    Err(e) => {
                        tracing::warn!(
                            recipient = ?recipient,
                            nonce,
                            attempt,
                            error = %e,
                            "Transaction submission failed"
                        );
                        Err(e)
                    }
                }
            }
        })
        .await;

    crate::metrics::inc_broadcast_result(outcome.result.is_ok());

    match outcome.result {
        Ok(tx_hash) => {
            tracing::info!(
                recipient = ?recipient,
                nonce,
                tx_hash = ?tx_hash,
                attempts = outcome.attempts,
                "Transaction accepted"
            );
            TransactionOutcome::Success {
                recipient,
                nonce,
                tx_hash,
                attempts_used: outcome.attempts,
            }
        }
        Err(error) => {
            let error_code = classify_failure(&error);
            tracing::error!(
                recipient = ?recipient,
                nonce,
                attempts = outcome.attempts,
                error_code = %error_code,
                error = %error,
                "Transaction failed after all attempts"
            );
            TransactionOutcome::Failure {
                recipient,
                nonce,
                reason: error.to_string(),
                error_code,
                attempts_used: outcome.attempts,
            }
        }
    }
}
