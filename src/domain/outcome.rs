//! 单笔交易的最终结果
//!
//! 每个 TransactionIntent 恰好产生一个 TransactionOutcome。

use std::fmt;

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// 失败分类码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// 单次尝试超时
    Timeout,
    /// nonce 已被占用（可能已上链）
    NonceTooLow,
    /// 手续费过低
    Underpriced,
    /// 节点报告余额不足
    InsufficientFunds,
    /// 节点拒绝（其他 JSON-RPC 错误）
    Rejected,
    /// 全部端点网络层失败
    Transport,
    /// 签名失败或任务异常退出
    Internal,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Timeout => "timeout",
            FailureCode::NonceTooLow => "nonce_too_low",
            FailureCode::Underpriced => "underpriced",
            FailureCode::InsufficientFunds => "insufficient_funds",
            FailureCode::Rejected => "rejected",
            FailureCode::Transport => "transport",
            FailureCode::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionOutcome {
    Success {
        recipient: Address,
        nonce: u64,
        tx_hash: H256,
        attempts_used: u32,
    },
    Failure {
        recipient: Address,
        nonce: u64,
        reason: String,
        error_code: FailureCode,
        attempts_used: u32,
    },
}

impl TransactionOutcome {
    pub fn recipient(&self) -> Address {
        match self {
            TransactionOutcome::Success { recipient, .. }
            | TransactionOutcome::Failure { recipient, .. } => *recipient,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            TransactionOutcome::Success { nonce, .. } | TransactionOutcome::Failure { nonce, .. } => {
                *nonce
            }
        }
    }

    pub fn attempts_used(&self) -> u32 {
        match self {
            TransactionOutcome::Success { attempts_used, .. }
            | TransactionOutcome::Failure { attempts_used, .. } => *attempts_used,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransactionOutcome::Success { .. })
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            TransactionOutcome::Success { tx_hash, .. } => Some(*tx_hash),
            TransactionOutcome::Failure { .. } => None,
        }
    }
}
