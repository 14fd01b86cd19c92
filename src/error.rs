//! 统一错误定义
//!
//! 致命错误（会话终止）与可恢复错误（记录到结果中）共用一个枚举，
//! 通过 `is_fatal()` 区分传播策略。

use ethers::types::U256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DisperseError>;

/// 稳定的错误码（用于摘要输出和日志聚合）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    EndpointUnreachable,
    ChainIdMismatch,
    NoLiveEndpoints,
    InsufficientFunds,
    BalanceTooLowToSplit,
    InvalidCredential,
    InvalidAmount,
    InvalidAddress,
    NoRecipients,
    ChainNotSupported,
    RpcError,
    Config,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EndpointUnreachable => "endpoint_unreachable",
            ErrorCode::ChainIdMismatch => "chain_id_mismatch",
            ErrorCode::NoLiveEndpoints => "no_live_endpoints",
            ErrorCode::InsufficientFunds => "insufficient_funds",
            ErrorCode::BalanceTooLowToSplit => "balance_too_low_to_split",
            ErrorCode::InvalidCredential => "invalid_credential",
            ErrorCode::InvalidAmount => "invalid_amount",
            ErrorCode::InvalidAddress => "invalid_address",
            ErrorCode::NoRecipients => "no_recipients",
            ErrorCode::ChainNotSupported => "chain_not_supported",
            ErrorCode::RpcError => "rpc_error",
            ErrorCode::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DisperseError {
    #[error("endpoint {endpoint} unreachable: {reason}")]
    EndpointUnreachable { endpoint: String, reason: String },

    #[error("endpoint {endpoint} reports chain id {reported}, expected {expected}")]
    ChainIdMismatch {
        endpoint: String,
        expected: u64,
        reported: u64,
    },

    #[error("no live endpoints for {chain} ({tried} tried)")]
    NoLiveEndpoints { chain: String, tried: usize },

    #[error("insufficient funds: required {required}, available {available}, shortfall {shortfall}")]
    InsufficientFunds {
        required: U256,
        available: U256,
        shortfall: U256,
    },

    #[error("balance {balance} too low to split across {recipients} recipients after reserving {reserved}")]
    BalanceTooLowToSplit {
        balance: U256,
        reserved: U256,
        recipients: usize,
    },

    #[error("invalid signing credential: {0}")]
    InvalidCredential(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("recipient list is empty")]
    NoRecipients,

    #[error("chain not supported: {0}")]
    ChainNotSupported(String),

    #[error("rpc call {call} failed: {reason}")]
    Rpc { call: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DisperseError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DisperseError::EndpointUnreachable { .. } => ErrorCode::EndpointUnreachable,
            DisperseError::ChainIdMismatch { .. } => ErrorCode::ChainIdMismatch,
            DisperseError::NoLiveEndpoints { .. } => ErrorCode::NoLiveEndpoints,
            DisperseError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            DisperseError::BalanceTooLowToSplit { .. } => ErrorCode::BalanceTooLowToSplit,
            DisperseError::InvalidCredential(_) => ErrorCode::InvalidCredential,
            DisperseError::InvalidAmount(_) => ErrorCode::InvalidAmount,
            DisperseError::InvalidAddress(_) => ErrorCode::InvalidAddress,
            DisperseError::NoRecipients => ErrorCode::NoRecipients,
            DisperseError::ChainNotSupported(_) => ErrorCode::ChainNotSupported,
            DisperseError::Rpc { .. } => ErrorCode::RpcError,
            DisperseError::Config(_) => ErrorCode::Config,
        }
    }

    /// 单个端点的错误由 FallbackTransport 吸收，其余错误在派发前终止会话
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DisperseError::EndpointUnreachable { .. } | DisperseError::ChainIdMismatch { .. }
        )
    }
}

/// 进程退出时的错误码与是否致命，非 `DisperseError` 一律视为致命
pub fn exit_disposition(err: &anyhow::Error) -> (&'static str, bool) {
    match err.downcast_ref::<DisperseError>() {
        Some(e) => (e.code().as_str(), e.is_fatal()),
        None => ("error", true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = DisperseError::InsufficientFunds {
            required: U256::from(12),
            available: U256::from(10),
            shortfall: U256::from(2),
        };
        assert_eq!(err.code().as_str(), "insufficient_funds");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("shortfall 2"));
    }

    #[test]
    fn test_endpoint_errors_are_not_fatal() {
        let err = DisperseError::EndpointUnreachable {
            endpoint: "https://rpc.example.com".into(),
            reason: "connection refused".into(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.code(), ErrorCode::EndpointUnreachable);

        let err = DisperseError::NoLiveEndpoints {
            chain: "Ethereum".into(),
            tried: 3,
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn test_exit_disposition() {
        let err = anyhow::Error::new(DisperseError::ChainIdMismatch {
            endpoint: "http://a".into(),
            expected: 1,
            reported: 5,
        });
        assert_eq!(exit_disposition(&err), ("chain_id_mismatch", false));

        let err = anyhow::Error::new(DisperseError::NoLiveEndpoints {
            chain: "mainnet".into(),
            tried: 2,
        });
        assert_eq!(exit_disposition(&err), ("no_live_endpoints", true));

        // 配置等外部错误按致命处理
        let err = anyhow::anyhow!("bad toml");
        assert_eq!(exit_disposition(&err), ("error", true));
    }
}
