//! Disperse - EVM 批量派发引擎
//!
//! 从一个账户向大量收款人派发原生币或 ERC-20 代币：
//! 多端点容错传输、会话内 nonce 序列、余额一致的金额计算、
//! 分批并发提交与有界重试。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod security;
pub mod service;
pub mod utils;

pub use error::{DisperseError, ErrorCode};

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{Asset, ChainCatalog, ChainDescriptor, GasConfig, TransactionOutcome},
        error::{DisperseError, ErrorCode, Result},
        infrastructure::{ChainRpc, EthersConnector, FallbackTransport, RpcConnector},
        service::{DispersalSession, DispersalSummary, PayoutRequest, SendRequest},
    };
}
