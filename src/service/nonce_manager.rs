//! Nonce 序列器
//! 单账户、单会话：首次分配时读取一次链上 pending nonce 作为基线，
//! 之后全部为本地运算。分配在互斥锁内串行执行，已发放的 nonce 不回收。

use std::sync::Arc;

use ethers::types::Address;
use tokio::sync::Mutex;

use crate::{
    error::{DisperseError, Result},
    infrastructure::ChainRpc,
};

/// 一次分配得到的连续 nonce 区间 `[start, start + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceAllocation {
    pub start: u64,
    pub count: u64,
}

impl NonceAllocation {
    /// 区间末尾（不含）
    pub fn end(&self) -> u64 {
        self.start + self.count
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> {
        self.start..self.end()
    }

    pub fn contains(&self, nonce: u64) -> bool {
        (self.start..self.end()).contains(&nonce)
    }
}

pub struct NonceSequencer {
    account: Address,
    rpc: Arc<dyn ChainRpc>,
    cursor: Mutex<Option<u64>>,
}

impl NonceSequencer {
    pub fn new(account: Address, rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            account,
            rpc,
            cursor: Mutex::new(None),
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// 分配 `count` 个连续 nonce
    pub async fn allocate(&self, count: u64) -> Result<NonceAllocation> {
        let mut cursor = self.cursor.lock().await;

        let start = match *cursor {
            Some(next) => next,
            None => {
                let baseline = self
                    .rpc
                    .transaction_count(self.account)
                    .await
                    .map_err(|e| DisperseError::Rpc {
                        call: "eth_getTransactionCount",
                        reason: e.to_string(),
                    })?;
                tracing::debug!(account = %self.account, baseline, "nonce baseline loaded");
                baseline
            }
        };

        *cursor = Some(start + count);
        crate::metrics::add_nonces_allocated(count);

        tracing::debug!(
            account = %self.account,
            start,
            count,
            "Allocated nonce range"
        );

        Ok(NonceAllocation { start, count })
    }

    /// 下一个待分配的 nonce（基线未加载时为 None）
    pub async fn peek(&self) -> Option<u64> {
        *self.cursor.lock().await
    }
}
