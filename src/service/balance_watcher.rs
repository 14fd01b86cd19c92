//! 余额监控（长期运行模式）
//!
//! 按固定间隔轮询账户余额，余额增加时通过 mpsc 通道发出事件。
//! 只做观察和通知，从不发起转账。

use std::{sync::Arc, time::Duration};

use ethers::types::{Address, U256};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{domain::Asset, infrastructure::ChainRpc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceChange {
    pub previous: U256,
    pub current: U256,
    pub delta: U256,
}

pub struct BalanceWatcher {
    rpc: Arc<dyn ChainRpc>,
    account: Address,
    asset: Asset,
    interval: Duration,
}

impl BalanceWatcher {
    pub fn new(rpc: Arc<dyn ChainRpc>, account: Address, asset: Asset, interval: Duration) -> Self {
        Self {
            rpc,
            account,
            asset,
            interval,
        }
    }

    /// 启动后台轮询任务，返回事件接收端与任务句柄
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<BalanceChange>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(self.run(tx, cancel));
        (rx, handle)
    }

    /// 轮询直到取消或接收端关闭
    pub async fn run(self, tx: mpsc::Sender<BalanceChange>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last: Option<U256> = None;

        tracing::info!(
            account = ?self.account,
            interval_secs = self.interval.as_secs(),
            "Balance watcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = match self.rpc.balance(self.account, &self.asset).await {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::warn!(account = ?self.account, error = %e, "Balance poll failed");
                    continue;
                }
            };

            match last {
                Some(previous) if current > previous => {
                    let change = BalanceChange {
                        previous,
                        current,
                        delta: current - previous,
                    };
                    tracing::info!(
                        account = ?self.account,
                        previous = %previous,
                        current = %current,
                        delta = %change.delta,
                        "Balance increased"
                    );
                    if tx.send(change).await.is_err() {
                        break;
                    }
                }
                Some(previous) if current < previous => {
                    tracing::debug!(account = ?self.account, previous = %previous, current = %current, "Balance decreased");
                }
                _ => {}
            }
            last = Some(current);
        }

        tracing::info!(account = ?self.account, "Balance watcher stopped");
    }
}
