//! 结果汇总
//! 收集全部 TransactionOutcome，生成会话唯一的不可变摘要

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use ethers::{
    types::{Address, H256, U256},
    utils::to_checksum,
};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{Asset, ChainDescriptor, FailureCode, TransactionOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessRecord {
    pub recipient: Address,
    pub nonce: u64,
    pub tx_hash: H256,
    pub attempts_used: u32,
    pub explorer_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub recipient: Address,
    pub nonce: u64,
    pub reason: String,
    pub error_code: FailureCode,
    pub attempts_used: u32,
}

/// 会话摘要
#[derive(Debug, Clone, Serialize)]
pub struct DispersalSummary {
    pub session_id: Uuid,
    pub network: String,
    pub chain_id: u64,
    pub sender: Address,
    pub asset: Asset,
    pub per_recipient: U256,
    pub successes: Vec<SuccessRecord>,
    pub failures: Vec<FailureRecord>,
    /// 取消后未尝试的收款人
    pub skipped: Vec<Address>,
    pub total_committed: U256,
    /// 百分比，0-100
    pub success_rate: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DispersalSummary {
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn attempted(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// 终端文本输出
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Network:        {} (chain id {})", self.network, self.chain_id);
        let _ = writeln!(out, "Sender:         {}", to_checksum(&self.sender, None));
        match self.asset {
            Asset::Native => {
                let _ = writeln!(out, "Asset:          native");
            }
            Asset::Token(token) => {
                let _ = writeln!(out, "Asset:          token {}", to_checksum(&token, None));
            }
        }
        let _ = writeln!(out, "Per recipient:  {}", self.per_recipient);
        let _ = writeln!(out, "Committed:      {}", self.total_committed);
        let _ = writeln!(
            out,
            "Succeeded:      {} / {} ({:.2}%)",
            self.success_count(),
            self.attempted(),
            self.success_rate
        );

        for success in &self.successes {
            let _ = writeln!(
                out,
                "  ok   nonce={} {} {:?}{}",
                success.nonce,
                to_checksum(&success.recipient, None),
                success.tx_hash,
                success
                    .explorer_link
                    .as_ref()
                    .map(|link| format!(" {}", link))
                    .unwrap_or_default()
            );
        }

        for failure in &self.failures {
            let _ = writeln!(
                out,
                "  FAIL nonce={} {} [{}] after {} attempt(s): {}",
                failure.nonce,
                to_checksum(&failure.recipient, None),
                failure.error_code,
                failure.attempts_used,
                failure.reason
            );
        }

        if !self.skipped.is_empty() {
            let _ = writeln!(out, "Skipped (cancelled): {}", self.skipped.len());
        }
        out
    }
}

pub struct ResultAggregator {
    session_id: Uuid,
    chain: ChainDescriptor,
    sender: Address,
    asset: Asset,
    per_recipient: U256,
    started_at: DateTime<Utc>,
    successes: Vec<SuccessRecord>,
    failures: Vec<FailureRecord>,
    skipped: Vec<Address>,
}

impl ResultAggregator {
    pub fn new(chain: &ChainDescriptor, sender: Address, asset: Asset, per_recipient: U256) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            chain: chain.clone(),
            sender,
            asset,
            per_recipient,
            started_at: Utc::now(),
            successes: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn record(&mut self, outcome: TransactionOutcome) {
        match outcome {
            TransactionOutcome::Success {
                recipient,
                nonce,
                tx_hash,
                attempts_used,
            } => self.successes.push(SuccessRecord {
                recipient,
                nonce,
                tx_hash,
                attempts_used,
                explorer_link: self.chain.explorer_link(&format!("{:?}", tx_hash)),
            }),
            TransactionOutcome::Failure {
                recipient,
                nonce,
                reason,
                error_code,
                attempts_used,
            } => self.failures.push(FailureRecord {
                recipient,
                nonce,
                reason,
                error_code,
                attempts_used,
            }),
        }
    }

    pub fn record_all<I: IntoIterator<Item = TransactionOutcome>>(&mut self, outcomes: I) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    pub fn skip<I: IntoIterator<Item = Address>>(&mut self, recipients: I) {
        self.skipped.extend(recipients);
    }

    pub fn finish(self) -> DispersalSummary {
        let successes = self.successes.len();
        let attempted = successes + self.failures.len();
        let success_rate = if attempted == 0 {
            0.0
        } else {
            100.0 * successes as f64 / attempted as f64
        };
        let total_committed = self.per_recipient.saturating_mul(U256::from(successes));

        DispersalSummary {
            session_id: self.session_id,
            network: self.chain.name,
            chain_id: self.chain.chain_id,
            sender: self.sender,
            asset: self.asset,
            per_recipient: self.per_recipient,
            successes: self.successes,
            failures: self.failures,
            skipped: self.skipped,
            total_committed,
            success_rate,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ChainDescriptor {
        ChainDescriptor {
            name: "Sepolia".into(),
            chain_id: 11155111,
            symbol: "SEP".into(),
            endpoints: vec![],
            explorer_tx_url: Some("https://sepolia.etherscan.io/tx/{hash}".into()),
        }
    }

    fn success(n: u64) -> TransactionOutcome {
        TransactionOutcome::Success {
            recipient: Address::from_low_u64_be(n),
            nonce: n,
            tx_hash: H256::from_low_u64_be(n),
            attempts_used: 1,
        }
    }

    fn failure(n: u64) -> TransactionOutcome {
        TransactionOutcome::Failure {
            recipient: Address::from_low_u64_be(n),
            nonce: n,
            reason: "request timed out".into(),
            error_code: FailureCode::Timeout,
            attempts_used: 3,
        }
    }

    #[test]
    fn test_totals_and_rate() {
        let mut aggregator =
            ResultAggregator::new(&chain(), Address::zero(), Asset::Native, U256::from(7));
        aggregator.record_all(vec![success(0), failure(1), success(2), success(3)]);
        let summary = aggregator.finish();

        assert_eq!(summary.success_count(), 3);
        assert_eq!(summary.failure_count(), 1);
        assert_eq!(summary.total_committed, U256::from(21));
        assert!((summary.success_rate - 75.0).abs() < f64::EPSILON);
        assert_eq!(summary.failures[0].error_code, FailureCode::Timeout);
        assert_eq!(summary.failures[0].attempts_used, 3);
    }

    #[test]
    fn test_explorer_links() {
        let mut aggregator =
            ResultAggregator::new(&chain(), Address::zero(), Asset::Native, U256::one());
        aggregator.record(success(1));
        let summary = aggregator.finish();

        let link = summary.successes[0].explorer_link.clone().unwrap();
        assert!(link.starts_with("https://sepolia.etherscan.io/tx/0x"));
        assert!(link.ends_with("01"));
    }

    #[test]
    fn test_empty_session_rate_is_zero() {
        let mut aggregator =
            ResultAggregator::new(&chain(), Address::zero(), Asset::Native, U256::one());
        aggregator.skip(vec![Address::from_low_u64_be(9)]);
        let summary = aggregator.finish();

        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.total_committed, U256::zero());
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.render_text().contains("Skipped (cancelled): 1"));
    }

    #[test]
    fn test_summary_serializes() {
        let mut aggregator =
            ResultAggregator::new(&chain(), Address::zero(), Asset::Native, U256::one());
        aggregator.record(failure(4));
        let json = serde_json::to_value(aggregator.finish()).unwrap();

        assert_eq!(json["network"], "Sepolia");
        assert_eq!(json["failures"][0]["error_code"], "timeout");
    }
}
