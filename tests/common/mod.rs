//! 测试辅助模块
//! 提供内存链节点、连接器和测试账户

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use disperse::{
    config::Config,
    domain::{Asset, ChainDescriptor, FeeEstimate},
    infrastructure::{ChainRpc, RpcConnector, RpcFailure},
};
use ethers::{
    signers::LocalWallet,
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, H256, U256},
    utils::keccak256,
};

pub const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const TEST_CHAIN_ID: u64 = 31337;

pub fn test_wallet() -> LocalWallet {
    TEST_KEY.parse().expect("valid test key")
}

pub fn test_chain(endpoints: &[&str]) -> ChainDescriptor {
    ChainDescriptor {
        name: "Localnet".into(),
        chain_id: TEST_CHAIN_ID,
        symbol: "LOC".into(),
        endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
        explorer_tx_url: Some("https://explorer.local/tx/{hash}".into()),
    }
}

pub fn test_config(batch_size: usize) -> Config {
    let mut config = Config::default();
    config.dispatch.batch_size = batch_size;
    config.dispatch.max_attempts = 3;
    config.dispatch.retry_base_delay_ms = 1;
    config.dispatch.attempt_timeout_secs = 5;
    config.network.validation_timeout_secs = 2;
    config.network.request_timeout_secs = 2;
    config.network.strict_chain_id = false;
    config
}

pub fn recipients(n: u64) -> Vec<Address> {
    (1..=n).map(|i| Address::from_low_u64_be(0x1000 + i)).collect()
}

/// 已提交交易的记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub nonce: u64,
    pub to: Address,
    pub chain_id: Option<u64>,
    pub hash: H256,
}

/// 内存链节点
pub struct MemoryNode {
    url: String,
    reported_chain_id: u64,
    pub live: AtomicBool,
    pub balance: Mutex<U256>,
    pub pending_nonce: u64,
    /// nonce -> 剩余的失败次数
    pub flaky: Mutex<HashMap<u64, u32>>,
    pub submissions: Mutex<Vec<Submission>>,
    pub accepted: Mutex<Vec<Submission>>,
}

impl MemoryNode {
    pub fn new(url: &str, reported_chain_id: u64, balance: u64, pending_nonce: u64) -> Self {
        Self {
            url: url.to_string(),
            reported_chain_id,
            live: AtomicBool::new(true),
            balance: Mutex::new(U256::from(balance)),
            pending_nonce,
            flaky: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
        }
    }

    pub fn offline(url: &str) -> Self {
        let node = Self::new(url, TEST_CHAIN_ID, 0, 0);
        node.live.store(false, Ordering::SeqCst);
        node
    }

    pub fn fail_nonce(&self, nonce: u64, times: u32) {
        self.flaky.lock().unwrap().insert(nonce, times);
    }

    pub fn submissions_for(&self, nonce: u64) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.nonce == nonce)
            .copied()
            .collect()
    }

    fn ensure_live(&self) -> Result<(), RpcFailure> {
        if self.live.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcFailure::transport(format!("error sending request for url ({})", self.url)))
        }
    }
}

#[async_trait]
impl ChainRpc for MemoryNode {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        self.ensure_live()?;
        Ok(self.reported_chain_id)
    }

    async fn block_number(&self) -> Result<u64, RpcFailure> {
        self.ensure_live()?;
        Ok(19_000_000)
    }

    async fn balance(&self, _owner: Address, _asset: &Asset) -> Result<U256, RpcFailure> {
        self.ensure_live()?;
        Ok(*self.balance.lock().unwrap())
    }

    async fn transaction_count(&self, _owner: Address) -> Result<u64, RpcFailure> {
        self.ensure_live()?;
        Ok(self.pending_nonce)
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, RpcFailure> {
        self.ensure_live()?;
        Ok(FeeEstimate {
            max_fee_per_gas: U256::from(2),
            max_priority_fee_per_gas: U256::from(1),
        })
    }

    async fn token_decimals(&self, _token: Address) -> Result<u8, RpcFailure> {
        self.ensure_live()?;
        Ok(18)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcFailure> {
        self.ensure_live()?;

        let rlp = rlp::Rlp::new(raw.as_ref());
        let (tx, _) = TypedTransaction::decode_signed(&rlp)
            .map_err(|e| RpcFailure::rejected(Some(-32602), e.to_string()))?;
        let submission = Submission {
            nonce: tx.nonce().map(|n| n.as_u64()).unwrap_or_default(),
            to: tx.to_addr().copied().unwrap_or_default(),
            chain_id: tx.chain_id().map(|id| id.as_u64()),
            hash: H256::from(keccak256(&raw)),
        };
        self.submissions.lock().unwrap().push(submission);

        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(&submission.nonce) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RpcFailure::transport("operation timed out"));
                }
            }
        }

        self.accepted.lock().unwrap().push(submission);
        Ok(submission.hash)
    }
}

#[derive(Default)]
pub struct MemoryConnector {
    nodes: HashMap<String, Arc<MemoryNode>>,
}

impl MemoryConnector {
    pub fn with(mut self, node: MemoryNode) -> Self {
        self.nodes.insert(node.url.clone(), Arc::new(node));
        self
    }

    pub fn node(&self, url: &str) -> Arc<MemoryNode> {
        self.nodes[url].clone()
    }
}

impl RpcConnector for MemoryConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainRpc>, RpcFailure> {
        self.nodes
            .get(endpoint)
            .map(|node| node.clone() as Arc<dyn ChainRpc>)
            .ok_or_else(|| RpcFailure::transport(format!("dns error: {}", endpoint)))
    }
}
