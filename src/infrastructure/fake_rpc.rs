//! 测试用内存链（仅 cfg(test)）

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, H256, U256},
    utils::keccak256,
};

use super::rpc_client::{ChainRpc, RpcConnector, RpcFailure};
use crate::domain::{Asset, FeeEstimate, GasParams, TransactionIntent};

const SIGNER_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub struct FakeRpc {
    url: String,
    reported_chain_id: u64,
    pub live: AtomicBool,
    pub balance: Mutex<U256>,
    pub token_balance: Mutex<U256>,
    pub tx_count: AtomicU64,
    pub fee: FeeEstimate,
    /// nonce -> 成功前需失败的次数
    pub send_failures: Mutex<HashMap<u64, u32>>,
    pub always_reject: Mutex<HashSet<u64>>,
    pub send_delay: Mutex<HashMap<u64, Duration>>,
    pub sent: Mutex<Vec<u64>>,
    pub accepted: Mutex<Vec<(u64, Address)>>,
    pub calls: AtomicUsize,
    pub tx_count_reads: AtomicUsize,
}

impl FakeRpc {
    pub fn new(url: &str, reported_chain_id: u64) -> Self {
        Self {
            url: url.to_string(),
            reported_chain_id,
            live: AtomicBool::new(true),
            balance: Mutex::new(U256::zero()),
            token_balance: Mutex::new(U256::zero()),
            tx_count: AtomicU64::new(0),
            fee: FeeEstimate {
                max_fee_per_gas: U256::from(10),
                max_priority_fee_per_gas: U256::from(1),
            },
            send_failures: Mutex::new(HashMap::new()),
            always_reject: Mutex::new(HashSet::new()),
            send_delay: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            tx_count_reads: AtomicUsize::new(0),
        }
    }

    pub fn down(url: &str, reported_chain_id: u64) -> Self {
        let rpc = Self::new(url, reported_chain_id);
        rpc.live.store(false, Ordering::SeqCst);
        rpc
    }

    pub fn with_balance(self, balance: u64) -> Self {
        *self.balance.lock().unwrap() = U256::from(balance);
        self
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        self.tx_count.store(nonce, Ordering::SeqCst);
        self
    }

    pub fn fail_times(&self, nonce: u64, times: u32) {
        self.send_failures.lock().unwrap().insert(nonce, times);
    }

    pub fn delay(&self, nonce: u64, delay: Duration) {
        self.send_delay.lock().unwrap().insert(nonce, delay);
    }

    pub fn attempts_for(&self, nonce: u64) -> usize {
        self.sent.lock().unwrap().iter().filter(|n| **n == nonce).count()
    }

    fn check_live(&self) -> Result<(), RpcFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.live.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcFailure::transport(format!("{} connection refused", self.url)))
        }
    }
}

/// 链 5 上一笔已签名的原生币转账
pub fn signed_raw(nonce: u64, to: Address) -> Bytes {
    let wallet = SIGNER_KEY.parse::<LocalWallet>().unwrap().with_chain_id(5u64);
    let gas = GasParams {
        gas_limit: 21_000,
        max_fee_per_gas: U256::from(10),
        max_priority_fee_per_gas: U256::from(1),
    };
    let tx = TransactionIntent::new(&Asset::Native, to, U256::one(), nonce, gas)
        .to_typed_transaction(wallet.address(), 5);
    let signature = wallet.sign_transaction_sync(&tx).unwrap();
    tx.rlp_signed(&signature)
}

pub fn decode_raw(raw: &Bytes) -> (u64, Address) {
    let rlp = rlp::Rlp::new(raw.as_ref());
    let (tx, _signature) = TypedTransaction::decode_signed(&rlp).expect("valid signed tx");
    let nonce = tx.nonce().expect("nonce set").as_u64();
    let to = *tx.to_addr().expect("to set");
    (nonce, to)
}

#[async_trait]
impl ChainRpc for FakeRpc {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        self.check_live()?;
        Ok(self.reported_chain_id)
    }

    async fn block_number(&self) -> Result<u64, RpcFailure> {
        self.check_live()?;
        Ok(1_000)
    }

    async fn balance(&self, _owner: Address, asset: &Asset) -> Result<U256, RpcFailure> {
        self.check_live()?;
        match asset {
            Asset::Native => Ok(*self.balance.lock().unwrap()),
            Asset::Token(_) => Ok(*self.token_balance.lock().unwrap()),
        }
    }

    async fn transaction_count(&self, _owner: Address) -> Result<u64, RpcFailure> {
        self.check_live()?;
        self.tx_count_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.tx_count.load(Ordering::SeqCst))
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, RpcFailure> {
        self.check_live()?;
        Ok(self.fee)
    }

    async fn token_decimals(&self, _token: Address) -> Result<u8, RpcFailure> {
        self.check_live()?;
        Ok(6)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcFailure> {
        self.check_live()?;
        let (nonce, to) = decode_raw(&raw);
        self.sent.lock().unwrap().push(nonce);

        let delay = self.send_delay.lock().unwrap().get(&nonce).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.always_reject.lock().unwrap().contains(&nonce) {
            return Err(RpcFailure::rejected(Some(-32000), "replacement transaction underpriced"));
        }

        {
            let mut failures = self.send_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&nonce) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RpcFailure::transport("request timed out"));
                }
            }
        }

        self.accepted.lock().unwrap().push((nonce, to));
        Ok(H256::from(keccak256(&raw)))
    }
}

/// 按 URL 返回预置 FakeRpc 的连接器
#[derive(Default)]
pub struct FakeConnector {
    pub nodes: HashMap<String, Arc<FakeRpc>>,
}

impl FakeConnector {
    pub fn with(mut self, rpc: FakeRpc) -> Self {
        self.nodes.insert(rpc.url.clone(), Arc::new(rpc));
        self
    }

    pub fn node(&self, url: &str) -> Arc<FakeRpc> {
        self.nodes[url].clone()
    }
}

impl RpcConnector for FakeConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainRpc>, RpcFailure> {
        match self.nodes.get(endpoint) {
            Some(node) => Ok(node.clone() as Arc<dyn ChainRpc>),
            None => Err(RpcFailure::transport(format!("unknown host {}", endpoint))),
        }
    }
}
