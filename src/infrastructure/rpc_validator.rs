// RPC 端点校验模块 - 防止失效或冒充其他链的节点进入会话

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

use super::rpc_client::{ChainRpc, RpcConnector, RpcFailure};
use crate::{
    domain::{Asset, ChainDescriptor, FeeEstimate},
    error::{DisperseError, Result},
};

/// 固定网络身份的装饰器：`chain_id()` 始终返回目录中的值，不访问节点
pub struct PinnedChainRpc {
    inner: Arc<dyn ChainRpc>,
    chain_id: u64,
}

impl PinnedChainRpc {
    pub fn new(inner: Arc<dyn ChainRpc>, chain_id: u64) -> Self {
        Self { inner, chain_id }
    }
}

#[async_trait]
impl ChainRpc for PinnedChainRpc {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    async fn chain_id(&self) -> std::result::Result<u64, RpcFailure> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> std::result::Result<u64, RpcFailure> {
        self.inner.block_number().await
    }

    async fn balance(&self, owner: Address, asset: &Asset) -> std::result::Result<U256, RpcFailure> {
        self.inner.balance(owner, asset).await
    }

    async fn transaction_count(&self, owner: Address) -> std::result::Result<u64, RpcFailure> {
        self.inner.transaction_count(owner).await
    }

    async fn fee_estimate(&self) -> std::result::Result<FeeEstimate, RpcFailure> {
        self.inner.fee_estimate().await
    }

    async fn token_decimals(&self, token: Address) -> std::result::Result<u8, RpcFailure> {
        self.inner.token_decimals(token).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> std::result::Result<H256, RpcFailure> {
        self.inner.send_raw_transaction(raw).await
    }
}

/// 通过校验的端点
pub struct ValidatedEndpoint {
    pub url: String,
    pub rpc: Arc<dyn ChainRpc>,
    pub block_height: u64,
    pub latency: Duration,
}

impl std::fmt::Debug for ValidatedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedEndpoint")
            .field("url", &self.url)
            .field("block_height", &self.block_height)
            .field("latency", &self.latency)
            .finish()
    }
}

/// 端点校验器
pub struct EndpointValidator {
    connector: Arc<dyn RpcConnector>,
    timeout: Duration,
    strict_chain_id: bool,
}

impl EndpointValidator {
    pub fn new(connector: Arc<dyn RpcConnector>, timeout: Duration) -> Self {
        Self {
            connector,
            timeout,
            strict_chain_id: false,
        }
    }

    /// 严格模式：节点自报 chain id 不一致时拒绝
    pub fn strict(mut self, strict_chain_id: bool) -> Self {
        self.strict_chain_id = strict_chain_id;
        self
    }

    /// 连接 -> 确认身份 -> 查询区块高度
    pub async fn validate(&self, endpoint: &str, chain: &ChainDescriptor) -> Result<ValidatedEndpoint> {
        let unreachable_err = |reason: String| DisperseError::EndpointUnreachable {
            endpoint: endpoint.to_string(),
            reason,
        };

        let start = Instant::now();
        let inner = self
            .connector
            .connect(endpoint)
            .map_err(|e| unreachable_err(e.to_string()))?;

        let reported = self
            .bounded(inner.chain_id())
            .await
            .map_err(|e| unreachable_err(format!("identity check failed: {}", e)))?;

        if reported != chain.chain_id {
            if self.strict_chain_id {
                return Err(DisperseError::ChainIdMismatch {
                    endpoint: endpoint.to_string(),
                    expected: chain.chain_id,
                    reported,
                });
            }
            tracing::warn!(
                endpoint = %endpoint,
                expected = chain.chain_id,
                reported = reported,
                "Endpoint reports a different chain id, pinning expected identity"
            );
        }

        let rpc: Arc<dyn ChainRpc> = Arc::new(PinnedChainRpc::new(inner, chain.chain_id));
        let block_height = self
            .bounded(rpc.block_number())
            .await
            .map_err(|e| unreachable_err(format!("block height query failed: {}", e)))?;

        Ok(ValidatedEndpoint {
            url: endpoint.to_string(),
            rpc,
            block_height,
            latency: start.elapsed(),
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> std::result::Result<T, RpcFailure>
    where
        F: std::future::Future<Output = std::result::Result<T, RpcFailure>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RpcFailure::transport(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}
