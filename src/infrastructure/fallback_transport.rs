use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use futures::future::join_all;
use serde::Serialize;

use super::{
    rpc_client::{ChainRpc, RpcFailure},
    rpc_validator::{EndpointValidator, ValidatedEndpoint},
};
use crate::{
    domain::{Asset, ChainDescriptor, FeeEstimate},
    error::{DisperseError, Result},
};

const OPEN_THRESHOLD: u64 = 3;
const ALPHA: f64 = 0.3; // EMA alpha for latency averaging
/// 单个端点单次调用的默认等待上限
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// 单个端点的运行期健康统计
#[derive(Clone, Debug, Serialize)]
pub struct EndpointHealth {
    pub url: String,
    pub priority: u64, // 目录中的声明顺序
    pub fail_count: u64,
    pub avg_latency_ms: u64,
    pub last_latency_ms: u64,
}

impl EndpointHealth {
    fn score(&self) -> (bool, u64) {
        (
            self.fail_count >= OPEN_THRESHOLD,
            self.priority * 100 + self.avg_latency_ms,
        )
    }
}

/// 单个端点的校验结果
#[derive(Clone, Debug, Serialize)]
pub struct EndpointReport {
    pub url: String,
    pub live: bool,
    pub block_height: Option<u64>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub endpoints: Vec<EndpointReport>,
}

impl ValidationReport {
    pub fn live_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.live).count()
    }
}

/// 多端点容错传输层
///
/// 每次调用按健康评分依次尝试候选端点，只有全部端点网络层失败时才返回错误。
/// 节点返回的 JSON-RPC 错误视为确定答复，直接返回调用方。
/// 每个端点的单次调用受 `call_timeout` 约束，超时按网络层失败处理并切换到下一个端点。
pub struct FallbackTransport {
    chain_name: String,
    chain_id: u64,
    endpoints: Vec<ValidatedEndpoint>,
    health: Mutex<Vec<EndpointHealth>>,
    call_timeout: Duration,
}

/// 在途的单端点调用；未结算就被丢弃（上层超时取消）时记为失败
struct InFlight<'a> {
    transport: &'a FallbackTransport,
    idx: usize,
    start: Instant,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(transport: &'a FallbackTransport, idx: usize) -> Self {
        Self {
            transport,
            idx,
            start: Instant::now(),
            settled: false,
        }
    }

    fn settle(mut self, ok: bool) {
        self.settled = true;
        self.transport
            .record(self.idx, self.start.elapsed().as_millis() as u64, ok);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let latency_ms = self.start.elapsed().as_millis() as u64;
            if let Some(endpoint) = self.transport.endpoints.get(self.idx) {
                tracing::debug!(endpoint = %endpoint.url, latency_ms, "rpc call cancelled in flight");
            }
            self.transport.record(self.idx, latency_ms, false);
        }
    }
}

impl FallbackTransport {
    /// 并发校验目录中的全部端点，聚合通过校验的子集
    pub async fn connect(
        chain: &ChainDescriptor,
        validator: &EndpointValidator,
    ) -> Result<(Self, ValidationReport)> {
        let results = join_all(
            chain
                .endpoints
                .iter()
                .map(|endpoint| validator.validate(endpoint, chain)),
        )
        .await;

        let mut report = ValidationReport::default();
        let mut live = Vec::new();
        for (endpoint, result) in chain.endpoints.iter().zip(results) {
            match result {
                Ok(validated) => {
                    crate::metrics::inc_endpoint_validation(true);
                    tracing::info!(
                        chain = %chain.name,
                        endpoint = %endpoint,
                        block_height = validated.block_height,
                        latency_ms = validated.latency.as_millis() as u64,
                        "endpoint_validated"
                    );
                    report.endpoints.push(EndpointReport {
                        url: endpoint.clone(),
                        live: true,
                        block_height: Some(validated.block_height),
                        latency_ms: Some(validated.latency.as_millis() as u64),
                        error: None,
                    });
                    live.push(validated);
                }
                Err(e) => {
                    crate::metrics::inc_endpoint_validation(false);
                    tracing::warn!(
                        chain = %chain.name,
                        endpoint = %endpoint,
                        error = %e,
                        "endpoint_rejected"
                    );
                    report.endpoints.push(EndpointReport {
                        url: endpoint.clone(),
                        live: false,
                        block_height: None,
                        latency_ms: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let transport = Self::from_validated(chain, live)?;
        Ok((transport, report))
    }

    /// 零个可用端点时失败（会话致命错误）
    pub fn from_validated(chain: &ChainDescriptor, endpoints: Vec<ValidatedEndpoint>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(DisperseError::NoLiveEndpoints {
                chain: chain.name.clone(),
                tried: chain.endpoints.len(),
            });
        }

        let health = endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| EndpointHealth {
                url: e.url.clone(),
                priority: i as u64,
                fail_count: 0,
                avg_latency_ms: e.latency.as_millis() as u64,
                last_latency_ms: e.latency.as_millis() as u64,
            })
            .collect();

        Ok(Self {
            chain_name: chain.name.clone(),
            chain_id: chain.chain_id,
            endpoints,
            health: Mutex::new(health),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    /// 设置单端点调用的等待上限（应小于上层的单次尝试超时）
    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub fn pinned_chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn live_endpoints(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.url.as_str()).collect()
    }

    pub fn health(&self) -> Vec<EndpointHealth> {
        match self.health.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn candidate_order(&self) -> Vec<usize> {
        let health = self.health();
        let mut order: Vec<usize> = (0..health.len()).collect();
        order.sort_by_key(|&i| health[i].score());
        order
    }

    fn record(&self, idx: usize, latency_ms: u64, ok: bool) {
        crate::metrics::observe_rpc_latency_ms(latency_ms as u128, ok);
        let mut health = match self.health.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(h) = health.get_mut(idx) else {
            return;
        };
        if ok {
            h.fail_count = 0;
            h.last_latency_ms = latency_ms;
            h.avg_latency_ms = if h.avg_latency_ms == 0 {
                latency_ms
            } else {
                (ALPHA * latency_ms as f64 + (1.0 - ALPHA) * h.avg_latency_ms as f64) as u64
            };
        } else {
            h.fail_count += 1;
            if h.fail_count == OPEN_THRESHOLD {
                tracing::warn!(endpoint = %h.url, fail_count = h.fail_count, "rpc endpoint demoted");
            }
        }
    }

    async fn call<T, F, Fut>(&self, method: &'static str, f: F) -> std::result::Result<T, RpcFailure>
    where
        F: Fn(Arc<dyn ChainRpc>) -> Fut,
        Fut: Future<Output = std::result::Result<T, RpcFailure>>,
    {
        let mut last_error: Option<RpcFailure> = None;

        for (position, idx) in self.candidate_order().into_iter().enumerate() {
            let endpoint = &self.endpoints[idx];
            let in_flight = InFlight::new(self, idx);
            let result = match tokio::time::timeout(self.call_timeout, f(endpoint.rpc.clone())).await {
                Ok(result) => result,
                Err(_) => Err(RpcFailure::transport(format!(
                    "{} timed out after {}ms",
                    method,
                    self.call_timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => {
                    in_flight.settle(true);
                    if position > 0 {
                        crate::metrics::inc_rpc_fallback();
                        tracing::debug!(method, endpoint = %endpoint.url, "rpc call served by fallback endpoint");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transport() => {
                    in_flight.settle(false);
                    tracing::warn!(method, endpoint = %endpoint.url, error = %e, "rpc call failed, trying next endpoint");
                    last_error = Some(e);
                }
                Err(e) => {
                    // 节点存活，只是拒绝了请求
                    in_flight.settle(true);
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RpcFailure::transport("no endpoints available")))
    }
}

#[async_trait]
impl ChainRpc for FallbackTransport {
    fn endpoint(&self) -> &str {
        self.endpoints
            .first()
            .map(|e| e.url.as_str())
            .unwrap_or_default()
    }

    async fn chain_id(&self) -> std::result::Result<u64, RpcFailure> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> std::result::Result<u64, RpcFailure> {
        self.call("eth_blockNumber", |rpc| async move { rpc.block_number().await })
            .await
    }

    async fn balance(&self, owner: Address, asset: &Asset) -> std::result::Result<U256, RpcFailure> {
        let asset = *asset;
        self.call("eth_getBalance", move |rpc| async move {
            rpc.balance(owner, &asset).await
        })
        .await
    }

    async fn transaction_count(&self, owner: Address) -> std::result::Result<u64, RpcFailure> {
        self.call("eth_getTransactionCount", move |rpc| async move {
            rpc.transaction_count(owner).await
        })
        .await
    }

    async fn fee_estimate(&self) -> std::result::Result<FeeEstimate, RpcFailure> {
        self.call("eth_feeHistory", |rpc| async move { rpc.fee_estimate().await })
            .await
    }

    async fn token_decimals(&self, token: Address) -> std::result::Result<u8, RpcFailure> {
        self.call("decimals", move |rpc| async move { rpc.token_decimals(token).await })
            .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> std::result::Result<H256, RpcFailure> {
        self.call("eth_sendRawTransaction", |rpc| {
            let raw = raw.clone();
            async move { rpc.send_raw_transaction(raw).await }
        })
        .await
    }
}
