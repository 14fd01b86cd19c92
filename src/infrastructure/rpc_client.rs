// RPC 客户端 - 派发引擎对链的唯一依赖面
// 生产实现基于 ethers Provider<Http>，测试中替换为内存实现

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    abi::{self, ParamType, Token},
    providers::{Http, Middleware, Provider, ProviderError, RpcError},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, TransactionRequest,
        H256, U256,
    },
    utils::id,
};

use crate::domain::{Asset, FeeEstimate};

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 网络层失败：连接、超时、HTTP 错误、无法解析的响应
    Transport,
    /// 节点正常响应但返回 JSON-RPC 错误
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure {
    pub kind: FailureKind,
    pub code: Option<i64>,
    pub message: String,
}

impl RpcFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            code: None,
            message: message.into(),
        }
    }

    pub fn rejected(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Rejected,
            code,
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        self.kind == FailureKind::Transport
    }
}

impl fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "RPC error {}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RpcFailure {}

impl From<ProviderError> for RpcFailure {
    fn from(err: ProviderError) -> Self {
        if let Some(resp) = err.as_error_response() {
            return RpcFailure::rejected(Some(resp.code), resp.message.clone());
        }
        RpcFailure::transport(err.to_string())
    }
}

/// 链能力接口
#[async_trait]
pub trait ChainRpc: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn chain_id(&self) -> Result<u64, RpcFailure>;

    async fn block_number(&self) -> Result<u64, RpcFailure>;

    async fn balance(&self, owner: Address, asset: &Asset) -> Result<U256, RpcFailure>;

    /// pending 状态下的交易计数
    async fn transaction_count(&self, owner: Address) -> Result<u64, RpcFailure>;

    async fn fee_estimate(&self) -> Result<FeeEstimate, RpcFailure>;

    async fn token_decimals(&self, token: Address) -> Result<u8, RpcFailure>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcFailure>;
}

/// 端点 URL -> ChainRpc 句柄
pub trait RpcConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainRpc>, RpcFailure>;
}

/// ethers HTTP 实现
pub struct EthersRpc {
    url: String,
    provider: Provider<Http>,
}

impl EthersRpc {
    pub fn connect(url: &str, request_timeout: Duration) -> Result<Self, RpcFailure> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| RpcFailure::transport(format!("invalid endpoint url: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| RpcFailure::transport(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            provider: Provider::new(Http::new_with_client(parsed, client)),
        })
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Bytes, RpcFailure> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        Ok(self.provider.call(&tx, None).await?)
    }
}

fn decode_uint(output: &[u8]) -> Result<U256, RpcFailure> {
    match abi::decode(&[ParamType::Uint(256)], output) {
        Ok(tokens) => match tokens.into_iter().next() {
            Some(Token::Uint(value)) => Ok(value),
            _ => Err(RpcFailure::transport("unexpected eth_call return type")),
        },
        Err(e) => Err(RpcFailure::transport(format!(
            "failed to decode eth_call output: {}",
            e
        ))),
    }
}

#[async_trait]
impl ChainRpc for EthersRpc {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64, RpcFailure> {
        Ok(self.provider.get_chainid().await?.low_u64())
    }

    async fn block_number(&self) -> Result<u64, RpcFailure> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn balance(&self, owner: Address, asset: &Asset) -> Result<U256, RpcFailure> {
        match asset {
            Asset::Native => Ok(self.provider.get_balance(owner, None).await?),
            Asset::Token(token) => {
                let mut data = id("balanceOf(address)").to_vec();
                data.extend(abi::encode(&[Token::Address(owner)]));
                let output = self.eth_call(*token, data).await?;
                decode_uint(&output)
            }
        }
    }

    async fn transaction_count(&self, owner: Address) -> Result<u64, RpcFailure> {
        let count = self
            .provider
            .get_transaction_count(owner, Some(BlockNumber::Pending.into()))
            .await?;
        Ok(count.low_u64())
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, RpcFailure> {
        match self.provider.estimate_eip1559_fees(None).await {
            Ok((max_fee_per_gas, max_priority_fee_per_gas)) => Ok(FeeEstimate {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }),
            Err(e) => {
                // 部分链不支持 eth_feeHistory，退回 gas price
                tracing::debug!(endpoint = %self.url, error = %e, "eip1559 fee estimate unavailable, using gas price");
                let gas_price = self.provider.get_gas_price().await?;
                Ok(FeeEstimate {
                    max_fee_per_gas: gas_price,
                    max_priority_fee_per_gas: gas_price,
                })
            }
        }
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, RpcFailure> {
        let output = self.eth_call(token, id("decimals()").to_vec()).await?;
        let decimals = decode_uint(&output)?;
        if decimals > U256::from(u8::MAX) {
            return Err(RpcFailure::transport(format!(
                "token decimals out of range: {}",
                decimals
            )));
        }
        Ok(decimals.low_u32() as u8)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcFailure> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(*pending)
    }
}

/// 生产连接器
pub struct EthersConnector {
    request_timeout: Duration,
}

impl EthersConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl RpcConnector for EthersConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainRpc>, RpcFailure> {
        Ok(Arc::new(EthersRpc::connect(endpoint, self.request_timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_rejects_malformed_url() {
        let err = EthersRpc::connect("not a url", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.is_transport());
        assert!(err.message.contains("invalid endpoint url"));
    }

    #[test]
    fn test_connect_is_lazy() {
        // 构造不发起网络请求
        let rpc = EthersRpc::connect("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        assert_eq!(rpc.endpoint(), "http://127.0.0.1:1");
    }

    #[test]
    fn test_decode_uint() {
        let encoded = abi::encode(&[Token::Uint(U256::from(18))]);
        assert_eq!(decode_uint(&encoded).unwrap(), U256::from(18));
        assert!(decode_uint(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_failure_display() {
        let failure = RpcFailure::rejected(Some(-32000), "nonce too low");
        assert_eq!(failure.to_string(), "RPC error -32000: nonce too low");
        assert!(!failure.is_transport());
    }
}
