//! 派发会话编排
//!
//! `prepare` 完成端点校验、Gas 解析和金额计算，所有致命错误都在这里产生，
//! 此时尚未构造任何交易；`run` 负责派发与汇总。

use std::sync::Arc;

use ethers::{
    signers::{LocalWallet, Signer},
    types::Address,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    batch_dispatcher::BatchDispatcher,
    nonce_manager::NonceSequencer,
    payout_calculator::{parse_amount, PayoutCalculator, PayoutMode, PayoutPlan},
    result_aggregator::{DispersalSummary, ResultAggregator},
};
use crate::{
    config::Config,
    domain::{transfer::NATIVE_DECIMALS, Asset, ChainDescriptor, GasConfig, GasParams},
    error::{DisperseError, Result},
    infrastructure::{ChainRpc, EndpointValidator, FallbackTransport, RpcConnector, ValidationReport},
    security::signer::bind_chain,
};

/// 金额请求：固定十进制金额，或需用户确认的余额均分
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutRequest {
    Fixed(String),
    EqualSplit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub asset: Asset,
    pub payout: PayoutRequest,
    pub gas: GasConfig,
}

/// 按配置解析 Gas 参数；默认模式只读取一次 fee 估算
pub async fn resolve_gas(rpc: &dyn ChainRpc, asset: &Asset, config: GasConfig) -> Result<GasParams> {
    match config {
        GasConfig::Explicit {
            max_fee_per_gas,
            max_priority_fee_per_gas,
            gas_limit,
        } => Ok(GasParams {
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }),
        GasConfig::Default => {
            let estimate = rpc.fee_estimate().await.map_err(|e| DisperseError::Rpc {
                call: "fee_estimate",
                reason: e.to_string(),
            })?;
            Ok(GasParams::from_estimate(asset, estimate))
        }
    }
}

pub struct DispersalSession {
    id: Uuid,
    chain: ChainDescriptor,
    transport: Arc<FallbackTransport>,
    validation: ValidationReport,
    wallet: LocalWallet,
    recipients: Vec<Address>,
    asset: Asset,
    gas: GasParams,
    plan: PayoutPlan,
    config: Config,
}

impl DispersalSession {
    pub async fn prepare(
        descriptor: &ChainDescriptor,
        connector: Arc<dyn RpcConnector>,
        wallet: LocalWallet,
        recipients: Vec<Address>,
        request: SendRequest,
        config: &Config,
    ) -> Result<Self> {
        if recipients.is_empty() {
            return Err(DisperseError::NoRecipients);
        }

        let id = Uuid::new_v4();
        let span = tracing::info_span!("dispersal", session_id = %id, chain = %descriptor.name);
        Self::build(id, descriptor, connector, wallet, recipients, request, config)
            .instrument(span)
            .await
    }

    async fn build(
        id: Uuid,
        descriptor: &ChainDescriptor,
        connector: Arc<dyn RpcConnector>,
        wallet: LocalWallet,
        recipients: Vec<Address>,
        request: SendRequest,
        config: &Config,
    ) -> Result<Self> {
        let validator = EndpointValidator::new(connector, config.network.validation_timeout())
            .strict(config.network.strict_chain_id);
        let (transport, validation) = FallbackTransport::connect(descriptor, &validator).await?;
        let transport = Arc::new(transport.call_timeout(config.network.request_timeout()));
        tracing::info!(
            live = validation.live_count(),
            declared = descriptor.endpoints.len(),
            "Transport ready"
        );

        let wallet = bind_chain(wallet, descriptor.chain_id);
        let asset = request.asset;
        let gas = resolve_gas(transport.as_ref(), &asset, request.gas).await?;

        let mode = match &request.payout {
            PayoutRequest::EqualSplit => PayoutMode::EqualSplit,
            PayoutRequest::Fixed(text) => {
                let decimals = match asset {
                    Asset::Native => NATIVE_DECIMALS,
                    Asset::Token(token) => transport.token_decimals(token).await.map_err(|e| {
                        DisperseError::Rpc {
                            call: "decimals",
                            reason: e.to_string(),
                        }
                    })?,
                };
                PayoutMode::Fixed(parse_amount(text, decimals)?)
            }
        };

        let plan = PayoutCalculator::new(transport.clone(), wallet.address(), asset)
            .calculate(mode, recipients.len(), &gas)
            .await?;

        Ok(Self {
            id,
            chain: descriptor.clone(),
            transport,
            validation,
            wallet,
            recipients,
            asset,
            gas,
            plan,
            config: config.clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn plan(&self) -> &PayoutPlan {
        &self.plan
    }

    pub fn gas(&self) -> &GasParams {
        &self.gas
    }

    pub fn validation_report(&self) -> &ValidationReport {
        &self.validation
    }

    pub fn transport(&self) -> &FallbackTransport {
        &self.transport
    }

    pub fn sender(&self) -> Address {
        self.wallet.address()
    }

    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    /// 派发并汇总；取消只在批与批之间生效
    pub async fn run(self, cancel: CancellationToken) -> Result<DispersalSummary> {
        let span = tracing::info_span!("dispersal", session_id = %self.id, chain = %self.chain.name);
        self.dispatch_all(cancel).instrument(span).await
    }

    async fn dispatch_all(self, cancel: CancellationToken) -> Result<DispersalSummary> {
        let sender = self.wallet.address();
        let sequencer = Arc::new(NonceSequencer::new(sender, self.transport.clone()));
        let dispatcher = BatchDispatcher::new(
            self.transport.clone(),
            sequencer,
            self.wallet,
            self.asset,
            self.gas,
        )
        .batch_size(self.config.dispatch.batch_size)
        .retry_policy(self.config.dispatch.retry_policy());

        tracing::info!(
            recipients = self.recipients.len(),
            per_recipient = %self.plan.per_recipient,
            batch_size = self.config.dispatch.batch_size,
            "Starting dispersal"
        );

        // 开始时间在派发前确定
        let mut aggregator =
            ResultAggregator::new(&self.chain, sender, self.asset, self.plan.per_recipient)
                .session_id(self.id);

        let report = dispatcher
            .dispatch(&self.recipients, self.plan.per_recipient, &cancel)
            .await?;

        aggregator.record_all(report.outcomes);
        aggregator.skip(report.skipped);
        let summary = aggregator.finish();

        tracing::info!(
            successes = summary.success_count(),
            failures = summary.failure_count(),
            skipped = summary.skipped.len(),
            total_committed = %summary.total_committed,
            success_rate = summary.success_rate,
            "Dispersal finished"
        );

        Ok(summary)
    }
}
