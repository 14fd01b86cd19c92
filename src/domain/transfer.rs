//! 转账意图与 Gas 参数

use ethers::{
    abi::{self, Token},
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest, U256},
    utils::id,
};
use serde::{Deserialize, Serialize};

/// 原生币转账的默认 gas limit
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;
/// ERC-20 transfer 调用的默认 gas limit
pub const TOKEN_TRANSFER_GAS: u64 = 100_000;
/// 原生币精度
pub const NATIVE_DECIMALS: u8 = 18;

/// 派发的资产
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "contract")]
pub enum Asset {
    Native,
    Token(Address),
}

impl Asset {
    pub fn default_gas_limit(&self) -> u64 {
        match self {
            Asset::Native => NATIVE_TRANSFER_GAS,
            Asset::Token(_) => TOKEN_TRANSFER_GAS,
        }
    }

    /// 交易的 `to` 字段：原生币直接转给收款人，代币调用合约
    pub fn call_target(&self, recipient: Address) -> Address {
        match self {
            Asset::Native => recipient,
            Asset::Token(contract) => *contract,
        }
    }

    pub fn encode_payload(&self, recipient: Address, amount: U256) -> Bytes {
        match self {
            Asset::Native => Bytes::default(),
            Asset::Token(_) => erc20_transfer_calldata(recipient, amount),
        }
    }

    /// 交易附带的原生币数量
    pub fn value(&self, amount: U256) -> U256 {
        match self {
            Asset::Native => amount,
            Asset::Token(_) => U256::zero(),
        }
    }
}

/// ERC-20 `transfer(address,uint256)`
pub fn erc20_transfer_calldata(recipient: Address, amount: U256) -> Bytes {
    let mut data = id("transfer(address,uint256)").to_vec();
    data.extend(abi::encode(&[Token::Address(recipient), Token::Uint(amount)]));
    data.into()
}

/// 链上 fee 估算结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Gas 配置：按转账类型取默认值，或由调用方显式指定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GasConfig {
    #[default]
    Default,
    Explicit {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
        gas_limit: u64,
    },
}

/// 会话内固定不变的 Gas 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GasParams {
    pub gas_limit: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl GasParams {
    pub fn from_estimate(asset: &Asset, estimate: FeeEstimate) -> Self {
        Self {
            gas_limit: asset.default_gas_limit(),
            max_fee_per_gas: estimate.max_fee_per_gas,
            max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
        }
    }

    /// 单笔交易最坏情况下的手续费
    pub fn max_cost(&self) -> U256 {
        self.max_fee_per_gas.saturating_mul(U256::from(self.gas_limit))
    }
}

/// 单笔待发送交易（构造后不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub recipient: Address,
    pub target: Address,
    pub payload: Bytes,
    pub value: U256,
    pub amount: U256,
    pub nonce: u64,
    pub gas: GasParams,
}

impl TransactionIntent {
    pub fn new(asset: &Asset, recipient: Address, amount: U256, nonce: u64, gas: GasParams) -> Self {
        Self {
            recipient,
            target: asset.call_target(recipient),
            payload: asset.encode_payload(recipient, amount),
            value: asset.value(amount),
            amount,
            nonce,
            gas,
        }
    }

    /// 转为待签名的 EIP-1559 交易
    pub fn to_typed_transaction(&self, from: Address, chain_id: u64) -> TypedTransaction {
        Eip1559TransactionRequest::new()
            .from(from)
            .to(self.target)
            .value(self.value)
            .data(self.payload.clone())
            .nonce(self.nonce)
            .gas(self.gas.gas_limit)
            .max_fee_per_gas(self.gas.max_fee_per_gas)
            .max_priority_fee_per_gas(self.gas.max_priority_fee_per_gas)
            .chain_id(chain_id)
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gas() -> GasParams {
        GasParams {
            gas_limit: 21_000,
            max_fee_per_gas: U256::from(30_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
        }
    }

    #[test]
    fn test_native_intent_carries_value() {
        let recipient = Address::from_low_u64_be(7);
        let intent = TransactionIntent::new(&Asset::Native, recipient, U256::from(5), 9, gas());

        assert_eq!(intent.target, recipient);
        assert_eq!(intent.value, U256::from(5));
        assert!(intent.payload.is_empty());

        let tx = intent.to_typed_transaction(Address::from_low_u64_be(1), 1);
        assert_eq!(tx.nonce(), Some(&U256::from(9)));
        assert_eq!(tx.gas(), Some(&U256::from(21_000)));
    }

    #[test]
    fn test_token_intent_calls_contract() {
        let token = Address::from_low_u64_be(0xdead);
        let recipient = Address::from_low_u64_be(7);
        let intent =
            TransactionIntent::new(&Asset::Token(token), recipient, U256::from(1_000), 0, gas());

        assert_eq!(intent.target, token);
        assert_eq!(intent.value, U256::zero());
        // selector a9059cbb + 两个 32 字节参数
        assert_eq!(&intent.payload[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(intent.payload.len(), 4 + 64);
        assert_eq!(intent.payload[4 + 31], 7);
        assert_eq!(U256::from_big_endian(&intent.payload[36..68]), U256::from(1_000));
    }

    #[test]
    fn test_gas_max_cost() {
        assert_eq!(gas().max_cost(), U256::from(21_000u64 * 30_000_000_000u64));
        assert_eq!(Asset::Token(Address::zero()).default_gas_limit(), TOKEN_TRANSFER_GAS);
    }
}
