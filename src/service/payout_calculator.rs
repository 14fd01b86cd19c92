//! 派发金额计算
//!
//! 两种模式：
//! - 固定金额：校验 `amount * n <= balance`
//! - 均分：余额扣除预留手续费后按人数整除，舍弃余数
//!
//! 余额只在计算时读取一次，得到的 [`PayoutPlan`] 在整个会话内不变。

use std::sync::Arc;

use ethers::{
    types::{Address, U256},
    utils::parse_units,
};
use serde::Serialize;

use crate::{
    domain::{Asset, GasParams},
    error::{DisperseError, Result},
    infrastructure::ChainRpc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutMode {
    /// 每个收款人的固定金额（最小单位）
    Fixed(U256),
    /// 可用余额均分（需用户显式确认）
    EqualSplit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PayoutPlan {
    pub per_recipient: U256,
    pub recipient_count: usize,
    pub total: U256,
    pub balance_observed: U256,
    pub reserved: U256,
}

/// 把十进制金额字符串转为最小单位
pub fn parse_amount(text: &str, decimals: u8) -> Result<U256> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(DisperseError::InvalidAmount(format!(
            "'{}' is not a positive amount",
            text
        )));
    }

    let amount: U256 = parse_units(trimmed, decimals as u32)
        .map_err(|e| DisperseError::InvalidAmount(format!("'{}': {}", text, e)))?
        .into();

    if amount.is_zero() {
        return Err(DisperseError::InvalidAmount(format!(
            "'{}' rounds to zero at {} decimals",
            text, decimals
        )));
    }
    Ok(amount)
}

fn total_for(per_recipient: U256, recipients: usize) -> Result<U256> {
    per_recipient
        .checked_mul(U256::from(recipients))
        .ok_or_else(|| DisperseError::InvalidAmount("total payout overflows".into()))
}

/// 固定金额模式的充足性校验（纯函数）
pub fn plan_fixed(amount: U256, recipients: usize, balance: U256) -> Result<PayoutPlan> {
    if recipients == 0 {
        return Err(DisperseError::NoRecipients);
    }
    if amount.is_zero() {
        return Err(DisperseError::InvalidAmount("amount must be positive".into()));
    }

    let total = total_for(amount, recipients)?;
    if total > balance {
        return Err(DisperseError::InsufficientFunds {
            required: total,
            available: balance,
            shortfall: total - balance,
        });
    }

    Ok(PayoutPlan {
        per_recipient: amount,
        recipient_count: recipients,
        total,
        balance_observed: balance,
        reserved: U256::zero(),
    })
}

/// 均分模式（纯函数）：`(balance - reserved) / recipients`，余数舍弃
pub fn plan_equal_split(balance: U256, reserved: U256, recipients: usize) -> Result<PayoutPlan> {
    if recipients == 0 {
        return Err(DisperseError::NoRecipients);
    }

    let too_low = || DisperseError::BalanceTooLowToSplit {
        balance,
        reserved,
        recipients,
    };

    let spendable = balance.checked_sub(reserved).ok_or_else(too_low)?;
    let per_recipient = spendable / U256::from(recipients);
    if per_recipient.is_zero() {
        return Err(too_low());
    }

    Ok(PayoutPlan {
        per_recipient,
        recipient_count: recipients,
        total: per_recipient * U256::from(recipients),
        balance_observed: balance,
        reserved,
    })
}

pub struct PayoutCalculator {
    rpc: Arc<dyn ChainRpc>,
    owner: Address,
    asset: Asset,
}

impl PayoutCalculator {
    pub fn new(rpc: Arc<dyn ChainRpc>, owner: Address, asset: Asset) -> Self {
        Self { rpc, owner, asset }
    }

    async fn read_balance(&self, asset: &Asset) -> Result<U256> {
        self.rpc
            .balance(self.owner, asset)
            .await
            .map_err(|e| DisperseError::Rpc {
                call: "balance",
                reason: e.to_string(),
            })
    }

    /// 读取一次余额并生成派发计划
    pub async fn calculate(
        &self,
        mode: PayoutMode,
        recipients: usize,
        gas: &GasParams,
    ) -> Result<PayoutPlan> {
        if recipients == 0 {
            return Err(DisperseError::NoRecipients);
        }

        let fee_reserve = gas
            .max_cost()
            .checked_mul(U256::from(recipients))
            .ok_or_else(|| DisperseError::InvalidAmount("fee reserve overflows".into()))?;

        let balance = self.read_balance(&self.asset).await?;

        let plan = match (mode, self.asset) {
            (PayoutMode::Fixed(amount), _) => plan_fixed(amount, recipients, balance)?,
            (PayoutMode::EqualSplit, Asset::Native) => {
                plan_equal_split(balance, fee_reserve, recipients)?
            }
            (PayoutMode::EqualSplit, Asset::Token(_)) => {
                plan_equal_split(balance, U256::zero(), recipients)?
            }
        };

        // 代币转账的手续费由原生币支付
        if let Asset::Token(token) = self.asset {
            let native = self.read_balance(&Asset::Native).await?;
            if native < fee_reserve {
                tracing::warn!(
                    token = ?token,
                    native_balance = %native,
                    fee_reserve = %fee_reserve,
                    "Native balance cannot cover gas for token transfers"
                );
                return Err(DisperseError::InsufficientFunds {
                    required: fee_reserve,
                    available: native,
                    shortfall: fee_reserve - native,
                });
            }
        }

        tracing::info!(
            mode = ?mode,
            recipients,
            per_recipient = %plan.per_recipient,
            total = %plan.total,
            balance = %plan.balance_observed,
            reserved = %plan.reserved,
            "Payout plan computed"
        );

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::FeeEstimate, infrastructure::fake_rpc::FakeRpc};

    fn gas(asset: &Asset) -> GasParams {
        GasParams::from_estimate(
            asset,
            FeeEstimate {
                max_fee_per_gas: U256::from(10),
                max_priority_fee_per_gas: U256::from(1),
            },
        )
    }

    #[test]
    fn test_fixed_mode_boundary() {
        let plan = plan_fixed(U256::from(3), 3, U256::from(10)).unwrap();
        assert_eq!(plan.total, U256::from(9));

        let err = plan_fixed(U256::from(4), 3, U256::from(10)).unwrap_err();
        match err {
            DisperseError::InsufficientFunds {
                required,
                available,
                shortfall,
            } => {
                assert_eq!(required, U256::from(12));
                assert_eq!(available, U256::from(10));
                assert_eq!(shortfall, U256::from(2));
            }
            other => panic!("unexpected error: {other}"),
        }

        // 恰好相等
        assert!(plan_fixed(U256::from(5), 2, U256::from(10)).is_ok());
    }

    #[test]
    fn test_equal_split_discards_dust() {
        let plan = plan_equal_split(U256::from(100), U256::from(9), 3).unwrap();
        assert_eq!(plan.per_recipient, U256::from(30));
        assert_eq!(plan.total, U256::from(90));
        assert!(plan.total + plan.reserved <= plan.balance_observed);
    }

    #[test]
    fn test_equal_split_too_low() {
        assert!(matches!(
            plan_equal_split(U256::from(5), U256::from(9), 3),
            Err(DisperseError::BalanceTooLowToSplit { recipients: 3, .. })
        ));
        assert!(matches!(
            plan_equal_split(U256::from(11), U256::from(9), 3),
            Err(DisperseError::BalanceTooLowToSplit { .. })
        ));
    }

    #[test]
    fn test_empty_recipient_list() {
        assert!(matches!(
            plan_fixed(U256::one(), 0, U256::from(10)),
            Err(DisperseError::NoRecipients)
        ));
        assert!(matches!(
            plan_equal_split(U256::from(10), U256::zero(), 0),
            Err(DisperseError::NoRecipients)
        ));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(
            parse_amount("0.5", 18).unwrap(),
            U256::from(500_000_000_000_000_000u64)
        );
        assert_eq!(parse_amount(" 12 ", 6).unwrap(), U256::from(12_000_000u64));
        assert!(parse_amount("0", 18).is_err());
        assert!(parse_amount("-1", 18).is_err());
        assert!(parse_amount("abc", 18).is_err());
        assert!(parse_amount("", 18).is_err());
    }

    #[tokio::test]
    async fn test_native_equal_split_reserves_fees() {
        let rpc = Arc::new(FakeRpc::new("http://a", 5).with_balance(1_000_000));
        let calculator = PayoutCalculator::new(rpc, Address::zero(), Asset::Native);
        let gas = gas(&Asset::Native);

        let plan = calculator
            .calculate(PayoutMode::EqualSplit, 4, &gas)
            .await
            .unwrap();

        // 21000 * 10 * 4
        assert_eq!(plan.reserved, U256::from(840_000));
        assert_eq!(plan.per_recipient, U256::from(40_000));
    }

    #[tokio::test]
    async fn test_token_payout_checks_native_gas() {
        let token = Asset::Token(Address::repeat_byte(0xaa));
        let rpc = Arc::new(FakeRpc::new("http://a", 5).with_balance(10));
        *rpc.token_balance.lock().unwrap() = U256::from(1_000);
        let calculator = PayoutCalculator::new(rpc.clone(), Address::zero(), token);
        let gas = gas(&token);

        let err = calculator
            .calculate(PayoutMode::Fixed(U256::from(100)), 3, &gas)
            .await
            .unwrap_err();
        assert!(matches!(err, DisperseError::InsufficientFunds { .. }));

        *rpc.balance.lock().unwrap() = U256::from(10_000_000);
        let plan = calculator
            .calculate(PayoutMode::EqualSplit, 3, &gas)
            .await
            .unwrap();
        assert_eq!(plan.per_recipient, U256::from(333));
        assert_eq!(plan.reserved, U256::zero());
    }
}
