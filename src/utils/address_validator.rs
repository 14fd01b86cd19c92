//! 地址验证模块
//!
//! EVM 地址格式检查（支持 EIP-55 Checksum）

use ethers::{types::Address, utils::to_checksum};

use crate::error::{DisperseError, Result};

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    /// 解析并验证 EVM 地址
    ///
    /// - 必须为 `0x` + 40 位十六进制
    /// - 全小写或全大写视为未带校验和
    /// - 大小写混合时必须通过 EIP-55 校验
    pub fn parse(address: &str) -> Result<Address> {
        let invalid = |why: &str| DisperseError::InvalidAddress(format!("{}: {}", address, why));

        let hex_part = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .ok_or_else(|| invalid("missing 0x prefix"))?;

        if hex_part.len() != 40 {
            return Err(invalid("expected 40 hex characters"));
        }
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("non-hex character"));
        }

        let parsed: Address = format!("0x{}", hex_part)
            .parse()
            .map_err(|_| invalid("unparseable"))?;

        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        if has_upper && has_lower && to_checksum(&parsed, None)[2..] != *hex_part {
            return Err(invalid("EIP-55 checksum mismatch"));
        }

        Ok(parsed)
    }

    pub fn is_valid(address: &str) -> bool {
        Self::parse(address).is_ok()
    }
}
