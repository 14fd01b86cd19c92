//! 签名账户加载
//!
//! 私钥只从环境变量读取，错误信息中不回显任何密钥内容。

use ethers::signers::{LocalWallet, Signer};

use crate::error::{DisperseError, Result};

pub const DEFAULT_KEY_ENV: &str = "DISPERSE_PRIVATE_KEY";

/// 从十六进制私钥构造钱包（可带 0x 前缀）
pub fn wallet_from_key(key: &str) -> Result<LocalWallet> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(DisperseError::InvalidCredential("private key is empty".into()));
    }

    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_part)
        .ok()
        .filter(|bytes| bytes.len() == 32)
        .ok_or_else(|| DisperseError::InvalidCredential("private key must be 32 bytes of hex".into()))?;

    LocalWallet::from_bytes(&bytes)
        .map_err(|_| DisperseError::InvalidCredential("private key is not a valid secp256k1 scalar".into()))
}

/// 从环境变量加载钱包，`env_var` 为空时使用 `DISPERSE_PRIVATE_KEY`
pub fn load_wallet(env_var: Option<&str>) -> Result<LocalWallet> {
    let name = env_var.unwrap_or(DEFAULT_KEY_ENV);
    let key = std::env::var(name)
        .map_err(|_| DisperseError::InvalidCredential(format!("environment variable {} is not set", name)))?;

    let wallet = wallet_from_key(&key)?;
    tracing::info!(address = ?wallet.address(), source = name, "Signing account loaded");
    Ok(wallet)
}

/// 绑定到会话的链 ID
pub fn bind_chain(wallet: LocalWallet, chain_id: u64) -> LocalWallet {
    wallet.with_chain_id(chain_id)
}
