//! 链目录模块
//!
//! 定义派发支持的 EVM 链及其 RPC 端点、浏览器链接模板

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{DisperseError, Result};

/// 浏览器链接中交易哈希的占位符
pub const TX_HASH_PLACEHOLDER: &str = "{hash}";

/// 链描述（只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    /// 链名称
    pub name: String,
    /// EIP-155 链 ID
    pub chain_id: u64,
    /// 原生币符号 (ETH, BNB, POL, ...)
    pub symbol: String,
    /// 候选 RPC 端点，按优先级排列
    pub endpoints: Vec<String>,
    /// 浏览器交易链接模板，例如 `https://etherscan.io/tx/{hash}`
    #[serde(default)]
    pub explorer_tx_url: Option<String>,
}

impl ChainDescriptor {
    /// 生成交易的浏览器链接
    pub fn explorer_link(&self, tx_hash: &str) -> Option<String> {
        self.explorer_tx_url
            .as_ref()
            .map(|template| template.replace(TX_HASH_PLACEHOLDER, tx_hash))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    chains: Vec<ChainDescriptor>,
}

/// 链目录
pub struct ChainCatalog {
    chains: HashMap<u64, ChainDescriptor>,
    symbol_map: HashMap<String, u64>,
}

impl ChainCatalog {
    /// 创建预配置的目录
    pub fn new() -> Self {
        let mut catalog = Self::empty();
        catalog.register_default_chains();
        catalog
    }

    pub fn empty() -> Self {
        Self {
            chains: HashMap::new(),
            symbol_map: HashMap::new(),
        }
    }

    /// 从 TOML 文件加载自定义链（同 chain id 覆盖内置配置）
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DisperseError::Config(format!("failed to read {:?}: {}", path.as_ref(), e))
        })?;
        let file: CatalogFile = toml::from_str(&content)
            .map_err(|e| DisperseError::Config(format!("invalid chain catalog: {}", e)))?;

        let count = file.chains.len();
        for chain in file.chains {
            self.register(chain);
        }
        Ok(count)
    }

    fn register_default_chains(&mut self) {
        self.register(ChainDescriptor {
            name: "Ethereum".to_string(),
            chain_id: 1,
            symbol: "ETH".to_string(),
            endpoints: vec![
                "https://eth.llamarpc.com".to_string(),
                "https://ethereum-rpc.publicnode.com".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
            ],
            explorer_tx_url: Some("https://etherscan.io/tx/{hash}".to_string()),
        });

        self.register(ChainDescriptor {
            name: "Ethereum Sepolia".to_string(),
            chain_id: 11155111,
            symbol: "SEP".to_string(),
            endpoints: vec![
                "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
                "https://rpc.sepolia.org".to_string(),
            ],
            explorer_tx_url: Some("https://sepolia.etherscan.io/tx/{hash}".to_string()),
        });

        self.register(ChainDescriptor {
            name: "BNB Smart Chain".to_string(),
            chain_id: 56,
            symbol: "BNB".to_string(),
            endpoints: vec![
                "https://bsc-dataseed.binance.org".to_string(),
                "https://bsc-dataseed1.defibit.io".to_string(),
                "https://bsc-rpc.publicnode.com".to_string(),
            ],
            explorer_tx_url: Some("https://bscscan.com/tx/{hash}".to_string()),
        });

        self.register(ChainDescriptor {
            name: "Polygon".to_string(),
            chain_id: 137,
            symbol: "POL".to_string(),
            endpoints: vec![
                "https://polygon-rpc.com".to_string(),
                "https://polygon-bor-rpc.publicnode.com".to_string(),
            ],
            explorer_tx_url: Some("https://polygonscan.com/tx/{hash}".to_string()),
        });

        self.register(ChainDescriptor {
            name: "Arbitrum One".to_string(),
            chain_id: 42161,
            symbol: "ARB".to_string(),
            endpoints: vec![
                "https://arb1.arbitrum.io/rpc".to_string(),
                "https://arbitrum-one-rpc.publicnode.com".to_string(),
            ],
            explorer_tx_url: Some("https://arbiscan.io/tx/{hash}".to_string()),
        });

        self.register(ChainDescriptor {
            name: "Optimism".to_string(),
            chain_id: 10,
            symbol: "OP".to_string(),
            endpoints: vec![
                "https://mainnet.optimism.io".to_string(),
                "https://optimism-rpc.publicnode.com".to_string(),
            ],
            explorer_tx_url: Some("https://optimistic.etherscan.io/tx/{hash}".to_string()),
        });

        self.register(ChainDescriptor {
            name: "Base".to_string(),
            chain_id: 8453,
            symbol: "BASE".to_string(),
            endpoints: vec![
                "https://mainnet.base.org".to_string(),
                "https://base-rpc.publicnode.com".to_string(),
            ],
            explorer_tx_url: Some("https://basescan.org/tx/{hash}".to_string()),
        });
    }

    /// 注册链（覆盖同 chain id 的旧配置）
    pub fn register(&mut self, chain: ChainDescriptor) {
        self.symbol_map
            .insert(chain.symbol.to_uppercase(), chain.chain_id);
        self.chains.insert(chain.chain_id, chain);
    }

    pub fn get_by_chain_id(&self, chain_id: u64) -> Option<&ChainDescriptor> {
        self.chains.get(&chain_id)
    }

    pub fn get_by_symbol(&self, symbol: &str) -> Option<&ChainDescriptor> {
        self.symbol_map
            .get(&symbol.to_uppercase())
            .and_then(|id| self.chains.get(id))
    }

    /// 按 chain id、符号或名称（不区分大小写）查找
    pub fn resolve(&self, key: &str) -> Result<&ChainDescriptor> {
        let key = key.trim();
        if let Ok(chain_id) = key.parse::<u64>() {
            if let Some(chain) = self.get_by_chain_id(chain_id) {
                return Ok(chain);
            }
        }
        if let Some(chain) = self.get_by_symbol(key) {
            return Ok(chain);
        }
        self.chains
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(key))
            .ok_or_else(|| DisperseError::ChainNotSupported(key.to_string()))
    }

    /// 按 chain id 排序列出
    pub fn list_all(&self) -> Vec<&ChainDescriptor> {
        let mut chains: Vec<&ChainDescriptor> = self.chains.values().collect();
        chains.sort_by_key(|c| c.chain_id);
        chains
    }
}

impl Default for ChainCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_resolve_by_id_symbol_and_name() {
        let catalog = ChainCatalog::new();

        assert_eq!(catalog.resolve("1").unwrap().name, "Ethereum");
        assert_eq!(catalog.resolve("bnb").unwrap().chain_id, 56);
        assert_eq!(catalog.resolve("arbitrum one").unwrap().chain_id, 42161);
        assert!(matches!(
            catalog.resolve("dogecoin"),
            Err(DisperseError::ChainNotSupported(_))
        ));
    }

    #[test]
    fn test_every_default_chain_has_endpoints() {
        let catalog = ChainCatalog::new();
        for chain in catalog.list_all() {
            assert!(!chain.endpoints.is_empty(), "{} has no endpoints", chain.name);
            let link = chain.explorer_link("0xabc").unwrap();
            assert!(link.ends_with("0xabc"));
        }
    }

    #[test]
    fn test_explorer_link_without_template() {
        let chain = ChainDescriptor {
            name: "Devnet".into(),
            chain_id: 31337,
            symbol: "DEV".into(),
            endpoints: vec!["http://127.0.0.1:8545".into()],
            explorer_tx_url: None,
        };
        assert!(chain.explorer_link("0xabc").is_none());
    }

    #[test]
    fn test_load_custom_chains() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[chains]]
name = "Anvil"
chain_id = 31337
symbol = "ANV"
endpoints = ["http://127.0.0.1:8545"]

[[chains]]
name = "Ethereum Private"
chain_id = 1
symbol = "ETH"
endpoints = ["https://private.example.com"]
explorer_tx_url = "https://etherscan.io/tx/{{hash}}"
"#
        )
        .unwrap();

        let mut catalog = ChainCatalog::new();
        assert_eq!(catalog.load_file(file.path()).unwrap(), 2);
        assert_eq!(catalog.resolve("anv").unwrap().chain_id, 31337);
        assert_eq!(
            catalog.get_by_chain_id(1).unwrap().endpoints,
            vec!["https://private.example.com".to_string()]
        );
    }
}
