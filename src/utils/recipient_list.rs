//! 收款人列表解析
//! 每行一个地址；空行、`#` 注释和非法地址被丢弃，顺序保持不变

use std::path::Path;

use anyhow::Context;
use ethers::types::Address;

use super::address_validator::AddressValidator;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientList {
    pub addresses: Vec<Address>,
    /// 被丢弃的行（行号从 1 开始，原始内容）
    pub dropped: Vec<(usize, String)>,
}

impl RecipientList {
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

pub fn parse_recipients(text: &str) -> RecipientList {
    let mut list = RecipientList::default();

    for (index, line) in text.lines().enumerate() {
        let entry = line.split('#').next().unwrap_or_default().trim();
        if entry.is_empty() {
            continue;
        }

        match AddressValidator::parse(entry) {
            Ok(address) => list.addresses.push(address),
            Err(e) => {
                tracing::debug!(line = index + 1, error = %e, "Dropping invalid recipient line");
                list.dropped.push((index + 1, entry.to_string()));
            }
        }
    }

    list
}

pub fn load_recipients<P: AsRef<Path>>(path: P) -> anyhow::Result<RecipientList> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read recipient file: {:?}", path.as_ref()))?;
    Ok(parse_recipients(&text))
}
