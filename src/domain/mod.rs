pub mod chain_config;
pub mod outcome;
pub mod transfer;

pub use chain_config::{ChainCatalog, ChainDescriptor};
pub use outcome::{FailureCode, TransactionOutcome};
pub use transfer::{Asset, FeeEstimate, GasConfig, GasParams, TransactionIntent};
