pub mod signer;

pub use signer::{load_wallet, wallet_from_key, DEFAULT_KEY_ENV};
