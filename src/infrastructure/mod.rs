pub mod fallback_transport;
pub mod logging;
pub mod rpc_client;
pub mod rpc_validator;

#[cfg(test)]
pub(crate) mod fake_rpc;

pub use fallback_transport::{EndpointHealth, EndpointReport, FallbackTransport, ValidationReport};
pub use rpc_client::{ChainRpc, EthersConnector, EthersRpc, FailureKind, RpcConnector, RpcFailure};
pub use rpc_validator::{EndpointValidator, ValidatedEndpoint};
