use thiserror::Error;

use kopach_common::wire::WireError;

use crate::chain::ChainError;

/// Controller failures. The configuration variants are fatal at startup;
/// everything else is handled at the call site.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("no mining addresses configured, refusing to start")]
    NoMiningAddresses,
    #[error("no RPC listeners configured, refusing to start")]
    NoRpcListeners,
    #[error("no P2P listeners configured, refusing to start")]
    NoP2pListeners,
    #[error("could not get a block template")]
    NoTemplate,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}
