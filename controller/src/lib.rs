pub mod chain;
pub mod controller;
pub mod error;

pub use chain::{
    BlockOutcome, BlockTemplate, ChainEngine, ChainError, ChainNotification, PeerConnector,
    ProcessError, Snapshot,
};
pub use controller::{Controller, ControllerConfig};
pub use error::ControllerError;
