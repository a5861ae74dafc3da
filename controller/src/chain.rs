//! The chain engine boundary.
//!
//! The controller runs co-located with a full node but never reaches into
//! it: everything it needs is behind `ChainEngine`, and the node's
//! notifier calls back through a channel registered with `subscribe`.
//! Registration is explicit so shutdown can unhook the controller without
//! leaving a cycle between node and controller.

use thiserror::Error;
use tokio::sync::mpsc;

use kopach_common::{
    block::Block,
    crypto::Hash,
    fork::TargetBits,
    time::TimestampMillis,
};

/// Algorithm name the template generator seeds new templates with.
pub const TEMPLATE_SEED_ALGO: &str = "sha256d";

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("chain error: {0}")]
    Other(String),
}

/// Outcome of submitting a block that failed no consensus rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    Accepted,
    /// Valid but not connected to the best chain yet.
    Orphan,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    /// A consensus rule violation: expected for stale or ill-formed
    /// candidates, logged and dropped.
    #[error("rule violation: {0}")]
    Rule(String),
    /// Anything else is an internal error worth surfacing loudly.
    #[error("unexpected error while processing block: {0}")]
    Unexpected(String),
}

/// The node's view of the current best block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub hash: Hash,
    pub height: u64,
}

/// A template as produced by the node's generator: coinbase first, then
/// the selected transactions.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
    pub height: u64,
}

/// Chain engine events the controller subscribes to.
#[derive(Clone, Debug)]
pub enum ChainNotification {
    BlockConnected(Block),
}

pub trait ChainEngine: Send + Sync + 'static {
    fn best_snapshot(&self) -> Snapshot;

    fn block_by_height(&self, height: u64) -> Option<Block>;

    /// New template paying `pay_to`, seeded with the named algorithm.
    fn new_block_template(&self, pay_to: &str, seed_algo: &str)
        -> Result<BlockTemplate, ChainError>;

    fn process_block(&self, block: Block) -> Result<BlockOutcome, ProcessError>;

    /// Whether the node believes it is synced to the network tip.
    fn is_current(&self) -> bool;

    /// Difficulty map cached on the tip descriptor, if any.
    fn cached_diffs(&self) -> Option<TargetBits>;

    fn store_diffs(&self, diffs: TargetBits);

    /// Recompute the per-algorithm difficulty map for the next block.
    fn calc_controller_diffs(&self) -> Result<TargetBits, ChainError>;

    /// Last time the mempool contents changed.
    fn mempool_last_updated(&self) -> TimestampMillis;

    fn subscribe(&self, notifications: mpsc::UnboundedSender<ChainNotification>);

    fn unsubscribe(&self);
}

/// Seam to the node's connection manager: advertisement ingress asks it to
/// connect to LAN peers that share the miner passphrase.
pub trait PeerConnector: Send + Sync + 'static {
    fn connect(&self, addr: &str);
}
