use crate::{block::Block, serializer::ReaderError, wire::Container};

/// A worker's claim of a block whose hash meets its target. The block body
/// is empty on the wire; the controller that issued the job rebuilds it
/// from its coinbase set. `sender_port` names that controller: it is the
/// controller listener port carried by the job the worker mined against,
/// so peer controllers on the same bus can reject solutions that are not
/// answering them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    pub sender_port: i32,
    pub block: Block,
}

impl Solution {
    pub fn new(sender_port: i32, block: Block) -> Self {
        Self { sender_port, block }
    }

    pub fn to_container(&self) -> Container {
        let mut container = Container::new();
        container.push(&self.sender_port);
        container.push(&self.block);
        container
    }

    pub fn from_container(container: &Container) -> Result<Self, ReaderError> {
        Ok(Self {
            sender_port: container.get(0)?,
            block: container.get(1)?,
        })
    }
}
