use crate::memory::Block;
use crate::topology::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("out of memory trying to allocate {requested} bytes ({total} with overhead)")]
    OutOfMemory { requested: usize, total: usize },

    #[error("out of memory trying to resize block to {requested} bytes ({total} with overhead)")]
    ReallocFailed {
        requested: usize,
        total: usize,
        block: Box<Block>,
    },

    #[error("invalid NUMA node {node} (max node {max_node})")]
    InvalidNode { node: NodeId, max_node: NodeId },

    #[error("NUMA not available")]
    NumaUnavailable,

    #[error("block belongs to another allocator context")]
    ForeignBlock(Box<Block>),

    #[error("config error: {0}")]
    Config(String),

    #[error("allocator not initialized")]
    NotInitialized,

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. } | Error::ReallocFailed { .. })
    }

    /// Recover the untouched block carried by a failed resize or a rejected
    /// foreign release.
    pub fn into_block(self) -> Option<Block> {
        match self {
            Error::ReallocFailed { block, .. } | Error::ForeignBlock(block) => Some(*block),
            _ => None,
        }
    }
}
