//! Type aliases and basic block types for the runtime module.

use serde::{Deserialize, Serialize};

use signal_world_proto::BlockNumber;

pub type SignalUuid = String;

/// A block known to the confirmation clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
    pub number: BlockNumber,
    pub timestamp: u64,
}

/// A raw block as produced by a block source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: BlockNumber,
    pub hash: String,
    pub timestamp: u64,
}

impl BlockRecord {
    pub fn stamp(&self) -> BlockStamp {
        BlockStamp {
            number: self.number,
            timestamp: self.timestamp,
        }
    }
}
