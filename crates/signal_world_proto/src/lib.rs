//! Wire and payload types for the signal world protocol.
//!
//! Everything a node, viewer, or release sink needs to exchange sealed
//! epochs without depending on the orchestrator crate lives here: the
//! epoch payload projection stored into history, the full epoch body
//! published through the torrent transport, per-signal records, state
//! snapshots, and the canonical encoding they are hashed and signed under.

mod payload;

pub use payload::{
    blake3_hex, from_canonical_cbor, to_canonical_cbor, BlockNumber, EpochBody, EpochNumber,
    EpochPayload, SignalRecord, StateSnapshot,
};
