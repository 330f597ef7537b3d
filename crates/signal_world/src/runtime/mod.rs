//! Runtime module - the epoch orchestration engine.
//!
//! This module contains the World orchestrator and all supporting types for:
//! - Signal admission and buffering
//! - Confirmation-driven ordering and inclusion
//! - Epoch finalization, release, and rotation
//! - History replay and reconstruction
//! - Collaborator seams for the clock, directory, and torrent transport

mod clock;
mod epoch;
mod error;
mod events;
mod gate;
mod signal;
mod signer;
mod torrent;
mod types;
mod util;
mod world;


// Types
pub use types::{BlockRecord, BlockStamp, SignalUuid};

// Error
pub use error::WorldError;

// Gate
pub use gate::{AdmissionGate, GateState};

// Signal model
pub use signal::{Signal, SignalData, LOCATION_PARAM, WORLD_PARAM};

// Epoch model
pub use epoch::Epoch;

// Collaborator seams
pub use clock::{BlockSource, ChainClock, InMemoryClock, InMemoryDirectory, PeerDirectory};
pub use torrent::{
    InMemoryTorrentStore, LocalTorrentStore, MemoryReleaseSink, ReleaseSink, TorrentStore,
};

// Signing
pub use signer::WorldSigner;

// Observer
pub use events::{
    AdvanceReport, DropReport, IgnoreNotice, ObservedEvent, RecordingObserver, RejectNotice,
    WorldObserver, WorldStatus,
};

// Orchestrator
pub use world::{World, WorldConfig, WorldView, DEFAULT_CONFIRMATIONS, DEFAULT_DOMAIN};

// Utilities
pub use util::{hash_json, sha256_hex};
