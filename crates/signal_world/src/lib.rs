pub mod runtime;

pub use runtime::{
    AdmissionGate, AdvanceReport, BlockRecord, BlockSource, BlockStamp, ChainClock, DropReport,
    Epoch, GateState, IgnoreNotice, InMemoryClock, InMemoryDirectory, InMemoryTorrentStore,
    LocalTorrentStore, MemoryReleaseSink, PeerDirectory, RecordingObserver, RejectNotice,
    ReleaseSink, Signal, SignalData, TorrentStore, World, WorldConfig, WorldError, WorldObserver,
    WorldSigner, WorldStatus, WorldView, DEFAULT_CONFIRMATIONS, DEFAULT_DOMAIN,
};

pub use signal_world_proto::{
    blake3_hex, BlockNumber, EpochBody, EpochNumber, EpochPayload, SignalRecord, StateSnapshot,
};
