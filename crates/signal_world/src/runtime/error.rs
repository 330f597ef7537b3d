//! Error types for the runtime module.

use std::fmt;
use std::io;

/// Errors that can occur in world operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    ConfigInvalid { reason: String },
    EpochMismatch { expected: Option<String>, found: Option<String> },
    AlreadyIncluded { block_number: u64 },
    DuplicateSignal { uuid: String },
    MalformedSignal { reason: String },
    SignalUnlocated { uuid: String },
    SignalContextMismatch { uuid: String, expected: u64, found: u64 },
    SignatureInvalid { subject: String },
    SignatureKeyInvalid,
    EpochSealed { number: u64 },
    EpochNotStaged { number: u64 },
    EpochRangeInvalid { alpha: u64, omega: u64 },
    BlockUnknown { number: u64 },
    HeadUnavailable { reason: String },
    ClockSyncFailed { reason: String },
    DirectorySyncFailed { reason: String },
    TorrentDataMissing { reference: String },
    TorrentHashMismatch { expected: String, actual: String },
    TorrentReferenceInvalid { reference: String },
    ReleaseSinkFailed { reason: String },
    HistoryDiscontinuous { number: u64 },
    Io(String),
    Serde(String),
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::ConfigInvalid { reason } => write!(f, "invalid configuration: {reason}"),
            WorldError::EpochMismatch { expected, found } => write!(
                f,
                "epoch mismatch: expected {expected:?}, found {found:?}"
            ),
            WorldError::AlreadyIncluded { block_number } => {
                write!(f, "already included: block {block_number} is at or below position")
            }
            WorldError::DuplicateSignal { uuid } => write!(f, "duplicate signal {uuid}"),
            WorldError::MalformedSignal { reason } => write!(f, "malformed signal: {reason}"),
            WorldError::SignalUnlocated { uuid } => {
                write!(f, "signal {uuid} references a block unknown to the clock")
            }
            WorldError::SignalContextMismatch { uuid, expected, found } => write!(
                f,
                "signal {uuid} anchored at block {found}, expected {expected}"
            ),
            WorldError::SignatureInvalid { subject } => {
                write!(f, "signature verification failed for {subject}")
            }
            WorldError::SignatureKeyInvalid => f.write_str("invalid signing key"),
            WorldError::EpochSealed { number } => write!(f, "epoch {number} is already sealed"),
            WorldError::EpochNotStaged { number } => write!(f, "epoch {number} is not staged"),
            WorldError::EpochRangeInvalid { alpha, omega } => {
                write!(f, "epoch range invalid: omega {omega} precedes alpha {alpha}")
            }
            WorldError::BlockUnknown { number } => write!(f, "block {number} unknown to the clock"),
            WorldError::HeadUnavailable { reason } => write!(f, "chain head unavailable: {reason}"),
            WorldError::ClockSyncFailed { reason } => write!(f, "clock sync failed: {reason}"),
            WorldError::DirectorySyncFailed { reason } => {
                write!(f, "directory sync failed: {reason}")
            }
            WorldError::TorrentDataMissing { reference } => {
                write!(f, "torrent data missing for {reference}")
            }
            WorldError::TorrentHashMismatch { expected, actual } => {
                write!(f, "torrent data hash mismatch: expected {expected}, got {actual}")
            }
            WorldError::TorrentReferenceInvalid { reference } => {
                write!(f, "torrent reference invalid: {reference}")
            }
            WorldError::ReleaseSinkFailed { reason } => write!(f, "release sink failed: {reason}"),
            WorldError::HistoryDiscontinuous { number } => {
                write!(f, "history discontinuous at epoch {number}")
            }
            WorldError::Io(reason) => write!(f, "io error: {reason}"),
            WorldError::Serde(reason) => write!(f, "serialization error: {reason}"),
        }
    }
}

impl std::error::Error for WorldError {}

impl From<serde_json::Error> for WorldError {
    fn from(error: serde_json::Error) -> Self {
        WorldError::Serde(error.to_string())
    }
}

impl From<serde_cbor::Error> for WorldError {
    fn from(error: serde_cbor::Error) -> Self {
        WorldError::Serde(error.to_string())
    }
}

impl From<io::Error> for WorldError {
    fn from(error: io::Error) -> Self {
        WorldError::Io(error.to_string())
    }
}
