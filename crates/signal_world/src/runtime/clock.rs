//! Block-confirmation clock and peer-directory abstractions.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use signal_world_proto::BlockNumber;

use super::error::WorldError;
use super::types::{BlockRecord, BlockStamp};

/// Source of raw chain blocks: current head plus block lookups by number.
pub trait BlockSource {
    fn head_number(&self) -> Result<BlockNumber, WorldError>;
    fn read_block(&self, number: BlockNumber) -> Result<BlockRecord, WorldError>;
}

/// The block-confirmation clock consumed by the orchestrator.
///
/// Reads are infallible lookups over already-synchronized history;
/// `synchronize` extends that history up to a target block and is the only
/// fallible entry point.
pub trait ChainClock {
    fn read_hash(&self, block_hash: &str) -> Option<BlockStamp>;
    fn read_number(&self, number: BlockNumber) -> Option<BlockStamp>;
    fn initialized(&self) -> bool;
    fn max_number(&self) -> Option<BlockNumber>;
    fn synchronize(
        &self,
        start: BlockNumber,
        to: BlockNumber,
        source: Option<&dyn BlockSource>,
    ) -> Result<u64, WorldError>;
}

/// Peer-directory synchronization service.
pub trait PeerDirectory {
    fn synchronize(&self, to: BlockNumber) -> Result<u64, WorldError>;
}

#[derive(Debug, Default)]
struct ClockInner {
    by_hash: BTreeMap<String, BlockStamp>,
    by_number: BTreeMap<BlockNumber, BlockRecord>,
    initialized: bool,
    fail_sync: bool,
}

/// Clock backed by an in-process block table. Blocks are learned either by
/// seeding (`insert_block`) or from a [`BlockSource`] during `synchronize`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClock {
    inner: Arc<Mutex<ClockInner>>,
}

impl InMemoryClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_block(&self, record: BlockRecord) {
        let mut inner = self.inner.lock().expect("lock clock");
        inner.by_hash.insert(record.hash.clone(), record.stamp());
        inner.by_number.insert(record.number, record);
    }

    /// Seed a contiguous range of synthetic blocks (`block-<n>` hashes).
    pub fn seed_range(&self, from: BlockNumber, to: BlockNumber) {
        for number in from..=to {
            self.insert_block(BlockRecord {
                number,
                hash: format!("block-{number}"),
                timestamp: 1_700_000_000 + number * 12,
            });
        }
    }

    /// Make the next `synchronize` calls fail. Test hook.
    pub fn set_fail_sync(&self, fail: bool) {
        self.inner.lock().expect("lock clock").fail_sync = fail;
    }
}

impl ChainClock for InMemoryClock {
    fn read_hash(&self, block_hash: &str) -> Option<BlockStamp> {
        self.inner
            .lock()
            .expect("lock clock")
            .by_hash
            .get(block_hash)
            .copied()
    }

    fn read_number(&self, number: BlockNumber) -> Option<BlockStamp> {
        self.inner
            .lock()
            .expect("lock clock")
            .by_number
            .get(&number)
            .map(BlockRecord::stamp)
    }

    fn initialized(&self) -> bool {
        self.inner.lock().expect("lock clock").initialized
    }

    fn max_number(&self) -> Option<BlockNumber> {
        self.inner
            .lock()
            .expect("lock clock")
            .by_number
            .keys()
            .next_back()
            .copied()
    }

    fn synchronize(
        &self,
        start: BlockNumber,
        to: BlockNumber,
        source: Option<&dyn BlockSource>,
    ) -> Result<u64, WorldError> {
        if self.inner.lock().expect("lock clock").fail_sync {
            return Err(WorldError::ClockSyncFailed {
                reason: "injected failure".to_string(),
            });
        }

        let mut updates = 0u64;
        match source {
            Some(source) => {
                for number in start..=to {
                    let known = self
                        .inner
                        .lock()
                        .expect("lock clock")
                        .by_number
                        .contains_key(&number);
                    if known {
                        continue;
                    }
                    let record = source.read_block(number)?;
                    self.insert_block(record);
                    updates += 1;
                }
            }
            None => {
                let inner = self.inner.lock().expect("lock clock");
                let max = inner.by_number.keys().next_back().copied().unwrap_or(0);
                if to > max {
                    return Err(WorldError::ClockSyncFailed {
                        reason: format!("no block source and block {to} beyond known {max}"),
                    });
                }
            }
        }

        self.inner.lock().expect("lock clock").initialized = true;
        Ok(updates)
    }
}

#[derive(Debug, Default)]
struct DirectoryInner {
    position: BlockNumber,
    fail_sync: bool,
}

/// Peer directory that tracks a high-water mark in process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    inner: Arc<Mutex<DirectoryInner>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> BlockNumber {
        self.inner.lock().expect("lock directory").position
    }

    /// Make the next `synchronize` calls fail. Test hook.
    pub fn set_fail_sync(&self, fail: bool) {
        self.inner.lock().expect("lock directory").fail_sync = fail;
    }
}

impl PeerDirectory for InMemoryDirectory {
    fn synchronize(&self, to: BlockNumber) -> Result<u64, WorldError> {
        let mut inner = self.inner.lock().expect("lock directory");
        if inner.fail_sync {
            return Err(WorldError::DirectorySyncFailed {
                reason: "injected failure".to_string(),
            });
        }
        let updates = to.saturating_sub(inner.position);
        inner.position = inner.position.max(to);
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSource;

    impl BlockSource for ScriptedSource {
        fn head_number(&self) -> Result<BlockNumber, WorldError> {
            Ok(105)
        }

        fn read_block(&self, number: BlockNumber) -> Result<BlockRecord, WorldError> {
            Ok(BlockRecord {
                number,
                hash: format!("block-{number}"),
                timestamp: number * 12,
            })
        }
    }

    #[test]
    fn synchronize_learns_blocks_from_source() {
        let clock = InMemoryClock::new();
        assert!(!clock.initialized());

        let updates = clock
            .synchronize(100, 103, Some(&ScriptedSource))
            .expect("sync");
        assert_eq!(updates, 4);
        assert!(clock.initialized());
        assert_eq!(clock.max_number(), Some(103));
        assert_eq!(clock.read_hash("block-101").map(|s| s.number), Some(101));
        assert_eq!(clock.read_number(103).map(|s| s.timestamp), Some(103 * 12));
    }

    #[test]
    fn synchronize_without_source_requires_seeded_blocks() {
        let clock = InMemoryClock::new();
        clock.seed_range(100, 102);

        clock.synchronize(100, 102, None).expect("sync");
        let err = clock.synchronize(100, 110, None).expect_err("beyond seed");
        assert!(matches!(err, WorldError::ClockSyncFailed { .. }));
    }

    #[test]
    fn injected_failure_surfaces_as_sync_error() {
        let clock = InMemoryClock::new();
        clock.seed_range(100, 102);
        clock.set_fail_sync(true);

        let err = clock.synchronize(100, 102, None).expect_err("must fail");
        assert!(matches!(err, WorldError::ClockSyncFailed { .. }));
        assert!(!clock.initialized());
    }

    #[test]
    fn directory_tracks_high_water_mark() {
        let directory = InMemoryDirectory::new();
        assert_eq!(directory.synchronize(110).expect("sync"), 110);
        assert_eq!(directory.synchronize(110).expect("sync"), 0);
        assert_eq!(directory.position(), 110);
    }
}
