//! The World struct - the epoch orchestration core.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use signal_world_proto::{BlockNumber, EpochNumber, EpochPayload, StateSnapshot};

use super::clock::{BlockSource, ChainClock, PeerDirectory};
use super::epoch::Epoch;
use super::error::WorldError;
use super::events::{
    AdvanceReport, DropReport, IgnoreNotice, RejectNotice, WorldObserver, WorldStatus,
};
use super::gate::AdmissionGate;
use super::signal::{Signal, SignalData, WORLD_PARAM};
use super::signer::verifying_key_from_hex;
use super::torrent::{ReleaseSink, TorrentStore};
use super::types::SignalUuid;
use super::util::hash_json;

/// Minimum confirmation depth applied when none is configured.
pub const DEFAULT_CONFIRMATIONS: u64 = 12;
/// Domain tag stamped on admitted signals when none is configured.
pub const DEFAULT_DOMAIN: &str = "world";

/// Construction-time configuration for a [`World`].
pub struct WorldConfig {
    pub domain: String,
    pub signer: String,
    pub signer_key: String,
    pub genesis: BlockNumber,
    pub deployment: Option<BlockNumber>,
    pub confirm: u64,
    pub clock: Arc<dyn ChainClock + Send + Sync>,
    pub directory: Arc<dyn PeerDirectory + Send + Sync>,
    pub torrent: Arc<dyn TorrentStore + Send + Sync>,
    pub sink: Arc<dyn ReleaseSink + Send + Sync>,
    pub block_source: Option<Arc<dyn BlockSource + Send + Sync>>,
    pub observer: Option<Box<dyn WorldObserver>>,
}

impl WorldConfig {
    pub fn new(
        genesis: BlockNumber,
        signer: impl Into<String>,
        signer_key: impl Into<String>,
        clock: Arc<dyn ChainClock + Send + Sync>,
        directory: Arc<dyn PeerDirectory + Send + Sync>,
        torrent: Arc<dyn TorrentStore + Send + Sync>,
        sink: Arc<dyn ReleaseSink + Send + Sync>,
    ) -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            signer: signer.into(),
            signer_key: signer_key.into(),
            genesis,
            deployment: None,
            confirm: DEFAULT_CONFIRMATIONS,
            clock,
            directory,
            torrent,
            sink,
            block_source: None,
            observer: None,
        }
    }
}

/// Pure read projection of the world for remote observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldView {
    pub signer: String,
    pub ancestor: Option<String>,
    pub number: EpochNumber,
    pub alpha: BlockNumber,
    pub initial: BTreeMap<String, StateSnapshot>,
    pub signals: Vec<Signal>,
    pub dropped: BTreeMap<SignalUuid, BlockNumber>,
    pub position: Option<BlockNumber>,
    pub history: Vec<EpochPayload>,
    pub state_hash: String,
}

/// The world orchestrator: owns the signal pools, the history, and the
/// single live epoch, and drives admission, confirmation-based inclusion,
/// finalization, rotation, and replay.
pub struct World {
    domain: String,
    signer: String,
    signer_key: String,
    genesis: BlockNumber,
    confirm: u64,
    clock: Arc<dyn ChainClock + Send + Sync>,
    directory: Arc<dyn PeerDirectory + Send + Sync>,
    torrent: Arc<dyn TorrentStore + Send + Sync>,
    sink: Arc<dyn ReleaseSink + Send + Sync>,
    block_source: Option<Arc<dyn BlockSource + Send + Sync>>,
    observer: Option<Box<dyn WorldObserver>>,
    gate: AdmissionGate,
    received: Vec<Signal>,
    dropped: BTreeMap<SignalUuid, BlockNumber>,
    history: Vec<EpochPayload>,
    epoch: Epoch,
    position: Option<BlockNumber>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("domain", &self.domain)
            .field("signer", &self.signer)
            .field("genesis", &self.genesis)
            .field("confirm", &self.confirm)
            .field("received", &self.received.len())
            .field("dropped", &self.dropped.len())
            .field("history", &self.history.len())
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl World {
    pub fn new(config: WorldConfig) -> Result<Self, WorldError> {
        if config.signer.trim().is_empty() {
            return Err(WorldError::ConfigInvalid {
                reason: "signer alias is required".to_string(),
            });
        }
        if verifying_key_from_hex(&config.signer_key).is_err() {
            return Err(WorldError::ConfigInvalid {
                reason: "signer key is not a valid ed25519 verifying key".to_string(),
            });
        }
        if let Some(deployment) = config.deployment {
            if config.genesis < deployment {
                return Err(WorldError::ConfigInvalid {
                    reason: format!(
                        "genesis block {} precedes deployment block {deployment}",
                        config.genesis
                    ),
                });
            }
        }

        Ok(Self {
            domain: config.domain,
            signer: config.signer,
            signer_key: config.signer_key,
            genesis: config.genesis,
            confirm: config.confirm,
            clock: config.clock,
            directory: config.directory,
            torrent: config.torrent,
            sink: config.sink,
            block_source: config.block_source,
            observer: config.observer,
            gate: AdmissionGate::new(),
            received: Vec::new(),
            dropped: BTreeMap::new(),
            history: Vec::new(),
            epoch: Epoch::genesis(config.genesis),
            position: None,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn listening(&self) -> bool {
        self.gate.is_open()
    }

    pub fn position(&self) -> Option<BlockNumber> {
        self.position
    }

    pub fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    pub fn received(&self) -> &[Signal] {
        &self.received
    }

    pub fn dropped(&self) -> &BTreeMap<SignalUuid, BlockNumber> {
        &self.dropped
    }

    pub fn history(&self) -> &[EpochPayload] {
        &self.history
    }

    pub fn buffered_len(&self) -> usize {
        self.gate.buffered_len()
    }

    pub fn status(&self) -> WorldStatus {
        WorldStatus {
            position: self.position,
            epoch_number: self.epoch.number(),
            listening: self.gate.is_open(),
        }
    }

    // -------------------------------------------------------------------------
    // Admission gate
    // -------------------------------------------------------------------------

    /// Toggle the admission gate. Enabling drains the buffered pool through
    /// the full admission path, in original arrival order.
    pub fn listen(&mut self, enabled: bool) {
        if enabled {
            self.reopen();
        } else {
            let _ = self.gate.try_close();
        }
    }

    /// Admit one inbound signal. Never fails: admission errors surface
    /// through `on_ignore`, buffering happens silently while the gate is
    /// closed.
    pub fn receive(&mut self, data: impl Into<SignalData>) {
        let signal = match data.into().into_signal() {
            Ok(signal) => signal,
            Err(error) => {
                tracing::debug!(%error, "inbound signal could not be coerced");
                let notice = IgnoreNotice {
                    signal: None,
                    reason: error.to_string(),
                };
                self.notify(|observer, status| observer.on_ignore(&notice, status));
                return;
            }
        };
        if !self.gate.is_open() {
            self.notify(|observer, status| observer.on_buffer(&signal, status));
            self.gate.park(signal);
            return;
        }
        self.admit(signal);
    }

    fn admit(&mut self, mut signal: Signal) {
        if let Err(error) = self.screen(&signal) {
            tracing::debug!(uuid = %signal.uuid, %error, "signal ignored");
            let notice = IgnoreNotice {
                signal: Some(signal),
                reason: error.to_string(),
            };
            self.notify(|observer, status| observer.on_ignore(&notice, status));
            return;
        }

        signal.clear_location();
        signal.add_params(BTreeMap::from([(
            WORLD_PARAM.to_string(),
            JsonValue::String(self.domain.clone()),
        )]));

        if let Some(at_block) = signal.dropped {
            // Re-admitted from durable storage after a restart: keep only
            // the audit record, never the live pool entry.
            self.dropped.insert(signal.uuid.clone(), at_block);
            return;
        }

        self.received.push(signal.clone());
        self.notify(|observer, status| observer.on_receive(&signal, status));
    }

    fn screen(&self, signal: &Signal) -> Result<(), WorldError> {
        let expected = self.epoch.ancestor();
        if signal.epoch.as_deref() != expected {
            return Err(WorldError::EpochMismatch {
                expected: expected.map(str::to_string),
                found: signal.epoch.clone(),
            });
        }
        if let (Some(stamp), Some(position)) = (self.clock.read_hash(&signal.block), self.position)
        {
            if stamp.number <= position {
                return Err(WorldError::AlreadyIncluded {
                    block_number: stamp.number,
                });
            }
        }
        // Newest-first: duplicates are statistically more likely to be recent.
        for existing in self.received.iter().rev() {
            if existing.uuid == signal.uuid {
                return Err(WorldError::DuplicateSignal {
                    uuid: signal.uuid.clone(),
                });
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Confirmation, ordering & inclusion
    // -------------------------------------------------------------------------

    /// Advance the world position to `to` (or head minus the confirmation
    /// depth) and fold every now-confirmed signal into the live epoch.
    /// Aborts are logged, never raised: `None` means nothing changed.
    pub fn advance(&mut self, to: Option<BlockNumber>) -> Option<AdvanceReport> {
        let target = self.resolve_target(to)?;

        if self.clock.initialized() {
            let no_progress = self.position.is_some_and(|position| target <= position);
            let at_known_head = self.clock.max_number() == Some(target);
            if no_progress || at_known_head {
                tracing::debug!(block = target, "advance is a no-op");
                return None;
            }
        }

        if !self.gate.try_close() {
            tracing::warn!(block = target, "advance rejected: world is busy");
            return None;
        }

        let start = self.position.unwrap_or(self.genesis);
        let source = self
            .block_source
            .as_ref()
            .map(|source| source.as_ref() as &dyn BlockSource);
        let clock_updates = match self.clock.synchronize(start, target, source) {
            Ok(updates) => updates,
            Err(error) => {
                tracing::warn!(%error, block = target, "advance aborted during clock sync");
                self.reopen();
                return None;
            }
        };
        let directory_updates = match self.directory.synchronize(target) {
            Ok(updates) => updates,
            Err(error) => {
                tracing::warn!(%error, block = target, "advance aborted during directory sync");
                self.reopen();
                return None;
            }
        };

        let mut confirmed = Vec::new();
        let mut pending = Vec::new();
        for mut signal in std::mem::take(&mut self.received) {
            signal.locate(self.clock.as_ref());
            match signal.block_number {
                Some(number) if number <= target => confirmed.push(signal),
                _ => pending.push(signal),
            }
        }
        self.received = pending;

        // Inclusion order determines final state; this sort is the consensus
        // linchpin.
        confirmed.sort_by(|left, right| left.total_order(right));

        let mut included = Vec::new();
        let mut rejected = Vec::new();
        for signal in confirmed {
            let Some(block_number) = signal.block_number else {
                continue;
            };
            let outcome = signal
                .verify(self.clock.as_ref(), block_number)
                .and_then(|()| self.epoch.include(&signal));
            match outcome {
                Ok(()) => included.push(signal),
                Err(error) => {
                    let notice = RejectNotice {
                        reason: error.to_string(),
                        signal_digest: hash_json(&signal).unwrap_or_default(),
                        signal,
                    };
                    self.notify(|observer, status| observer.on_reject(&notice, status));
                    rejected.push(notice);
                }
            }
        }

        self.position = Some(target);
        let report = AdvanceReport {
            position: target,
            included,
            rejected,
            clock_updates,
            directory_updates,
        };
        self.notify(|observer, status| observer.on_advance(&report, status));
        self.reopen();
        Some(report)
    }

    fn resolve_target(&self, to: Option<BlockNumber>) -> Option<BlockNumber> {
        if let Some(target) = to {
            return Some(target);
        }
        let Some(source) = &self.block_source else {
            tracing::warn!("advance aborted: no target and no block source configured");
            return None;
        };
        match source.head_number() {
            Ok(head) => Some(head.saturating_sub(self.confirm)),
            Err(error) => {
                tracing::warn!(%error, "advance aborted: chain head unavailable");
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Remove included signals from the live epoch by uuid. Returns
    /// `Ok(false)` without touching anything when the world is busy; the
    /// caller retries once it is idle.
    pub fn drop_signals(&mut self, uuids: &[String]) -> Result<bool, WorldError> {
        if !self.gate.try_close() {
            tracing::debug!("drop rejected: world is busy");
            return Ok(false);
        }

        let removed = match self.epoch.drop_signals(uuids, self.torrent.as_ref()) {
            Ok(removed) => removed,
            Err(error) => {
                self.reopen();
                return Err(error);
            }
        };

        let at_block = self.position.unwrap_or(self.genesis);
        for signal in &removed {
            self.dropped.insert(signal.uuid.clone(), at_block);
        }
        let report = DropReport { removed, at_block };
        self.notify(|observer, status| observer.on_drop(&report, status));
        self.reopen();
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Replay / reconstruction
    // -------------------------------------------------------------------------

    /// Rebuild world state from an ordered history of sealed epoch payloads,
    /// oldest first. Each epoch's state application is seeded from its
    /// predecessor's final snapshots, then the live successor is created.
    /// `fetch_signals` repopulates the live pool through `receive`.
    pub fn build(
        &mut self,
        mut history: Vec<EpochPayload>,
        fetch_signals: Option<&dyn Fn() -> Result<Vec<SignalData>, WorldError>>,
    ) -> Result<(), WorldError> {
        let _ = self.gate.try_close();
        history.sort_by_key(|payload| payload.number);

        let mut folded: Vec<EpochPayload> = Vec::with_capacity(history.len());
        let mut prior: Option<Epoch> = None;
        for payload in history {
            if let Some(previous) = &prior {
                let identity = previous.identity()?;
                if payload.ancestor.as_deref() != Some(identity.as_str())
                    || payload.number != previous.number() + 1
                {
                    return Err(WorldError::HistoryDiscontinuous {
                        number: payload.number,
                    });
                }
            }
            let bytes = self.torrent.get_torrent_data(&payload.body_hash)?;
            let seed = match &prior {
                Some(previous) => Some(previous.final_snapshots()?),
                None => None,
            };
            let epoch = Epoch::hydrate(&payload, &bytes, seed.as_ref(), self.torrent.as_ref())?;
            folded.push(payload);
            prior = Some(epoch);
        }

        self.epoch = match prior {
            Some(last) => last.next()?,
            None => Epoch::genesis(self.genesis),
        };
        self.history = folded;
        self.received.clear();
        self.dropped.clear();
        self.gate.clear_buffered();
        self.position = None;

        if let Some(fetch) = fetch_signals {
            for data in fetch()? {
                self.receive(data);
            }
        }
        self.listen(true);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Finalization & rotation
    // -------------------------------------------------------------------------

    /// Freeze admission and seal the live epoch at ending block `omega`.
    /// The gate stays closed until `release` rotates the epoch out; signing
    /// may happen out-of-process against `epoch().seal_bytes()`.
    pub fn stage(&mut self, omega: BlockNumber) -> Result<(), WorldError> {
        let was_open = self.gate.is_open();
        let _ = self.gate.try_close();
        if let Err(error) = self.epoch.finalize(omega) {
            if was_open {
                self.reopen();
            }
            return Err(error);
        }
        Ok(())
    }

    /// Attach the signer's signature to the staged epoch, hand it to the
    /// release sink, and rotate to the successor. A sink failure leaves the
    /// world staged and the call safe to retry.
    pub fn release(&mut self, signature: &str) -> Result<EpochPayload, WorldError> {
        let omega = self.epoch.omega().ok_or(WorldError::EpochNotStaged {
            number: self.epoch.number(),
        })?;
        let stamp = self
            .clock
            .read_number(omega)
            .ok_or(WorldError::BlockUnknown { number: omega })?;

        self.epoch
            .set_release(self.signer.clone(), signature.to_string(), stamp.timestamp);
        self.epoch
            .verify(self.clock.as_ref(), omega, &self.signer_key)?;

        let payload = self.epoch.payload()?;
        let body = self.epoch.body()?;
        self.sink.release_epoch(&payload, &body)?;

        self.history.push(payload.clone());
        self.received.clear();
        self.dropped.clear();
        self.gate.clear_buffered();
        self.epoch = self.epoch.next()?;
        self.listen(true);
        Ok(payload)
    }

    // -------------------------------------------------------------------------
    // Snapshot export
    // -------------------------------------------------------------------------

    /// Project everything a remote observer needs to reconstruct current
    /// world state. `since` restricts signals and drop records to those at
    /// or after the given block.
    pub fn contact(&self, since: Option<BlockNumber>) -> WorldView {
        let signals = self
            .epoch
            .signals()
            .iter()
            .filter(|signal| match since {
                Some(block) => signal.block_number.map_or(true, |number| number >= block),
                None => true,
            })
            .cloned()
            .collect();
        let dropped = self
            .dropped
            .iter()
            .filter(|(_, at_block)| since.map_or(true, |block| **at_block >= block))
            .map(|(uuid, at_block)| (uuid.clone(), *at_block))
            .collect();

        WorldView {
            signer: self.signer.clone(),
            ancestor: self.epoch.ancestor().map(str::to_string),
            number: self.epoch.number(),
            alpha: self.epoch.alpha(),
            initial: self.epoch.initial().clone(),
            signals,
            dropped,
            position: self.position,
            history: self.history.to_vec(),
            state_hash: hash_json(self.epoch.state()).unwrap_or_default(),
        }
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    fn reopen(&mut self) {
        let drained = self.gate.open();
        for signal in drained {
            self.admit(signal);
        }
    }

    fn notify(&self, dispatch: impl FnOnce(&dyn WorldObserver, &WorldStatus)) {
        let Some(observer) = &self.observer else {
            return;
        };
        let status = self.status();
        let outcome = catch_unwind(AssertUnwindSafe(|| dispatch(observer.as_ref(), &status)));
        if outcome.is_err() {
            tracing::warn!("world observer panicked; notification dropped");
        }
    }
}
