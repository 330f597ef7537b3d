//! Epoch model: an ordered, eventually-sealed batch of included signals.

use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};

use signal_world_proto::{
    blake3_hex, from_canonical_cbor, BlockNumber, EpochBody, EpochNumber, EpochPayload,
    SignalRecord, StateSnapshot,
};

use super::clock::ChainClock;
use super::error::WorldError;
use super::signal::Signal;
use super::signer::verify_bytes;
use super::torrent::TorrentStore;

/// An epoch anchored to the block range `[alpha, omega]`.
///
/// Mutable while unfinalized (`include`, `drop_signals`), frozen by
/// `finalize`, signed and rotated out by the orchestrator's release path.
/// Its evolving `state` is one document per world domain; replaying the
/// included signals over `initial` always reproduces it.
#[derive(Debug, Clone, PartialEq)]
pub struct Epoch {
    ancestor: Option<String>,
    number: EpochNumber,
    alpha: BlockNumber,
    omega: Option<BlockNumber>,
    initial: BTreeMap<String, StateSnapshot>,
    signals: Vec<Signal>,
    state: BTreeMap<String, JsonValue>,
    author_alias: Option<String>,
    signature: Option<String>,
    released_at: Option<u64>,
}

impl Epoch {
    /// Epoch 0 of a fresh lineage.
    pub fn genesis(alpha: BlockNumber) -> Self {
        Self {
            ancestor: None,
            number: 0,
            alpha,
            omega: None,
            initial: BTreeMap::new(),
            signals: Vec::new(),
            state: BTreeMap::new(),
            author_alias: None,
            signature: None,
            released_at: None,
        }
    }

    pub fn ancestor(&self) -> Option<&str> {
        self.ancestor.as_deref()
    }

    pub fn number(&self) -> EpochNumber {
        self.number
    }

    pub fn alpha(&self) -> BlockNumber {
        self.alpha
    }

    pub fn omega(&self) -> Option<BlockNumber> {
        self.omega
    }

    pub fn is_finalized(&self) -> bool {
        self.omega.is_some()
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn state(&self) -> &BTreeMap<String, JsonValue> {
        &self.state
    }

    pub fn initial(&self) -> &BTreeMap<String, StateSnapshot> {
        &self.initial
    }

    pub fn author_alias(&self) -> Option<&str> {
        self.author_alias.as_deref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Append a signal and fold its payload into the domain state document.
    pub fn include(&mut self, signal: &Signal) -> Result<(), WorldError> {
        if self.is_finalized() {
            return Err(WorldError::EpochSealed {
                number: self.number,
            });
        }
        fold_signal(&mut self.state, signal);
        self.signals.push(signal.clone());
        Ok(())
    }

    /// Remove signals by uuid and rebuild state from `initial` plus the
    /// remaining members. Detached initial snapshots are refetched through
    /// the torrent store.
    pub fn drop_signals(
        &mut self,
        uuids: &[String],
        torrent: &dyn TorrentStore,
    ) -> Result<Vec<Signal>, WorldError> {
        if self.is_finalized() {
            return Err(WorldError::EpochSealed {
                number: self.number,
            });
        }
        let targets: BTreeSet<&str> = uuids.iter().map(String::as_str).collect();
        let (removed, kept): (Vec<Signal>, Vec<Signal>) = self
            .signals
            .drain(..)
            .partition(|signal| targets.contains(signal.uuid.as_str()));
        if removed.is_empty() {
            self.signals = kept;
            return Ok(removed);
        }

        let mut state = decode_snapshots(&self.initial, torrent)?;
        for signal in &kept {
            fold_signal(&mut state, signal);
        }
        self.signals = kept;
        self.state = state;
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Sealing
    // -------------------------------------------------------------------------

    /// Freeze membership and state at ending block `omega`.
    pub fn finalize(&mut self, omega: BlockNumber) -> Result<(), WorldError> {
        if self.is_finalized() {
            return Err(WorldError::EpochSealed {
                number: self.number,
            });
        }
        if omega < self.alpha {
            return Err(WorldError::EpochRangeInvalid {
                alpha: self.alpha,
                omega,
            });
        }
        self.omega = Some(omega);
        Ok(())
    }

    pub fn body(&self) -> Result<EpochBody, WorldError> {
        Ok(EpochBody {
            initial: self.initial.clone(),
            signals: self
                .signals
                .iter()
                .cloned()
                .map(SignalRecord::from)
                .collect(),
        })
    }

    /// The serializable projection stored into history. Requires a seal.
    pub fn payload(&self) -> Result<EpochPayload, WorldError> {
        let omega = self.omega.ok_or(WorldError::EpochNotStaged {
            number: self.number,
        })?;
        Ok(EpochPayload {
            ancestor: self.ancestor.clone(),
            number: self.number,
            alpha: self.alpha,
            omega,
            body_hash: self.body()?.content_hash()?,
            author_alias: self.author_alias.clone(),
            signature: self.signature.clone(),
            released_at: self.released_at,
        })
    }

    /// The bytes an out-of-process signer must cover to release this epoch.
    pub fn seal_bytes(&self) -> Result<Vec<u8>, WorldError> {
        Ok(self.payload()?.seal_bytes()?)
    }

    /// Identity of the sealed epoch, the `ancestor` of its successor.
    pub fn identity(&self) -> Result<String, WorldError> {
        Ok(self.payload()?.identity()?)
    }

    /// Compressed per-domain snapshots of the final state.
    pub fn final_snapshots(&self) -> Result<BTreeMap<String, StateSnapshot>, WorldError> {
        let mut snapshots = BTreeMap::new();
        for (domain, document) in &self.state {
            snapshots.insert(
                domain.clone(),
                StateSnapshot::from_state(domain.clone(), document)?,
            );
        }
        Ok(snapshots)
    }

    pub(super) fn set_release(
        &mut self,
        author_alias: String,
        signature: String,
        released_at: u64,
    ) {
        self.author_alias = Some(author_alias);
        self.signature = Some(signature);
        self.released_at = Some(released_at);
    }

    /// Check the attached release signature against the sealed content at
    /// block `omega`.
    pub fn verify(
        &self,
        clock: &dyn ChainClock,
        omega: BlockNumber,
        signer_key_hex: &str,
    ) -> Result<(), WorldError> {
        if self.omega != Some(omega) {
            return Err(WorldError::EpochNotStaged {
                number: self.number,
            });
        }
        if clock.read_number(omega).is_none() {
            return Err(WorldError::BlockUnknown { number: omega });
        }
        let subject = format!("epoch {}", self.number);
        let signature = self
            .signature
            .as_deref()
            .ok_or_else(|| WorldError::SignatureInvalid {
                subject: subject.clone(),
            })?;
        verify_bytes(signer_key_hex, &self.seal_bytes()?, signature, &subject)
    }

    // -------------------------------------------------------------------------
    // Succession and replay
    // -------------------------------------------------------------------------

    /// The live successor of a released epoch: its initial state is exactly
    /// this epoch's final state.
    pub fn next(&self) -> Result<Epoch, WorldError> {
        let omega = self.omega.ok_or(WorldError::EpochNotStaged {
            number: self.number,
        })?;
        Ok(Epoch {
            ancestor: Some(self.identity()?),
            number: self.number + 1,
            alpha: omega + 1,
            omega: None,
            initial: self.final_snapshots()?,
            signals: Vec::new(),
            state: self.state.clone(),
            author_alias: None,
            signature: None,
            released_at: None,
        })
    }

    /// Reconstruct a sealed epoch from its history payload and fetched body
    /// bytes. `seed` supplies the predecessor's final snapshots; without it
    /// the body's own recorded initial snapshots are used.
    pub fn hydrate(
        payload: &EpochPayload,
        bytes: &[u8],
        seed: Option<&BTreeMap<String, StateSnapshot>>,
        torrent: &dyn TorrentStore,
    ) -> Result<Epoch, WorldError> {
        let actual = blake3_hex(bytes);
        if actual != payload.body_hash {
            return Err(WorldError::TorrentHashMismatch {
                expected: payload.body_hash.clone(),
                actual,
            });
        }
        let body = EpochBody::decode(bytes)?;
        let initial = match seed {
            Some(snapshots) => snapshots.clone(),
            None => body.initial,
        };
        let mut state = decode_snapshots(&initial, torrent)?;
        let signals: Vec<Signal> = body.signals.into_iter().map(Signal::from).collect();
        for signal in &signals {
            fold_signal(&mut state, signal);
        }
        Ok(Epoch {
            ancestor: payload.ancestor.clone(),
            number: payload.number,
            alpha: payload.alpha,
            omega: Some(payload.omega),
            initial,
            signals,
            state,
            author_alias: payload.author_alias.clone(),
            signature: payload.signature.clone(),
            released_at: payload.released_at,
        })
    }
}

/// Fold a signal's payload into the state document for its domain.
/// Null payloads carry no state change.
fn fold_signal(state: &mut BTreeMap<String, JsonValue>, signal: &Signal) {
    if signal.payload.is_null() {
        return;
    }
    let document = state
        .entry(signal.domain().to_string())
        .or_insert_with(|| JsonValue::Object(Map::new()));
    merge_document(document, &signal.payload);
}

/// Deterministic shallow merge: object keys overwrite, anything else
/// replaces the document wholesale.
fn merge_document(document: &mut JsonValue, payload: &JsonValue) {
    match (document, payload) {
        (JsonValue::Object(existing), JsonValue::Object(incoming)) => {
            for (key, value) in incoming {
                existing.insert(key.clone(), value.clone());
            }
        }
        (document, payload) => *document = payload.clone(),
    }
}

/// Decode per-domain snapshots, resolving detached ones through the torrent
/// store.
fn decode_snapshots(
    snapshots: &BTreeMap<String, StateSnapshot>,
    torrent: &dyn TorrentStore,
) -> Result<BTreeMap<String, JsonValue>, WorldError> {
    let mut state = BTreeMap::new();
    for (domain, snapshot) in snapshots {
        let document = match snapshot.decode()? {
            Some(document) => document,
            None => {
                let bytes = torrent.get_torrent_data(&snapshot.hash)?;
                from_canonical_cbor(&bytes)?
            }
        };
        state.insert(domain.clone(), document);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::clock::InMemoryClock;
    use crate::runtime::signal::WORLD_PARAM;
    use crate::runtime::signer::WorldSigner;
    use crate::runtime::torrent::InMemoryTorrentStore;
    use serde_json::json;

    fn signal(uuid: &str, block_number: u64, payload: JsonValue) -> Signal {
        let mut signal = Signal::bare(uuid, None, format!("block-{block_number}"));
        signal.block_number = Some(block_number);
        signal.located = true;
        signal.payload = payload;
        signal
    }

    #[test]
    fn include_merges_payload_into_domain_state() {
        let mut epoch = Epoch::genesis(100);
        epoch
            .include(&signal("s-1", 100, json!({"alice": 5})))
            .expect("include");
        epoch
            .include(&signal("s-2", 101, json!({"bob": 7})))
            .expect("include");

        assert_eq!(epoch.signals().len(), 2);
        assert_eq!(
            epoch.state().get(WORLD_PARAM),
            Some(&json!({"alice": 5, "bob": 7}))
        );
    }

    #[test]
    fn include_and_drop_are_rejected_after_finalize() {
        let torrent = InMemoryTorrentStore::new();
        let mut epoch = Epoch::genesis(100);
        epoch.finalize(110).expect("finalize");

        let err = epoch
            .include(&signal("s-1", 100, json!({})))
            .expect_err("sealed");
        assert!(matches!(err, WorldError::EpochSealed { .. }));

        let err = epoch
            .drop_signals(&["s-1".to_string()], &torrent)
            .expect_err("sealed");
        assert!(matches!(err, WorldError::EpochSealed { .. }));

        let err = epoch.finalize(120).expect_err("double finalize");
        assert!(matches!(err, WorldError::EpochSealed { .. }));
    }

    #[test]
    fn finalize_rejects_omega_before_alpha() {
        let mut epoch = Epoch::genesis(100);
        let err = epoch.finalize(99).expect_err("range");
        assert!(matches!(err, WorldError::EpochRangeInvalid { .. }));
    }

    #[test]
    fn drop_rebuilds_state_from_initial() {
        let torrent = InMemoryTorrentStore::new();
        let mut epoch = Epoch::genesis(100);
        epoch
            .include(&signal("s-1", 100, json!({"alice": 5})))
            .expect("include");
        epoch
            .include(&signal("s-2", 101, json!({"bob": 7})))
            .expect("include");

        let removed = epoch
            .drop_signals(&["s-1".to_string()], &torrent)
            .expect("drop");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].uuid, "s-1");
        assert_eq!(epoch.signals().len(), 1);
        assert_eq!(epoch.state().get(WORLD_PARAM), Some(&json!({"bob": 7})));
    }

    #[test]
    fn drop_of_unknown_uuid_is_a_clean_no_op() {
        let torrent = InMemoryTorrentStore::new();
        let mut epoch = Epoch::genesis(100);
        epoch
            .include(&signal("s-1", 100, json!({"alice": 5})))
            .expect("include");

        let removed = epoch
            .drop_signals(&["missing".to_string()], &torrent)
            .expect("drop");
        assert!(removed.is_empty());
        assert_eq!(epoch.signals().len(), 1);
        assert_eq!(epoch.state().get(WORLD_PARAM), Some(&json!({"alice": 5})));
    }

    #[test]
    fn next_chains_identity_and_seeds_state() {
        let mut epoch = Epoch::genesis(100);
        epoch
            .include(&signal("s-1", 100, json!({"alice": 5})))
            .expect("include");
        epoch.finalize(110).expect("finalize");

        let successor = epoch.next().expect("next");
        assert_eq!(successor.number(), 1);
        assert_eq!(successor.alpha(), 111);
        assert_eq!(
            successor.ancestor(),
            Some(epoch.identity().expect("identity").as_str())
        );
        assert_eq!(successor.state(), epoch.state());
        assert!(successor.signals().is_empty());
        assert!(!successor.is_finalized());
    }

    #[test]
    fn hydrate_reproduces_sealed_state_byte_for_byte() {
        let torrent = InMemoryTorrentStore::new();
        let mut epoch = Epoch::genesis(100);
        epoch
            .include(&signal("s-1", 100, json!({"alice": 5})))
            .expect("include");
        epoch
            .include(&signal("s-2", 101, json!({"alice": 6, "bob": 1})))
            .expect("include");
        epoch.finalize(110).expect("finalize");

        let payload = epoch.payload().expect("payload");
        let bytes = epoch.body().expect("body").encode().expect("encode");

        let rebuilt = Epoch::hydrate(&payload, &bytes, None, &torrent).expect("hydrate");
        assert_eq!(rebuilt.state(), epoch.state());
        assert_eq!(
            rebuilt.final_snapshots().expect("snapshots"),
            epoch.final_snapshots().expect("snapshots")
        );
        assert_eq!(rebuilt.identity().expect("id"), epoch.identity().expect("id"));
    }

    #[test]
    fn hydrate_rejects_body_hash_mismatch() {
        let torrent = InMemoryTorrentStore::new();
        let mut epoch = Epoch::genesis(100);
        epoch.finalize(110).expect("finalize");
        let payload = epoch.payload().expect("payload");

        let err = Epoch::hydrate(&payload, b"mangled", None, &torrent).expect_err("mismatch");
        assert!(matches!(err, WorldError::TorrentHashMismatch { .. }));
    }

    #[test]
    fn verify_checks_signature_against_seal() {
        let clock = InMemoryClock::new();
        clock.seed_range(100, 110);
        let signer = WorldSigner::generate();

        let mut epoch = Epoch::genesis(100);
        epoch
            .include(&signal("s-1", 100, json!({"alice": 5})))
            .expect("include");
        epoch.finalize(110).expect("finalize");
        let seal = epoch.seal_bytes().expect("seal");
        epoch.set_release("oracle".to_string(), signer.sign_bytes(&seal), 1_700_001_320);

        epoch
            .verify(&clock, 110, &signer.verifying_key_hex())
            .expect("verify");

        let other = WorldSigner::generate();
        let err = epoch
            .verify(&clock, 110, &other.verifying_key_hex())
            .expect_err("wrong key");
        assert!(matches!(err, WorldError::SignatureInvalid { .. }));
    }
}
