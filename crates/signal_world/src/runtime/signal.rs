//! Signal model: a signed, block-anchored unit of change.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use signal_world_proto::{to_canonical_cbor, BlockNumber, SignalRecord};

use super::clock::ChainClock;
use super::error::WorldError;
use super::signer::verify_bytes;

/// Param key carrying the world domain tag stamped at admission.
pub const WORLD_PARAM: &str = "world";
/// Param key carrying a transient location hint, stripped at admission.
pub const LOCATION_PARAM: &str = "location";

/// A signed unit of change proposed by a participant, anchored to a block.
///
/// The signature covers the canonical encoding of `(uuid, epoch, block,
/// payload)`. Params stay mutable after signing and are excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub uuid: String,
    #[serde(default)]
    pub epoch: Option<String>,
    pub block: String,
    #[serde(default)]
    pub block_number: Option<BlockNumber>,
    #[serde(default)]
    pub located: bool,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub params: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub dropped: Option<BlockNumber>,
}

#[derive(Debug, Serialize)]
struct SigningView<'a> {
    uuid: &'a str,
    epoch: Option<&'a str>,
    block: &'a str,
    payload: &'a JsonValue,
}

impl Signal {
    /// An unsigned signal carcass. Useful for staging before signing.
    pub fn bare(uuid: impl Into<String>, epoch: Option<String>, block: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            epoch,
            block: block.into(),
            block_number: None,
            located: false,
            author: String::new(),
            signature: String::new(),
            payload: JsonValue::Null,
            params: BTreeMap::new(),
            dropped: None,
        }
    }

    /// The bytes a signal signature must cover.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, WorldError> {
        Ok(to_canonical_cbor(&SigningView {
            uuid: &self.uuid,
            epoch: self.epoch.as_deref(),
            block: &self.block,
            payload: &self.payload,
        })?)
    }

    pub fn clear_location(&mut self) {
        self.params.remove(LOCATION_PARAM);
    }

    pub fn add_params(&mut self, params: BTreeMap<String, JsonValue>) {
        self.params.extend(params);
    }

    /// The domain tag stamped at admission, or the bare default.
    pub fn domain(&self) -> &str {
        self.params
            .get(WORLD_PARAM)
            .and_then(JsonValue::as_str)
            .unwrap_or(WORLD_PARAM)
    }

    /// Resolve the claimed block hash against the clock. Returns whether the
    /// signal is now located.
    pub fn locate(&mut self, clock: &dyn ChainClock) -> bool {
        if let Some(stamp) = clock.read_hash(&self.block) {
            self.block_number = Some(stamp.number);
            self.located = true;
        }
        self.located
    }

    /// Verify authorship, integrity, and anchoring context against the block
    /// number the clock resolved for this signal.
    pub fn verify(&self, clock: &dyn ChainClock, block_number: BlockNumber) -> Result<(), WorldError> {
        let stamp = clock
            .read_hash(&self.block)
            .ok_or_else(|| WorldError::SignalUnlocated {
                uuid: self.uuid.clone(),
            })?;
        if stamp.number != block_number {
            return Err(WorldError::SignalContextMismatch {
                uuid: self.uuid.clone(),
                expected: block_number,
                found: stamp.number,
            });
        }
        let bytes = self.signing_bytes()?;
        verify_bytes(&self.author, &bytes, &self.signature, &self.uuid)
    }

    /// Deterministic total order: resolved block number ascending, ties
    /// broken by uuid. Inclusion order determines final state, so every
    /// replica must sort identically.
    pub fn total_order(&self, other: &Signal) -> Ordering {
        let left = self.block_number.unwrap_or(BlockNumber::MAX);
        let right = other.block_number.unwrap_or(BlockNumber::MAX);
        left.cmp(&right).then_with(|| self.uuid.cmp(&other.uuid))
    }
}

impl From<Signal> for SignalRecord {
    fn from(signal: Signal) -> Self {
        SignalRecord {
            uuid: signal.uuid,
            epoch: signal.epoch,
            block: signal.block,
            block_number: signal.block_number,
            author: signal.author,
            signature: signal.signature,
            payload: signal.payload,
            params: signal.params,
            dropped: signal.dropped,
        }
    }
}

impl From<SignalRecord> for Signal {
    fn from(record: SignalRecord) -> Self {
        Signal {
            uuid: record.uuid,
            epoch: record.epoch,
            block: record.block,
            located: record.block_number.is_some(),
            block_number: record.block_number,
            author: record.author,
            signature: record.signature,
            payload: record.payload,
            params: record.params,
            dropped: record.dropped,
        }
    }
}

/// Inbound signal material: raw JSON from the wire or an already-typed
/// signal. Coercion is idempotent on typed input.
#[derive(Debug, Clone)]
pub enum SignalData {
    Raw(JsonValue),
    Typed(Signal),
}

impl SignalData {
    pub fn into_signal(self) -> Result<Signal, WorldError> {
        match self {
            SignalData::Typed(signal) => Ok(signal),
            SignalData::Raw(value) => {
                serde_json::from_value(value).map_err(|error| WorldError::MalformedSignal {
                    reason: error.to_string(),
                })
            }
        }
    }
}

impl From<Signal> for SignalData {
    fn from(signal: Signal) -> Self {
        SignalData::Typed(signal)
    }
}

impl From<JsonValue> for SignalData {
    fn from(value: JsonValue) -> Self {
        SignalData::Raw(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::clock::InMemoryClock;
    use crate::runtime::signer::WorldSigner;
    use crate::runtime::types::BlockRecord;
    use serde_json::json;

    fn clock() -> InMemoryClock {
        let clock = InMemoryClock::new();
        clock.insert_block(BlockRecord {
            number: 100,
            hash: "block-100".to_string(),
            timestamp: 1_700_000_000,
        });
        clock
    }

    #[test]
    fn coercion_is_idempotent_on_typed_input() {
        let signal = Signal::bare("s-1", None, "block-100");
        let coerced = SignalData::from(signal.clone()).into_signal().expect("coerce");
        assert_eq!(coerced, signal);
    }

    #[test]
    fn coercion_parses_raw_json() {
        let signal = SignalData::from(json!({
            "uuid": "s-1",
            "block": "block-100",
            "payload": {"balance": 3}
        }))
        .into_signal()
        .expect("coerce");
        assert_eq!(signal.uuid, "s-1");
        assert_eq!(signal.epoch, None);
        assert!(!signal.located);
    }

    #[test]
    fn coercion_rejects_non_signal_json() {
        let err = SignalData::from(json!("not a signal"))
            .into_signal()
            .expect_err("must fail");
        assert!(matches!(err, WorldError::MalformedSignal { .. }));
    }

    #[test]
    fn locate_resolves_known_blocks() {
        let clock = clock();
        let mut signal = Signal::bare("s-1", None, "block-100");
        assert!(signal.locate(&clock));
        assert_eq!(signal.block_number, Some(100));

        let mut unknown = Signal::bare("s-2", None, "block-999");
        assert!(!unknown.locate(&clock));
        assert_eq!(unknown.block_number, None);
    }

    #[test]
    fn verify_accepts_well_signed_signal() {
        let clock = clock();
        let signer = WorldSigner::generate();
        let mut signal = Signal::bare("s-1", None, "block-100");
        signal.payload = json!({"balance": 3});
        signer.sign_signal(&mut signal).expect("sign");

        signal.verify(&clock, 100).expect("verify");
    }

    #[test]
    fn verify_rejects_payload_tamper_and_context_mismatch() {
        let clock = clock();
        let signer = WorldSigner::generate();
        let mut signal = Signal::bare("s-1", None, "block-100");
        signal.payload = json!({"balance": 3});
        signer.sign_signal(&mut signal).expect("sign");

        let err = signal.verify(&clock, 101).expect_err("wrong block");
        assert!(matches!(err, WorldError::SignalContextMismatch { .. }));

        signal.payload = json!({"balance": 9000});
        let err = signal.verify(&clock, 100).expect_err("tampered");
        assert!(matches!(err, WorldError::SignatureInvalid { .. }));
    }

    #[test]
    fn params_survive_signing() {
        let signer = WorldSigner::generate();
        let mut signal = Signal::bare("s-1", None, "block-100");
        signer.sign_signal(&mut signal).expect("sign");
        let bytes = signal.signing_bytes().expect("bytes");

        signal.add_params(BTreeMap::from([(
            WORLD_PARAM.to_string(),
            json!("asteroids"),
        )]));
        assert_eq!(signal.signing_bytes().expect("bytes"), bytes);
        assert_eq!(signal.domain(), "asteroids");
    }

    #[test]
    fn total_order_sorts_by_block_then_uuid() {
        let mut a = Signal::bare("s-b", None, "block-101");
        a.block_number = Some(101);
        let mut b = Signal::bare("s-a", None, "block-100");
        b.block_number = Some(100);
        let mut c = Signal::bare("s-a", None, "block-101");
        c.block_number = Some(101);

        let mut signals = vec![a, b, c];
        signals.sort_by(|left, right| left.total_order(right));
        let keys: Vec<(&str, Option<u64>)> = signals
            .iter()
            .map(|s| (s.uuid.as_str(), s.block_number))
            .collect();
        assert_eq!(
            keys,
            vec![("s-a", Some(100)), ("s-a", Some(101)), ("s-b", Some(101))]
        );
    }
}
