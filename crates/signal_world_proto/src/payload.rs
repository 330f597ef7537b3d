//! Epoch payload, body, and snapshot wire types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

pub type BlockNumber = u64;
pub type EpochNumber = u64;

/// Compressed projection of one domain's state document.
///
/// `data` is the canonical CBOR encoding of the document and may be
/// detached (`None`) when the snapshot travels by reference; the torrent
/// transport resolves `hash` back to the bytes in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub domain: String,
    pub hash: String,
    pub data: Option<Vec<u8>>,
}

impl StateSnapshot {
    /// Snapshot a state document under its domain tag.
    pub fn from_state(domain: impl Into<String>, state: &JsonValue) -> Result<Self, serde_cbor::Error> {
        let data = to_canonical_cbor(state)?;
        Ok(Self {
            domain: domain.into(),
            hash: blake3_hex(&data),
            data: Some(data),
        })
    }

    /// Decode the inline document, if the snapshot carries one.
    pub fn decode(&self) -> Result<Option<JsonValue>, serde_cbor::Error> {
        match &self.data {
            Some(bytes) => Ok(Some(serde_cbor::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    /// The same snapshot with the inline bytes dropped, travelling by reference.
    pub fn detached(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            hash: self.hash.clone(),
            data: None,
        }
    }
}

/// One signal as recorded inside a sealed epoch body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub uuid: String,
    pub epoch: Option<String>,
    pub block: String,
    pub block_number: Option<BlockNumber>,
    pub author: String,
    pub signature: String,
    pub payload: JsonValue,
    pub params: BTreeMap<String, JsonValue>,
    pub dropped: Option<BlockNumber>,
}

/// Full content of a sealed epoch, published through the torrent transport
/// and addressed by the blake3 hash of its canonical encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochBody {
    pub initial: BTreeMap<String, StateSnapshot>,
    pub signals: Vec<SignalRecord>,
}

impl EpochBody {
    pub fn encode(&self) -> Result<Vec<u8>, serde_cbor::Error> {
        to_canonical_cbor(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_cbor::Error> {
        serde_cbor::from_slice(bytes)
    }

    pub fn content_hash(&self) -> Result<String, serde_cbor::Error> {
        Ok(blake3_hex(&self.encode()?))
    }
}

/// The serializable projection of a sealed epoch stored into history.
///
/// The seal covers `(ancestor, number, alpha, omega, body_hash)`; the
/// signature, author alias, and release timestamp are attached after the
/// fact and excluded from the sealed bytes. A released epoch's identity is
/// the blake3 hash of its seal bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochPayload {
    pub ancestor: Option<String>,
    pub number: EpochNumber,
    pub alpha: BlockNumber,
    pub omega: BlockNumber,
    pub body_hash: String,
    pub author_alias: Option<String>,
    pub signature: Option<String>,
    pub released_at: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SealView<'a> {
    ancestor: Option<&'a str>,
    number: EpochNumber,
    alpha: BlockNumber,
    omega: BlockNumber,
    body_hash: &'a str,
}

impl EpochPayload {
    /// The bytes the release signature must cover.
    pub fn seal_bytes(&self) -> Result<Vec<u8>, serde_cbor::Error> {
        to_canonical_cbor(&SealView {
            ancestor: self.ancestor.as_deref(),
            number: self.number,
            alpha: self.alpha,
            omega: self.omega,
            body_hash: &self.body_hash,
        })
    }

    /// Identity of the sealed epoch, referenced as `ancestor` by its successor.
    pub fn identity(&self) -> Result<String, serde_cbor::Error> {
        Ok(blake3_hex(&self.seal_bytes()?))
    }
}

/// Encode a value as canonical CBOR: map keys sorted, self-describing tag.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_cbor::Error> {
    let mut buf = Vec::with_capacity(256);
    let canonical_value = serde_cbor::value::to_value(value)?;
    let mut serializer = serde_cbor::ser::Serializer::new(&mut buf);
    serializer.self_describe()?;
    canonical_value.serialize(&mut serializer)?;
    Ok(buf)
}

pub fn from_canonical_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_cbor::Error> {
    serde_cbor::from_slice(bytes)
}

pub fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(uuid: &str) -> SignalRecord {
        SignalRecord {
            uuid: uuid.to_string(),
            epoch: None,
            block: "block-100".to_string(),
            block_number: Some(100),
            author: String::new(),
            signature: String::new(),
            payload: json!({"balance": 5}),
            params: BTreeMap::new(),
            dropped: None,
        }
    }

    #[test]
    fn canonical_cbor_is_stable_across_insertion_order() {
        let forward = to_canonical_cbor(&json!({"a": 1, "b": 2})).expect("encode");
        let reverse = to_canonical_cbor(&json!({"b": 2, "a": 1})).expect("encode");
        assert_eq!(forward, reverse);
    }

    #[test]
    fn snapshot_round_trips_and_detaches() {
        let state = json!({"supply": 1000, "owner": "alice"});
        let snapshot = StateSnapshot::from_state("world", &state).expect("snapshot");
        assert_eq!(snapshot.decode().expect("decode"), Some(state));

        let detached = snapshot.detached();
        assert_eq!(detached.hash, snapshot.hash);
        assert_eq!(detached.decode().expect("decode"), None);
    }

    #[test]
    fn body_hash_matches_encoded_bytes() {
        let body = EpochBody {
            initial: BTreeMap::new(),
            signals: vec![record("s-1"), record("s-2")],
        };
        let bytes = body.encode().expect("encode");
        assert_eq!(body.content_hash().expect("hash"), blake3_hex(&bytes));
        assert_eq!(EpochBody::decode(&bytes).expect("decode"), body);
    }

    #[test]
    fn payload_identity_ignores_signature_fields() {
        let mut payload = EpochPayload {
            ancestor: None,
            number: 0,
            alpha: 100,
            omega: 110,
            body_hash: "abc".to_string(),
            author_alias: None,
            signature: None,
            released_at: None,
        };
        let unsigned = payload.identity().expect("identity");
        payload.author_alias = Some("oracle".to_string());
        payload.signature = Some("deadbeef".to_string());
        payload.released_at = Some(1_700_000_000);
        assert_eq!(payload.identity().expect("identity"), unsigned);
    }
}
