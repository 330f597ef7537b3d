//! Ed25519 signing helpers for signals and epoch seals.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use super::error::WorldError;
use super::signal::Signal;

/// Holds a participant's signing key and produces signal and seal signatures.
#[derive(Debug, Clone)]
pub struct WorldSigner {
    signing_key: SigningKey,
}

impl WorldSigner {
    pub fn from_hex(private_key_hex: &str) -> Result<Self, WorldError> {
        Ok(Self {
            signing_key: signing_key_from_hex(private_key_hex)?,
        })
    }

    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Hex encoding of the verifying key other participants check against.
    pub fn verifying_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign arbitrary sealed bytes (epoch seals, out-of-process flows).
    pub fn sign_bytes(&self, bytes: &[u8]) -> String {
        hex::encode(self.signing_key.sign(bytes).to_bytes())
    }

    /// Stamp a signal with this signer's authorship and signature.
    pub fn sign_signal(&self, signal: &mut Signal) -> Result<(), WorldError> {
        let bytes = signal.signing_bytes()?;
        signal.author = self.verifying_key_hex();
        signal.signature = self.sign_bytes(&bytes);
        Ok(())
    }
}

/// Verify an ed25519 signature over `bytes` against a hex verifying key.
pub(super) fn verify_bytes(
    verifying_key_hex: &str,
    bytes: &[u8],
    signature_hex: &str,
    subject: &str,
) -> Result<(), WorldError> {
    let verifying_key = verifying_key_from_hex(verifying_key_hex)?;
    let signature_bytes = hex::decode(signature_hex).map_err(|_| WorldError::SignatureInvalid {
        subject: subject.to_string(),
    })?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| WorldError::SignatureInvalid {
            subject: subject.to_string(),
        })?;
    verifying_key
        .verify(bytes, &signature)
        .map_err(|_| WorldError::SignatureInvalid {
            subject: subject.to_string(),
        })
}

pub(super) fn verifying_key_from_hex(key_hex: &str) -> Result<VerifyingKey, WorldError> {
    let bytes = hex::decode(key_hex).map_err(|_| WorldError::SignatureKeyInvalid)?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| WorldError::SignatureKeyInvalid)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| WorldError::SignatureKeyInvalid)
}

fn signing_key_from_hex(key_hex: &str) -> Result<SigningKey, WorldError> {
    let bytes = hex::decode(key_hex).map_err(|_| WorldError::SignatureKeyInvalid)?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| WorldError::SignatureKeyInvalid)?;
    Ok(SigningKey::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let signer = WorldSigner::generate();
        let signature = signer.sign_bytes(b"sealed-content");
        verify_bytes(
            &signer.verifying_key_hex(),
            b"sealed-content",
            &signature,
            "seal",
        )
        .expect("verify");
    }

    #[test]
    fn verify_rejects_tampered_bytes() {
        let signer = WorldSigner::generate();
        let signature = signer.sign_bytes(b"sealed-content");
        let err = verify_bytes(
            &signer.verifying_key_hex(),
            b"tampered-content",
            &signature,
            "seal",
        )
        .expect_err("must fail");
        assert!(matches!(err, WorldError::SignatureInvalid { .. }));
    }

    #[test]
    fn from_hex_rejects_short_keys() {
        let err = WorldSigner::from_hex("deadbeef").expect_err("must fail");
        assert_eq!(err, WorldError::SignatureKeyInvalid);
    }
}
