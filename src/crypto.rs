use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Decodes a base64 string, mapping failure to a malformed-payload error.
pub fn decode_base64(input: &str) -> AppResult<Vec<u8>> {
    BASE64
        .decode(input)
        .map_err(|_| AppError::malformed("invalid base64"))
}

pub fn encode_base64(input: &[u8]) -> String {
    BASE64.encode(input)
}

/// Generates a fresh ed25519 keypair.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Decodes a base64-encoded 32-byte ed25519 public key.
pub fn verifying_key_from_b64(input: &str) -> AppResult<VerifyingKey> {
    let bytes = decode_base64(input)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AppError::malformed("public key must be 32 bytes"))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| AppError::malformed("invalid public key"))
}

/// A self-describing signed envelope: base64 payload bytes, the base64
/// ed25519 key of the signer, and a base64 signature over the raw payload
/// bytes. Both self-ident blobs and client authorizations travel in this
/// shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedBlob {
    pub payload: String,
    pub signer: String,
    pub signature: String,
}

impl SignedBlob {
    /// Serializes `payload` and signs it with `key`.
    pub fn seal<T: Serialize>(payload: &T, key: &SigningKey) -> AppResult<SignedBlob> {
        let payload_bytes = serde_json::to_vec(payload)?;
        let signature = key.sign(&payload_bytes);

        Ok(SignedBlob {
            payload: BASE64.encode(&payload_bytes),
            signer: BASE64.encode(key.verifying_key().as_bytes()),
            signature: BASE64.encode(signature.to_bytes()),
        })
    }

    /// Verifies the envelope against its own embedded signer key and returns
    /// the raw payload bytes together with that key. Rejects, with a typed
    /// error, anything that is not a structurally valid, correctly signed
    /// envelope.
    pub fn open(&self) -> AppResult<(Vec<u8>, VerifyingKey)> {
        let payload_bytes = decode_base64(&self.payload)?;
        let signer = verifying_key_from_b64(&self.signer)?;

        let sig_bytes = decode_base64(&self.signature)?;
        if sig_bytes.len() != 64 {
            return Err(AppError::malformed("signature must be 64 bytes"));
        }
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|_| AppError::malformed("invalid signature encoding"))?;

        signer
            .verify(&payload_bytes, &signature)
            .map_err(|_| AppError::malformed("signature does not verify"))?;

        Ok((payload_bytes, signer))
    }

    /// Verifies the envelope and additionally requires it to be signed by
    /// `expected_signer` (base64 key equality before any cryptography).
    pub fn open_signed_by(&self, expected_signer: &str) -> AppResult<Vec<u8>> {
        if self.signer != expected_signer {
            return Err(AppError::malformed("envelope signed by unexpected key"));
        }
        let (payload_bytes, _) = self.open()?;
        Ok(payload_bytes)
    }
}
