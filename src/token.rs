//! Token assembly and the canonical signed payload
//!
//! # Wire contract
//!
//! The token travels as a JSON object with exactly seven fields:
//! `deviceId`, `intentHash`, `challenge`, `timestamp`, `teeSignature`,
//! `seKeyHash`, `finalSignature`. Byte fields are lowercase hex and
//! `timestamp` is an integer count of milliseconds since the Unix epoch.
//!
//! `finalSignature` covers the SHA-256 digest of the canonical payload: the
//! postcard encoding of
//!
//! ```text
//! (version: u8, deviceId, intentHash, challenge, timestamp: u64,
//!  teeSignature, seKeyHash)
//! ```
//!
//! in exactly that order, where strings are varint-length-prefixed UTF-8 of
//! the same text that appears in the JSON. Producer and verifier must agree
//! on these bytes; any change here is a protocol version bump.

use log::info;
use serde::{Deserialize, Serialize};

use crate::challenge::ChallengeBinding;
use crate::clock::TimestampProvider;
use crate::error::ProtocolError;
use crate::identity::DeviceIdentity;
use crate::intent::{Attestation, IntentRecord};
use crate::sha256;

/// Canonical payload format version
pub const PAYLOAD_VERSION: u8 = 1;

/// The bytes that get hashed and signed
#[derive(Serialize)]
struct CanonicalPayload<'a> {
    version: u8,
    device_id: &'a str,
    intent_hash: &'a str,
    challenge: &'a str,
    timestamp: u64,
    tee_signature: &'a str,
    se_key_hash: &'a str,
}

/// A signed, challenge-bound transaction token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Token {
    device_id: String,
    intent_hash: String,
    challenge: String,
    timestamp: u64,
    tee_signature: String,
    se_key_hash: String,
    final_signature: String,
}

impl Token {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn intent_hash(&self) -> &str {
        &self.intent_hash
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn tee_signature(&self) -> &str {
        &self.tee_signature
    }

    pub fn se_key_hash(&self) -> &str {
        &self.se_key_hash
    }

    pub fn final_signature(&self) -> &str {
        &self.final_signature
    }

    /// Serialize the signed fields in canonical order
    pub fn canonical_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = CanonicalPayload {
            version: PAYLOAD_VERSION,
            device_id: &self.device_id,
            intent_hash: &self.intent_hash,
            challenge: &self.challenge,
            timestamp: self.timestamp,
            tee_signature: &self.tee_signature,
            se_key_hash: &self.se_key_hash,
        };
        Ok(postcard::to_allocvec(&payload)?)
    }

    /// SHA-256 of the canonical payload, the input to `finalSignature`
    pub fn payload_digest(&self) -> Result<[u8; 32], ProtocolError> {
        Ok(sha256(&self.canonical_payload()?))
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Combine the device's artifacts into a signed token.
///
/// Reads the clock once; otherwise side-effect free.
pub fn assemble_token<C>(
    identity: &DeviceIdentity,
    record: &IntentRecord,
    attestation: &Attestation,
    binding: &ChallengeBinding,
    clock: &C,
) -> Result<Token, ProtocolError>
where
    C: TimestampProvider + ?Sized,
{
    if !record.is_confirmed() {
        return Err(ProtocolError::NotConfirmed);
    }
    if !binding.is_bound() {
        return Err(ProtocolError::ChallengeNotBound);
    }

    let mut token = Token {
        device_id: identity.device_id().to_string(),
        intent_hash: record.hash_hex(),
        challenge: binding.value().to_string(),
        timestamp: clock.now_ms(),
        tee_signature: attestation.signature_hex(),
        se_key_hash: identity.fingerprint_hex(),
        final_signature: String::new(),
    };

    let digest = token.payload_digest()?;
    token.final_signature = hex::encode(identity.sign(&digest));

    info!(
        "assembled token for {} at {} (challenge {})",
        token.device_id, token.timestamp, token.challenge
    );

    Ok(token)
}
