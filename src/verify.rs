//! Terminal-side token verification
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. device id matches the expected device
//! 2. challenge matches the one the terminal issued
//! 3. timestamp is within the freshness window
//! 4. `finalSignature` verifies over the canonical payload digest
//! 5. `teeSignature` verifies over the intent hash
//!
//! Rejection is an ordinary outcome, reported as a [`VerificationResult`]
//! with a specific [`RejectReason`], never as an error.

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::identity::DevicePublicKey;
use crate::token::Token;

/// Maximum token age accepted by default (5 minutes)
pub const DEFAULT_MAX_AGE_MS: u64 = 5 * 60 * 1000;

/// Future-dated tokens are rejected outright by default
pub const DEFAULT_FUTURE_SKEW_MS: u64 = 0;

/// Freshness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    /// Oldest acceptable token, in milliseconds before `now`
    pub max_age_ms: u64,
    /// How far past `now` a producer's clock may run
    pub future_skew_ms: u64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            max_age_ms: DEFAULT_MAX_AGE_MS,
            future_skew_ms: DEFAULT_FUTURE_SKEW_MS,
        }
    }
}

/// Why a token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    SignatureInvalid,
    ChallengeMismatch,
    TimestampExpired,
    DeviceMismatch,
    AttestationInvalid,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::SignatureInvalid => "SIGNATURE_INVALID",
            RejectReason::ChallengeMismatch => "CHALLENGE_MISMATCH",
            RejectReason::TimestampExpired => "TIMESTAMP_EXPIRED",
            RejectReason::DeviceMismatch => "DEVICE_MISMATCH",
            RejectReason::AttestationInvalid => "ATTESTATION_INVALID",
        }
    }

    /// Expiry can happen to honest tokens; everything else points at
    /// tampering, relay or misrouting.
    pub fn is_benign(&self) -> bool {
        matches!(self, RejectReason::TimestampExpired)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a verification call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl VerificationResult {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Verify `token` against the terminal's expectations.
///
/// Pure: depends only on its arguments.
pub fn verify(
    token: &Token,
    expected_challenge: &str,
    expected_device_id: &str,
    registered_key: &DevicePublicKey,
    now_ms: u64,
    options: &VerifyOptions,
) -> VerificationResult {
    let result = match check(
        token,
        expected_challenge,
        expected_device_id,
        registered_key,
        now_ms,
        options,
    ) {
        Ok(()) => VerificationResult::accepted(),
        Err(reason) => VerificationResult::rejected(reason),
    };

    match result.reason {
        None => debug!("token from {} accepted", token.device_id()),
        Some(reason) => warn!("token from {} rejected: {}", token.device_id(), reason),
    }

    result
}

fn check(
    token: &Token,
    expected_challenge: &str,
    expected_device_id: &str,
    key: &DevicePublicKey,
    now_ms: u64,
    options: &VerifyOptions,
) -> Result<(), RejectReason> {
    if token.device_id() != expected_device_id {
        return Err(RejectReason::DeviceMismatch);
    }

    if token.challenge() != expected_challenge {
        return Err(RejectReason::ChallengeMismatch);
    }

    if !is_fresh(token.timestamp(), now_ms, options) {
        return Err(RejectReason::TimestampExpired);
    }

    let digest = token
        .payload_digest()
        .map_err(|_| RejectReason::SignatureInvalid)?;
    let final_signature =
        hex::decode(token.final_signature()).map_err(|_| RejectReason::SignatureInvalid)?;
    if !key.verify(&digest, &final_signature) {
        return Err(RejectReason::SignatureInvalid);
    }

    let intent_hash =
        hex::decode(token.intent_hash()).map_err(|_| RejectReason::AttestationInvalid)?;
    let tee_signature =
        hex::decode(token.tee_signature()).map_err(|_| RejectReason::AttestationInvalid)?;
    if !key.verify(&intent_hash, &tee_signature) {
        return Err(RejectReason::AttestationInvalid);
    }

    Ok(())
}

fn is_fresh(timestamp: u64, now_ms: u64, options: &VerifyOptions) -> bool {
    if timestamp > now_ms {
        timestamp - now_ms <= options.future_skew_ms
    } else {
        now_ms - timestamp <= options.max_age_ms
    }
}
