//! Terminal-side collaborators: key and challenge registries
//!
//! [`verify`](crate::verify::verify) is pure and knows nothing about which
//! challenges were issued or which devices are enrolled. [`Terminal`] supplies
//! that state. Each challenge it issues can be redeemed at most once, so a
//! replayed token fails with `CHALLENGE_MISMATCH` even while still fresh.
//! Challenges left unredeemed past their lifetime are forgotten, and a late
//! redemption fails with `TIMESTAMP_EXPIRED`.

use std::collections::HashMap;

use log::{debug, info};

use crate::challenge::ChallengeIssuer;
use crate::clock::TimestampProvider;
use crate::identity::DevicePublicKey;
use crate::token::Token;
use crate::verify::{verify, RejectReason, VerificationResult, VerifyOptions, DEFAULT_MAX_AGE_MS};

/// Enrolled device keys, by device id
pub trait DeviceKeyRegistry {
    fn public_key(&self, device_id: &str) -> Option<DevicePublicKey>;
}

/// Result of redeeming a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// Issued, unexpired and not redeemed before
    Outstanding,
    /// Issued, but its lifetime has passed
    Expired,
    /// Never issued, already redeemed, or long forgotten
    Unknown,
}

/// Outstanding challenges with at-most-once redemption
pub trait ChallengeRegistry {
    /// Remember a challenge issued at `issued_at_ms`
    fn record(&mut self, challenge: &str, issued_at_ms: u64);

    /// Redeem a challenge at `now_ms`; it can never be redeemed again
    fn consume(&mut self, challenge: &str, now_ms: u64) -> Redemption;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyRegistry {
    keys: HashMap<String, DevicePublicKey>,
}

impl InMemoryKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll (or re-enroll) a device key
    pub fn register(&mut self, device_id: &str, key: DevicePublicKey) {
        info!("enrolled {} ({})", device_id, key.fingerprint_hex());
        self.keys.insert(device_id.to_string(), key);
    }

    pub fn revoke(&mut self, device_id: &str) -> Option<DevicePublicKey> {
        self.keys.remove(device_id)
    }
}

impl DeviceKeyRegistry for InMemoryKeyRegistry {
    fn public_key(&self, device_id: &str) -> Option<DevicePublicKey> {
        self.keys.get(device_id).cloned()
    }
}

/// Challenges by issue time, forgotten once older than `ttl_ms`
#[derive(Debug, Clone)]
pub struct InMemoryChallengeRegistry {
    outstanding: HashMap<String, u64>,
    ttl_ms: u64,
}

impl Default for InMemoryChallengeRegistry {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_MAX_AGE_MS)
    }
}

impl InMemoryChallengeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            outstanding: HashMap::new(),
            ttl_ms,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    fn is_expired(&self, issued_at_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(issued_at_ms) > self.ttl_ms
    }

    /// Drop every challenge past its lifetime
    fn prune(&mut self, now_ms: u64) {
        let ttl_ms = self.ttl_ms;
        let before = self.outstanding.len();
        self.outstanding
            .retain(|_, issued| now_ms.saturating_sub(*issued) <= ttl_ms);

        let dropped = before - self.outstanding.len();
        if dropped > 0 {
            debug!("forgot {} expired challenges", dropped);
        }
    }
}

impl ChallengeRegistry for InMemoryChallengeRegistry {
    fn record(&mut self, challenge: &str, issued_at_ms: u64) {
        self.prune(issued_at_ms);
        self.outstanding.insert(challenge.to_string(), issued_at_ms);
    }

    fn consume(&mut self, challenge: &str, now_ms: u64) -> Redemption {
        let redemption = match self.outstanding.remove(challenge) {
            Some(issued) if self.is_expired(issued, now_ms) => Redemption::Expired,
            Some(_) => Redemption::Outstanding,
            None => Redemption::Unknown,
        };
        self.prune(now_ms);
        redemption
    }
}

/// A verifying terminal: issues challenges and redeems tokens against them
pub struct Terminal<I, K, R, C> {
    issuer: I,
    keys: K,
    challenges: R,
    clock: C,
    options: VerifyOptions,
}

impl<I, K, R, C> Terminal<I, K, R, C>
where
    I: ChallengeIssuer,
    K: DeviceKeyRegistry,
    R: ChallengeRegistry,
    C: TimestampProvider,
{
    pub fn new(issuer: I, keys: K, challenges: R, clock: C, options: VerifyOptions) -> Self {
        Self {
            issuer,
            keys,
            challenges,
            clock,
            options,
        }
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut K {
        &mut self.keys
    }

    /// Issue and remember a fresh challenge
    pub fn issue_challenge(&mut self) -> String {
        let challenge = self.issuer.issue();
        self.challenges.record(&challenge, self.clock.now_ms());
        debug!("issued challenge {}", challenge);
        challenge
    }

    /// Redeem `token` for `expected_device_id`.
    ///
    /// The token's challenge is consumed once the device is known to be
    /// enrolled, whatever the outcome of the remaining checks.
    pub fn redeem(&mut self, token: &Token, expected_device_id: &str) -> VerificationResult {
        let key = match self.keys.public_key(expected_device_id) {
            Some(key) => key,
            None => {
                debug!("no enrolled key for {}", expected_device_id);
                return VerificationResult::rejected(RejectReason::DeviceMismatch);
            }
        };

        let now_ms = self.clock.now_ms();
        match self.challenges.consume(token.challenge(), now_ms) {
            Redemption::Outstanding => {}
            Redemption::Expired => {
                debug!("challenge {} expired", token.challenge());
                return VerificationResult::rejected(RejectReason::TimestampExpired);
            }
            Redemption::Unknown => {
                debug!("challenge {} not outstanding", token.challenge());
                return VerificationResult::rejected(RejectReason::ChallengeMismatch);
            }
        }

        verify(
            token,
            token.challenge(),
            expected_device_id,
            &key,
            now_ms,
            &self.options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::derive_identity;

    #[test]
    fn challenges_redeem_once() {
        let mut reg = InMemoryChallengeRegistry::new();
        reg.record("ch_1", 1_000);
        assert_eq!(reg.outstanding(), 1);
        assert_eq!(reg.consume("ch_1", 2_000), Redemption::Outstanding);
        assert_eq!(reg.consume("ch_1", 2_000), Redemption::Unknown);
        assert_eq!(reg.consume("ch_2", 2_000), Redemption::Unknown);
    }

    #[test]
    fn unredeemed_challenges_are_forgotten() {
        let mut reg = InMemoryChallengeRegistry::with_ttl(1_000);
        reg.record("ch_1", 0);
        reg.record("ch_2", 500);
        assert_eq!(reg.outstanding(), 2);

        reg.record("ch_3", 1_200);
        assert_eq!(reg.outstanding(), 2);

        assert_eq!(reg.consume("ch_3", 2_000), Redemption::Outstanding);
        assert_eq!(reg.outstanding(), 0);
    }

    #[test]
    fn late_redemption_is_expired() {
        let mut reg = InMemoryChallengeRegistry::with_ttl(1_000);
        reg.record("ch_1", 0);
        assert_eq!(reg.consume("ch_1", 1_000), Redemption::Outstanding);

        reg.record("ch_2", 0);
        assert_eq!(reg.consume("ch_2", 1_001), Redemption::Expired);
        assert_eq!(reg.consume("ch_2", 1_001), Redemption::Unknown);
        assert_eq!(reg.outstanding(), 0);
    }

    #[test]
    fn key_registry_enroll_and_revoke() {
        let id = derive_identity("dev-abc123").unwrap();
        let mut reg = InMemoryKeyRegistry::new();
        assert!(reg.public_key("dev-abc123").is_none());

        reg.register("dev-abc123", id.public_key().clone());
        assert_eq!(reg.public_key("dev-abc123").as_ref(), Some(id.public_key()));

        assert!(reg.revoke("dev-abc123").is_some());
        assert!(reg.public_key("dev-abc123").is_none());
    }
}
