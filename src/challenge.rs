//! Challenge binding and issuance
//!
//! The challenge must come from the verifier. A device that binds an empty
//! or self-generated value gives up the relay/replay defense, so binding
//! refuses empty input and the device never mints challenges itself.
//!
//! [`RandomChallengeIssuer`] is the terminal-side producer: it draws from
//! an OS-backed CSPRNG, so values are unpredictable and, in practice,
//! never repeat.

use log::debug;
use rand_core::{CryptoRng, OsRng, RngCore};

use crate::clock::TimestampProvider;
use crate::error::ProtocolError;

/// Random bytes per challenge
const CHALLENGE_ENTROPY_BYTES: usize = 16;

/// A verifier-issued challenge, accepted by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeBinding {
    value: String,
    bound: bool,
}

impl ChallengeBinding {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }
}

/// Bind an externally issued challenge
pub fn bind_challenge(value: &str) -> Result<ChallengeBinding, ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::EmptyChallenge);
    }

    debug!("bound challenge {}", value);
    Ok(ChallengeBinding {
        value: value.to_string(),
        bound: true,
    })
}

/// Produces challenge strings for devices to bind
pub trait ChallengeIssuer {
    fn issue(&mut self) -> String;
}

/// Issues `ch_<unix seconds>_<hex randomness>` challenges
pub struct RandomChallengeIssuer<R, C> {
    rng: R,
    clock: C,
}

impl<C: TimestampProvider> RandomChallengeIssuer<OsRng, C> {
    /// Issuer backed by the operating system RNG
    pub fn new(clock: C) -> Self {
        Self { rng: OsRng, clock }
    }
}

impl<R, C> RandomChallengeIssuer<R, C>
where
    R: RngCore + CryptoRng,
    C: TimestampProvider,
{
    pub fn with_rng(rng: R, clock: C) -> Self {
        Self { rng, clock }
    }
}

impl<R, C> ChallengeIssuer for RandomChallengeIssuer<R, C>
where
    R: RngCore + CryptoRng,
    C: TimestampProvider,
{
    fn issue(&mut self) -> String {
        let mut nonce = [0u8; CHALLENGE_ENTROPY_BYTES];
        self.rng.fill_bytes(&mut nonce);
        let secs = self.clock.now_ms() / 1000;
        format!("ch_{}_{}", secs, hex::encode(nonce))
    }
}
