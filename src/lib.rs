//! Device-bound transaction intent attestation
//!
//! A device approves a transaction intent and proves it to a terminal:
//! 1. Derives a P-256 keypair bound to its device id
//! 2. Hashes the intent text and, once the user confirms, signs the hash
//! 3. Binds a challenge issued by the terminal
//! 4. Assembles a token over id, intent hash, challenge, timestamp,
//!    attestation and key fingerprint, and signs its canonical digest
//!
//! The terminal checks the token with [`verify::verify`], or through a
//! [`terminal::Terminal`] that also tracks issued challenges and enrolled
//! keys.
//!
//! ```
//! use intent_attest::{verify, FixedClock, TokenSession, VerifyOptions};
//!
//! let mut session = TokenSession::new();
//! session.identify("dev-abc123")?;
//! session.record_intent("Transfer $50 to Merchant XYZ")?;
//! session.confirm_intent()?;
//! session.attest()?;
//! session.bind_challenge("ch_1700000000_xyz")?;
//! let token = session.generate_token(&FixedClock(1_700_000_000_000))?;
//!
//! let key = intent_attest::derive_identity("dev-abc123")?.public_key().clone();
//! let result = verify(
//!     &token,
//!     "ch_1700000000_xyz",
//!     "dev-abc123",
//!     &key,
//!     1_700_000_060_000,
//!     &VerifyOptions::default(),
//! );
//! assert!(result.is_valid());
//! # Ok::<(), intent_attest::ProtocolError>(())
//! ```

pub mod challenge;
pub mod clock;
pub mod error;
pub mod identity;
pub mod intent;
pub mod session;
pub mod terminal;
pub mod token;
pub mod verify;

use sha2::{Digest, Sha256};

pub use challenge::{bind_challenge, ChallengeBinding, ChallengeIssuer, RandomChallengeIssuer};
pub use clock::{FixedClock, SystemClock, TimestampProvider};
pub use error::ProtocolError;
pub use identity::{derive_identity, DeviceIdentity, DevicePublicKey};
pub use intent::{
    attest, confirm_intent, record_intent, Attestation, FixedGate, IntentRecord,
    UserConfirmationGate,
};
pub use session::{SessionState, TokenSession};
pub use terminal::{
    ChallengeRegistry, DeviceKeyRegistry, InMemoryChallengeRegistry, InMemoryKeyRegistry,
    Redemption, Terminal,
};
pub use token::{assemble_token, Token};
pub use verify::{verify, RejectReason, VerificationResult, VerifyOptions};

/// SHA-256, the digest used for seeds, intents, fingerprints and payloads
pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
