//! Device-side protocol errors
//!
//! Every failure here is local and recoverable: the caller fixes the
//! precondition and re-invokes the step. Verification rejections are not
//! errors, see [`crate::verify::VerificationResult`].

use thiserror::Error;

use crate::session::SessionState;

/// Errors raised while building a token on the device
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("device identifier is empty")]
    EmptyDeviceId,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("intent text is empty")]
    EmptyIntent,

    #[error("intent has not been confirmed by the user")]
    NotConfirmed,

    #[error("challenge value is empty")]
    EmptyChallenge,

    #[error("no challenge has been bound")]
    ChallengeNotBound,

    #[error("{operation} is not allowed in state {state:?}")]
    OutOfOrder {
        operation: &'static str,
        state: SessionState,
    },

    #[error("canonical payload encoding failed: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("malformed token: {0}")]
    MalformedToken(#[from] serde_json::Error),
}
