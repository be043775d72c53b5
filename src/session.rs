//! Device-side token generation session
//!
//! One [`TokenSession`] drives one token-generation cycle through a strictly
//! linear sequence of states:
//!
//! ```text
//! Unidentified -> Identified -> IntentRecorded -> IntentConfirmed
//!              -> Attested -> ChallengeBound -> TokenGenerated
//! ```
//!
//! Each step requires the previous one. A rejected step leaves the session
//! where it was, so the caller can fix the input and call again. The only
//! repeatable step is recording the intent, which may be replaced until it
//! is confirmed.

use std::mem;

use log::{debug, info};

use crate::challenge::{self, ChallengeBinding};
use crate::clock::TimestampProvider;
use crate::error::ProtocolError;
use crate::identity::{self, DeviceIdentity};
use crate::intent::{self, Attestation, IntentRecord, UserConfirmationGate};
use crate::token::{self, Token};

/// Observable position of a session in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Unidentified,
    Identified,
    IntentRecorded,
    IntentConfirmed,
    Attested,
    ChallengeBound,
    TokenGenerated,
}

#[derive(Default)]
enum Stage {
    #[default]
    Unidentified,
    Identified {
        identity: DeviceIdentity,
    },
    IntentRecorded {
        identity: DeviceIdentity,
        record: IntentRecord,
    },
    IntentConfirmed {
        identity: DeviceIdentity,
        record: IntentRecord,
    },
    Attested {
        identity: DeviceIdentity,
        record: IntentRecord,
        attestation: Attestation,
    },
    ChallengeBound {
        identity: DeviceIdentity,
        record: IntentRecord,
        attestation: Attestation,
        binding: ChallengeBinding,
    },
    TokenGenerated {
        token: Token,
    },
}

impl Stage {
    fn state(&self) -> SessionState {
        match self {
            Stage::Unidentified => SessionState::Unidentified,
            Stage::Identified { .. } => SessionState::Identified,
            Stage::IntentRecorded { .. } => SessionState::IntentRecorded,
            Stage::IntentConfirmed { .. } => SessionState::IntentConfirmed,
            Stage::Attested { .. } => SessionState::Attested,
            Stage::ChallengeBound { .. } => SessionState::ChallengeBound,
            Stage::TokenGenerated { .. } => SessionState::TokenGenerated,
        }
    }
}

/// Outcome of a transition: the next stage, or the unchanged stage and why
type Transition = Result<Stage, (Stage, ProtocolError)>;

fn out_of_order(operation: &'static str, stage: Stage) -> Transition {
    let state = stage.state();
    Err((stage, ProtocolError::OutOfOrder { operation, state }))
}

/// A single token-generation cycle
#[derive(Default)]
pub struct TokenSession {
    stage: Stage,
}

impl TokenSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.stage.state()
    }

    /// The device identity, once derived and until the token is generated
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        match &self.stage {
            Stage::Unidentified | Stage::TokenGenerated { .. } => None,
            Stage::Identified { identity }
            | Stage::IntentRecorded { identity, .. }
            | Stage::IntentConfirmed { identity, .. }
            | Stage::Attested { identity, .. }
            | Stage::ChallengeBound { identity, .. } => Some(identity),
        }
    }

    /// The current intent, once recorded
    pub fn intent(&self) -> Option<&IntentRecord> {
        match &self.stage {
            Stage::IntentRecorded { record, .. }
            | Stage::IntentConfirmed { record, .. }
            | Stage::Attested { record, .. }
            | Stage::ChallengeBound { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&Token> {
        match &self.stage {
            Stage::TokenGenerated { token } => Some(token),
            _ => None,
        }
    }

    pub fn into_token(self) -> Option<Token> {
        match self.stage {
            Stage::TokenGenerated { token } => Some(token),
            _ => None,
        }
    }

    fn advance<F>(&mut self, f: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(Stage) -> Transition,
    {
        let from = self.stage.state();
        match f(mem::take(&mut self.stage)) {
            Ok(next) => {
                debug!("session {:?} -> {:?}", from, next.state());
                self.stage = next;
                Ok(())
            }
            Err((prev, err)) => {
                self.stage = prev;
                Err(err)
            }
        }
    }

    /// Derive the device identity
    pub fn identify(&mut self, device_id: &str) -> Result<(), ProtocolError> {
        self.advance(|stage| match stage {
            Stage::Unidentified => match identity::derive_identity(device_id) {
                Ok(identity) => Ok(Stage::Identified { identity }),
                Err(e) => Err((Stage::Unidentified, e)),
            },
            other => out_of_order("identify", other),
        })
    }

    /// Record the intent text, replacing any unconfirmed intent
    pub fn record_intent(&mut self, text: &str) -> Result<(), ProtocolError> {
        if !matches!(
            self.stage,
            Stage::Identified { .. } | Stage::IntentRecorded { .. }
        ) {
            return Err(ProtocolError::OutOfOrder {
                operation: "record_intent",
                state: self.state(),
            });
        }

        let record = intent::record_intent(text)?;
        self.advance(|stage| match stage {
            Stage::Identified { identity } | Stage::IntentRecorded { identity, .. } => {
                Ok(Stage::IntentRecorded { identity, record })
            }
            other => out_of_order("record_intent", other),
        })
    }

    /// Mark the recorded intent as approved.
    ///
    /// Callers invoke this after their own confirmation gate has passed; see
    /// [`TokenSession::confirm_with`] to have the session ask the gate.
    pub fn confirm_intent(&mut self) -> Result<(), ProtocolError> {
        self.advance(|stage| match stage {
            Stage::IntentRecorded { identity, record } => Ok(Stage::IntentConfirmed {
                identity,
                record: intent::confirm_intent(record),
            }),
            other => out_of_order("confirm_intent", other),
        })
    }

    /// Ask `gate` to approve the recorded intent, confirming it on approval.
    ///
    /// A declined prompt leaves the intent recorded but unconfirmed.
    pub fn confirm_with<G>(&mut self, gate: &mut G) -> Result<bool, ProtocolError>
    where
        G: UserConfirmationGate + ?Sized,
    {
        let approved = match &self.stage {
            Stage::IntentRecorded { record, .. } => gate.confirm(record),
            other => {
                return Err(ProtocolError::OutOfOrder {
                    operation: "confirm_intent",
                    state: other.state(),
                })
            }
        };

        if approved {
            self.confirm_intent()?;
        } else {
            info!("user declined intent");
        }
        Ok(approved)
    }

    /// Sign the confirmed intent hash
    pub fn attest(&mut self) -> Result<(), ProtocolError> {
        self.advance(|stage| match stage {
            Stage::IntentConfirmed { identity, record } => {
                match intent::attest(&identity, &record) {
                    Ok(attestation) => Ok(Stage::Attested {
                        identity,
                        record,
                        attestation,
                    }),
                    Err(e) => Err((Stage::IntentConfirmed { identity, record }, e)),
                }
            }
            unconfirmed @ Stage::IntentRecorded { .. } => {
                Err((unconfirmed, ProtocolError::NotConfirmed))
            }
            other => out_of_order("attest", other),
        })
    }

    /// Bind the terminal-issued challenge
    pub fn bind_challenge(&mut self, value: &str) -> Result<(), ProtocolError> {
        self.advance(|stage| match stage {
            Stage::Attested {
                identity,
                record,
                attestation,
            } => match challenge::bind_challenge(value) {
                Ok(binding) => Ok(Stage::ChallengeBound {
                    identity,
                    record,
                    attestation,
                    binding,
                }),
                Err(e) => Err((
                    Stage::Attested {
                        identity,
                        record,
                        attestation,
                    },
                    e,
                )),
            },
            other => out_of_order("bind_challenge", other),
        })
    }

    /// Assemble and sign the token, reading `clock` once
    pub fn generate_token<C>(&mut self, clock: &C) -> Result<Token, ProtocolError>
    where
        C: TimestampProvider + ?Sized,
    {
        let mut generated = None;
        self.advance(|stage| match stage {
            Stage::ChallengeBound {
                identity,
                record,
                attestation,
                binding,
            } => match token::assemble_token(&identity, &record, &attestation, &binding, clock) {
                Ok(token) => {
                    generated = Some(token.clone());
                    Ok(Stage::TokenGenerated { token })
                }
                Err(e) => Err((
                    Stage::ChallengeBound {
                        identity,
                        record,
                        attestation,
                        binding,
                    },
                    e,
                )),
            },
            attested @ Stage::Attested { .. } => Err((attested, ProtocolError::ChallengeNotBound)),
            other => out_of_order("generate_token", other),
        })?;

        generated.ok_or_else(|| ProtocolError::OutOfOrder {
            operation: "generate_token",
            state: self.state(),
        })
    }
}

impl core::fmt::Debug for TokenSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenSession")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::intent::FixedGate;

    fn attested() -> TokenSession {
        let mut s = TokenSession::new();
        s.identify("dev-abc123").unwrap();
        s.record_intent("Transfer $50 to Merchant XYZ").unwrap();
        s.confirm_intent().unwrap();
        s.attest().unwrap();
        s
    }

    #[test]
    fn full_cycle_reaches_token_generated() {
        let mut s = attested();
        s.bind_challenge("ch_1700000000_xyz").unwrap();
        let token = s.generate_token(&FixedClock(1_700_000_000_000)).unwrap();
        assert_eq!(s.state(), SessionState::TokenGenerated);
        assert_eq!(s.token(), Some(&token));
        assert!(s.identity().is_none());
        assert_eq!(s.into_token(), Some(token));
    }

    #[test]
    fn attest_before_confirm_fails_and_keeps_state() {
        let mut s = TokenSession::new();
        s.identify("dev-abc123").unwrap();
        s.record_intent("pay").unwrap();
        assert!(matches!(s.attest(), Err(ProtocolError::NotConfirmed)));
        assert_eq!(s.state(), SessionState::IntentRecorded);

        s.confirm_intent().unwrap();
        s.attest().unwrap();
        assert_eq!(s.state(), SessionState::Attested);
    }

    #[test]
    fn token_before_bind_fails() {
        let mut s = attested();
        assert!(matches!(
            s.generate_token(&FixedClock(0)),
            Err(ProtocolError::ChallengeNotBound)
        ));
        assert_eq!(s.state(), SessionState::Attested);
    }

    #[test]
    fn empty_challenge_blocks_token() {
        let mut s = attested();
        assert!(matches!(s.bind_challenge(""), Err(ProtocolError::EmptyChallenge)));
        assert_eq!(s.state(), SessionState::Attested);
        assert!(s.generate_token(&FixedClock(0)).is_err());
        assert!(s.token().is_none());
    }

    #[test]
    fn steps_cannot_be_skipped() {
        let mut s = TokenSession::new();
        assert!(matches!(
            s.record_intent("pay"),
            Err(ProtocolError::OutOfOrder {
                state: SessionState::Unidentified,
                ..
            })
        ));
        s.identify("dev-abc123").unwrap();
        assert!(matches!(s.identify("dev-abc123"), Err(ProtocolError::OutOfOrder { .. })));
        assert!(matches!(s.bind_challenge("ch_1"), Err(ProtocolError::OutOfOrder { .. })));
        assert!(matches!(s.confirm_intent(), Err(ProtocolError::OutOfOrder { .. })));
        assert_eq!(s.state(), SessionState::Identified);
    }

    #[test]
    fn intent_can_be_replaced_until_confirmed() {
        let mut s = TokenSession::new();
        s.identify("dev-abc123").unwrap();
        s.record_intent("pay 10").unwrap();
        s.record_intent("pay 20").unwrap();
        assert_eq!(s.intent().map(IntentRecord::text), Some("pay 20"));

        assert!(matches!(s.record_intent(""), Err(ProtocolError::EmptyIntent)));
        assert_eq!(s.intent().map(IntentRecord::text), Some("pay 20"));

        s.confirm_intent().unwrap();
        assert!(matches!(s.record_intent("pay 30"), Err(ProtocolError::OutOfOrder { .. })));
        assert_eq!(s.intent().map(IntentRecord::text), Some("pay 20"));
    }

    #[test]
    fn failed_identify_can_be_retried() {
        let mut s = TokenSession::new();
        assert!(matches!(s.identify(""), Err(ProtocolError::EmptyDeviceId)));
        assert_eq!(s.state(), SessionState::Unidentified);
        s.identify("dev-abc123").unwrap();
        assert_eq!(s.identity().map(DeviceIdentity::device_id), Some("dev-abc123"));
    }

    #[test]
    fn gate_decides_confirmation() {
        let mut s = TokenSession::new();
        s.identify("dev-abc123").unwrap();
        s.record_intent("pay").unwrap();

        assert!(!s.confirm_with(&mut FixedGate(false)).unwrap());
        assert_eq!(s.state(), SessionState::IntentRecorded);

        assert!(s.confirm_with(&mut FixedGate(true)).unwrap());
        assert_eq!(s.state(), SessionState::IntentConfirmed);
        assert!(s.confirm_with(&mut FixedGate(true)).is_err());
    }
}
