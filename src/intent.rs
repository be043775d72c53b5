//! Intent recording and attestation
//!
//! A transaction intent is hashed as soon as it is recorded, but its hash
//! may only be signed after an explicit user confirmation. The confirmation
//! itself (biometric prompt, button, terminal prompt) lives behind
//! [`UserConfirmationGate`]; this module only observes its answer.

use log::{debug, info};

use crate::error::ProtocolError;
use crate::identity::DeviceIdentity;
use crate::sha256;

/// A human-readable transaction intent and its digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRecord {
    text: String,
    hash: [u8; 32],
    confirmed: bool,
}

impl IntentRecord {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }
}

/// Record an unconfirmed intent, hashing its UTF-8 text
pub fn record_intent(text: &str) -> Result<IntentRecord, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyIntent);
    }

    Ok(IntentRecord {
        text: text.to_string(),
        hash: sha256(text.as_bytes()),
        confirmed: false,
    })
}

/// Mark an intent as approved by the user.
///
/// This is the only way `confirmed` becomes true.
pub fn confirm_intent(record: IntentRecord) -> IntentRecord {
    debug!("intent {} confirmed", record.hash_hex());
    IntentRecord {
        confirmed: true,
        ..record
    }
}

/// The device's signature over a confirmed intent hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    signature: [u8; 64],
}

impl Attestation {
    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }

    pub fn signature_hex(&self) -> String {
        hex::encode(self.signature)
    }
}

/// Sign the intent hash with the device key
pub fn attest(identity: &DeviceIdentity, record: &IntentRecord) -> Result<Attestation, ProtocolError> {
    if !record.confirmed {
        return Err(ProtocolError::NotConfirmed);
    }

    let signature = identity.sign(&record.hash);
    info!(
        "attested intent {} for {}",
        record.hash_hex(),
        identity.device_id()
    );

    Ok(Attestation { signature })
}

/// Source of the user's approval for an intent
pub trait UserConfirmationGate {
    /// Ask the user to approve `intent`, returning their answer
    fn confirm(&mut self, intent: &IntentRecord) -> bool;
}

/// A gate with a preset answer (automation, tests)
#[derive(Debug, Clone, Copy)]
pub struct FixedGate(pub bool);

impl UserConfirmationGate for FixedGate {
    fn confirm(&mut self, _intent: &IntentRecord) -> bool {
        self.0
    }
}

impl<F> UserConfirmationGate for F
where
    F: FnMut(&IntentRecord) -> bool,
{
    fn confirm(&mut self, intent: &IntentRecord) -> bool {
        self(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::derive_identity;

    #[test]
    fn record_hashes_text() {
        let record = record_intent("Transfer $50 to Merchant XYZ").unwrap();
        assert_eq!(*record.hash(), sha256(b"Transfer $50 to Merchant XYZ"));
        assert_eq!(record.hash_hex().len(), 64);
        assert!(!record.is_confirmed());
    }

    #[test]
    fn empty_intent_is_rejected() {
        assert!(matches!(record_intent(""), Err(ProtocolError::EmptyIntent)));
        assert!(record_intent(" \n").is_ok());
    }

    #[test]
    fn attest_requires_confirmation() {
        let id = derive_identity("dev-abc123").unwrap();
        let record = record_intent("Transfer $50 to Merchant XYZ").unwrap();
        assert!(matches!(attest(&id, &record), Err(ProtocolError::NotConfirmed)));

        let record = confirm_intent(record);
        let attestation = attest(&id, &record).unwrap();
        assert!(id.public_key().verify(record.hash(), attestation.signature()));
    }

    #[test]
    fn confirmation_keeps_text_and_hash() {
        let record = record_intent("pay rent").unwrap();
        let confirmed = confirm_intent(record.clone());
        assert_eq!(confirmed.text(), record.text());
        assert_eq!(confirmed.hash(), record.hash());
        assert!(confirmed.is_confirmed());
    }

    #[test]
    fn closures_act_as_gates() {
        let record = record_intent("pay rent").unwrap();
        let mut asked = 0;
        let mut gate = |intent: &IntentRecord| {
            asked += 1;
            intent.text() == "pay rent"
        };
        assert!(gate.confirm(&record));
        assert!(!FixedGate(false).confirm(&record));
        assert_eq!(asked, 1);
    }
}
