//! Device identity and key material
//!
//! A device's P-256 signing key is derived deterministically from its
//! identifier:
//! - seed = SHA-256(device_id)
//! - the seed is imported as the secret scalar, then zeroized
//! - the public key is exported as uncompressed SEC1 and fingerprinted
//!
//! The private key never leaves [`DeviceIdentity`]; it is not serializable
//! and is zeroized when the identity is dropped.

use log::debug;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ProtocolError;
use crate::sha256;

/// Wrapper for the signing key that guarantees zeroization
#[derive(ZeroizeOnDrop)]
struct DeviceSigningKey {
    #[zeroize(skip)] // p256 SigningKey zeroizes its scalar on drop
    inner: SigningKey,
}

impl DeviceSigningKey {
    fn from_seed(seed: &[u8; 32]) -> Result<Self, ProtocolError> {
        let inner = SigningKey::from_slice(seed)
            .map_err(|_| ProtocolError::KeyDerivation("seed is not a valid P-256 scalar".into()))?;
        Ok(Self { inner })
    }

    fn verifying_key(&self) -> VerifyingKey {
        self.inner.verifying_key().clone()
    }

    /// Sign, always emitting the low-S form
    fn sign(&self, message: &[u8]) -> Signature {
        let signature: Signature = self.inner.sign(message);
        signature.normalize_s().unwrap_or(signature)
    }
}

/// Public half of a device key, as held by verifiers and key registries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePublicKey(VerifyingKey);

impl DevicePublicKey {
    /// Import from SEC1 bytes (compressed or uncompressed)
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidPublicKey("not a valid SEC1 P-256 point".into()))
    }

    /// Import from hex-encoded SEC1 bytes
    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(s).map_err(|e| ProtocolError::InvalidPublicKey(e.to_string()))?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Export as uncompressed SEC1 (65 bytes, leading 0x04)
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_sec1_bytes())
    }

    /// SHA-256 over the exported key bytes
    pub fn fingerprint(&self) -> [u8; 32] {
        sha256(&self.to_sec1_bytes())
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint())
    }

    /// Check a raw `r || s` signature over `message`.
    ///
    /// Only low-S signatures are accepted, so each message has a single
    /// valid encoding. Malformed signature bytes verify as false.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) if sig.normalize_s().is_none() => self.0.verify(message, &sig).is_ok(),
            _ => false,
        }
    }
}

/// A device's identity: id, bound private key, public key fingerprint
pub struct DeviceIdentity {
    device_id: String,
    signing_key: DeviceSigningKey,
    public_key: DevicePublicKey,
    fingerprint: [u8; 32],
}

/// Derive the identity bound to `device_id`.
///
/// The same identifier always yields the same keypair and fingerprint.
pub fn derive_identity(device_id: &str) -> Result<DeviceIdentity, ProtocolError> {
    if device_id.is_empty() {
        return Err(ProtocolError::EmptyDeviceId);
    }

    let mut seed = sha256(device_id.as_bytes());
    let key = DeviceSigningKey::from_seed(&seed);
    seed.zeroize();
    let signing_key = key?;

    let public_key = DevicePublicKey(signing_key.verifying_key());
    let fingerprint = public_key.fingerprint();

    debug!(
        "derived identity for {}: fingerprint {}",
        device_id,
        hex::encode(fingerprint)
    );

    Ok(DeviceIdentity {
        device_id: device_id.to_string(),
        signing_key,
        public_key,
        fingerprint,
    })
}

impl DeviceIdentity {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn public_key(&self) -> &DevicePublicKey {
        &self.public_key
    }

    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }

    /// Sign with the device key, returning the raw 64-byte `r || s` form
    pub(crate) fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature = self.signing_key.sign(message);
        let mut out = [0u8; 64];
        out.copy_from_slice(&signature.to_bytes());
        out
    }
}

impl core::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("fingerprint", &self.fingerprint_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_identity("dev-abc123").unwrap();
        let b = derive_identity("dev-abc123").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn distinct_devices_get_distinct_keys() {
        let a = derive_identity("dev-abc123").unwrap();
        let b = derive_identity("dev-abc124").unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn empty_device_id_is_rejected() {
        assert!(matches!(derive_identity(""), Err(ProtocolError::EmptyDeviceId)));
        // Opaque identifiers: only the empty string is refused
        assert!(derive_identity("  ").is_ok());
    }

    #[test]
    fn fingerprint_covers_uncompressed_key() {
        let id = derive_identity("dev-abc123").unwrap();
        let exported = id.public_key().to_sec1_bytes();
        assert_eq!(exported.len(), 65);
        assert_eq!(exported[0], 0x04);
        assert_eq!(*id.fingerprint(), sha256(&exported));
    }

    #[test]
    fn public_key_hex_round_trips() {
        let id = derive_identity("dev-abc123").unwrap();
        let imported = DevicePublicKey::from_hex(&id.public_key().to_hex()).unwrap();
        assert_eq!(&imported, id.public_key());
        assert!(DevicePublicKey::from_hex("04zz").is_err());
    }

    #[test]
    fn signatures_verify_under_public_key() {
        let id = derive_identity("dev-abc123").unwrap();
        let sig = id.sign(b"payload");
        assert!(id.public_key().verify(b"payload", &sig));
        assert!(!id.public_key().verify(b"payloae", &sig));
        assert!(!id.public_key().verify(b"payload", &sig[..63]));
    }

    #[test]
    fn high_s_twin_is_rejected() {
        let id = derive_identity("dev-abc123").unwrap();
        let sig = Signature::from_slice(&id.sign(b"payload")).unwrap();
        assert!(sig.normalize_s().is_none());

        let (r, s) = sig.split_scalars();
        let twin = Signature::from_scalars(r, -s).unwrap();
        assert!(twin.normalize_s().is_some());
        assert!(!id.public_key().verify(b"payload", &twin.to_bytes()));
    }

    #[test]
    fn debug_output_omits_private_key() {
        let id = derive_identity("dev-abc123").unwrap();
        let shown = format!("{:?}", id);
        assert!(shown.contains("dev-abc123"));
        assert!(!shown.contains("signing_key"));
    }
}
