//! Signing identities.
//!
//! The bridge holds exactly one key and uses it to sign every submission.
//! Nothing here is a general-purpose wallet.

use libsecp256k1::{Message, PublicKey, SecretKey};
use sha3::{Digest, Keccak256};

use crate::errors::SigningError;

/// Something that owns an account on the network and can sign for it.
pub trait SigningIdentity: Send + Sync {
    /// `0x`-prefixed account address.
    fn address(&self) -> &str;

    /// Sign an arbitrary message. Returns `r || s || v`.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// A secp256k1 key held in process memory.
pub struct LocalKey {
    secret: SecretKey,
    address: String,
}

impl LocalKey {
    /// Parse a hex private key, with or without a `0x` prefix.
    pub fn from_hex(raw: &str) -> Result<Self, SigningError> {
        let trimmed = raw.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes =
            hex::decode(stripped).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let secret = SecretKey::parse_slice(&bytes)
            .map_err(|e| SigningError::InvalidKey(format!("{e:?}")))?;
        let address = address_of(&PublicKey::from_secret_key(&secret));
        Ok(Self { secret, address })
    }
}

impl SigningIdentity for LocalKey {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Keccak256::digest(message));
        let (signature, recovery_id) = libsecp256k1::sign(&Message::parse(&digest), &self.secret);
        let mut out = signature.serialize().to_vec();
        out.push(recovery_id.serialize() + 27);
        Ok(out)
    }
}

// Redact the key.
impl std::fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn address_of(public: &PublicKey) -> String {
    let uncompressed = public.serialize();
    let digest = Keccak256::digest(&uncompressed[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}
