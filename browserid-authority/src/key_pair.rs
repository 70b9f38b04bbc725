use std::fmt;

use browserid_types::PublicKey;
use p256::{ecdsa::SigningKey, SecretKey};

use crate::SigningError;

/// An ECDSA P-256 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the thread local CSPRNG.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut rand::thread_rng()),
        }
    }

    /// Restore a key pair from the big endian bytes of its private scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        SecretKey::from_slice(bytes)
            .map(|secret| Self { secret })
            .map_err(|_| SigningError::MalformedKey)
    }

    /// The big endian bytes of the private scalar.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.secret.to_bytes().to_vec()
    }

    /// The public half, as it is certified.
    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key().into()
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.secret)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key().to_jwk_string())
            .finish_non_exhaustive()
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for KeyPair {}
