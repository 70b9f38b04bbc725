use p256::elliptic_curve::JwkEcKey;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::DocumentError;

/// A public key as published in a declaration of support or bound into a certificate.
///
/// Keys travel as JSON Web Keys. The only supported algorithm is ECDSA over P-256 (`ES256`);
/// anything else, including the legacy `{"algorithm": "RS", ...}` objects, is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Parse a key from the JSON value of a `public-key` member.
    pub fn from_jwk_value(value: &Value) -> Result<Self, DocumentError> {
        let jwk = JwkEcKey::deserialize(value).map_err(|_| DocumentError::InvalidPublicKey)?;
        p256::PublicKey::from_jwk(&jwk)
            .map(Self)
            .map_err(|_| DocumentError::InvalidPublicKey)
    }

    /// Parse a key from its JWK string form.
    pub fn from_jwk_str(jwk: &str) -> Result<Self, DocumentError> {
        p256::PublicKey::from_jwk_str(jwk)
            .map(Self)
            .map_err(|_| DocumentError::InvalidPublicKey)
    }

    /// The JWK string form of this key.
    pub fn to_jwk_string(&self) -> String {
        self.0.to_jwk_string()
    }

    /// Access the underlying elliptic curve key.
    pub fn as_p256(&self) -> &p256::PublicKey {
        &self.0
    }
}

impl From<p256::PublicKey> for PublicKey {
    fn from(key: p256::PublicKey) -> Self {
        Self(key)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.to_jwk().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let jwk = JwkEcKey::deserialize(deserializer)?;
        p256::PublicKey::from_jwk(&jwk)
            .map(Self)
            .map_err(D::Error::custom)
    }
}
