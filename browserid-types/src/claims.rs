use serde::{Deserialize, Serialize};

use crate::PublicKey;

/// The identity a certificate or assertion speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// The email address.
    pub email: String,
}

/// The payload of a certificate: the issuer vouches that `public_key` speaks for `principal`
/// until `exp`.
///
/// Timestamps are milliseconds since the unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateClaims {
    /// The domain that signed the certificate.
    pub iss: String,
    /// Issued at.
    pub iat: i64,
    /// Valid until.
    pub exp: i64,
    /// The certified key.
    #[serde(rename = "public-key")]
    pub public_key: PublicKey,
    /// Who the certified key speaks for.
    pub principal: Principal,
}

/// The payload of an assertion presented to a relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// The origin of the relying party the assertion is meant for.
    pub aud: String,
    /// Valid until, in milliseconds since the unix epoch.
    pub exp: i64,
    /// Only present on assertions signed directly by an authority, without certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// The identity claimed by the assertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
}
