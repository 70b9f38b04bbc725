use std::{fmt, str::FromStr};

use browserid_types::{AssertionClaims, CertificateClaims, PublicKey};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::{jws::Jws, VerificationFailure};

/// Separates the tokens of a [`BackedAssertion`].
const BUNDLE_SEPARATOR: char = '~';

/// A token together with the claims it carries.
///
/// Decoding a token does not verify it, see [`AssertionAuthority::verify_chain`](crate::AssertionAuthority::verify_chain).
#[derive(Debug, Clone)]
pub struct Signed<T> {
    jws: Jws,
    claims: T,
}

/// A signed statement from an issuer that a public key speaks for an email address.
pub type Certificate = Signed<CertificateClaims>;

/// A short lived proof, signed by a certified key, meant for a single relying party.
pub type SignedAssertion = Signed<AssertionClaims>;

impl<T: DeserializeOwned> Signed<T> {
    /// Decode a compact token and its claims.
    pub fn parse(token: &str) -> Result<Self, VerificationFailure> {
        let jws = Jws::decode(token).ok_or(VerificationFailure::Malformed)?;
        let claims = jws.claims().ok_or(VerificationFailure::Malformed)?;
        Ok(Self { jws, claims })
    }
}

impl<T> Signed<T> {
    pub(crate) fn new(jws: Jws, claims: T) -> Self {
        Self { jws, claims }
    }

    /// The decoded claims.
    pub fn claims(&self) -> &T {
        &self.claims
    }

    /// The compact encoding of the token.
    pub fn as_str(&self) -> &str {
        self.jws.as_str()
    }

    pub(crate) fn is_signed_by(&self, key: &PublicKey) -> bool {
        self.jws.verify(key)
    }
}

impl<T> fmt::Display for Signed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<T: DeserializeOwned> FromStr for Signed<T> {
    type Err = VerificationFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Certificate {
    /// Is the certificate still valid at `now`?
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() <= self.claims.exp
    }

    /// The email address this certificate vouches for.
    pub fn email(&self) -> &str {
        &self.claims.principal.email
    }
}

impl SignedAssertion {
    /// Is the assertion still valid at `now`?
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() <= self.claims.exp
    }
}

/// What a browser hands to a relying party: a chain of certificates, root first, followed by
/// an assertion signed with the key the last certificate certifies.
#[derive(Debug, Clone)]
pub struct BackedAssertion {
    certificates: Vec<Certificate>,
    assertion: SignedAssertion,
}

impl BackedAssertion {
    /// Bundle an assertion with the certificates that back it.
    pub fn new(certificates: Vec<Certificate>, assertion: SignedAssertion) -> Self {
        Self {
            certificates,
            assertion,
        }
    }

    /// Decode a `cert~cert~assertion` bundle.
    pub fn parse(bundle: &str) -> Result<Self, VerificationFailure> {
        let mut tokens: Vec<&str> = bundle.split(BUNDLE_SEPARATOR).collect();
        let assertion = tokens.pop().ok_or(VerificationFailure::Malformed)?;
        let assertion = SignedAssertion::parse(assertion)?;
        let certificates = tokens
            .into_iter()
            .map(Certificate::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self {
            certificates,
            assertion,
        })
    }

    /// The certificates, root first.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The assertion at the end of the chain.
    pub fn assertion(&self) -> &SignedAssertion {
        &self.assertion
    }
}

impl fmt::Display for BackedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for certificate in &self.certificates {
            write!(f, "{certificate}{BUNDLE_SEPARATOR}")?;
        }
        write!(f, "{}", self.assertion)
    }
}

impl FromStr for BackedAssertion {
    type Err = VerificationFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
