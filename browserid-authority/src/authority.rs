use std::collections::HashMap;

use browserid_types::{split_email, AssertionClaims, CertificateClaims, Principal, PublicKey};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use url::Url;

use crate::{
    jws::{self, Jws},
    BackedAssertion, Certificate, KeyPair, Signed, SignedAssertion, SigningError,
    VerificationFailure,
};


/// How long an assertion is valid for when the caller does not choose an expiry, in minutes.
const DEFAULT_ASSERTION_VALIDITY: i64 = 2;

/// How long certificates minted for secondary addresses are valid for, in hours.
const DEFAULT_CERTIFICATE_VALIDITY: i64 = 24;

/// The keys of the authorities a relying party accepts as the root of a certificate chain,
/// by issuer domain.
#[derive(Debug, Clone, Default)]
pub struct TrustedRoots(HashMap<String, PublicKey>);

impl TrustedRoots {
    /// No trusted issuers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `issuer` when it signs with `key`.
    pub fn with(mut self, issuer: impl Into<String>, key: PublicKey) -> Self {
        self.insert(issuer, key);
        self
    }

    /// Trust `issuer` when it signs with `key`, replacing any key previously trusted for it.
    pub fn insert(&mut self, issuer: impl Into<String>, key: PublicKey) {
        self.0.insert(issuer.into(), key);
    }

    /// The trusted key of `issuer`.
    pub fn get(&self, issuer: &str) -> Option<&PublicKey> {
        self.0.get(issuer)
    }
}

impl FromIterator<(String, PublicKey)> for TrustedRoots {
    fn from_iter<I: IntoIterator<Item = (String, PublicKey)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The identity proven by a verified backed assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// The proven email address.
    pub email: String,
    /// The origin the assertion was generated for.
    pub audience: String,
    /// The root issuer of the certificate chain.
    pub issuer: String,
    /// When the assertion expires, in milliseconds since the unix epoch.
    pub expires: i64,
}

/// An identity authority: it certifies keys for the addresses it is authoritative for, and the
/// same type generates and verifies assertions.
#[derive(Debug, Clone)]
pub struct AssertionAuthority {
    issuer: String,
    key_pair: KeyPair,
    assertion_validity: Duration,
    certificate_validity: Duration,
}

impl AssertionAuthority {
    /// Create an authority for the `issuer` domain that signs with `key_pair`.
    pub fn new(issuer: impl Into<String>, key_pair: KeyPair) -> Self {
        Self {
            issuer: issuer.into(),
            key_pair,
            assertion_validity: Duration::minutes(DEFAULT_ASSERTION_VALIDITY),
            certificate_validity: Duration::hours(DEFAULT_CERTIFICATE_VALIDITY),
        }
    }

    /// Change how long generated assertions are valid for when no expiry is requested.
    pub fn assertion_validity(mut self, validity: Duration) -> Self {
        self.assertion_validity = validity;
        self
    }

    /// Change the validity used by [`Self::certify`].
    pub fn certificate_validity(mut self, validity: Duration) -> Self {
        self.certificate_validity = validity;
        self
    }

    /// The domain this authority signs as.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The key relying parties should trust for [`Self::issuer`].
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key()
    }

    /// Certify that `public_key` speaks for `email` for the next `ttl`.
    pub fn mint_certificate(
        &self,
        email: &str,
        public_key: &PublicKey,
        ttl: Duration,
    ) -> Result<Certificate, SigningError> {
        if split_email(email).is_none() {
            return Err(SigningError::InvalidPrincipal);
        }
        let now = Utc::now();
        let expires = now
            .checked_add_signed(ttl)
            .ok_or(SigningError::ExpiryOutOfRange)?;

        let claims = CertificateClaims {
            iss: self.issuer.clone(),
            iat: now.timestamp_millis(),
            exp: expires.timestamp_millis(),
            public_key: public_key.clone(),
            principal: Principal {
                email: email.to_owned(),
            },
        };
        sign_claims(claims, &self.key_pair)
    }

    /// [`Self::mint_certificate`] with the configured certificate validity.
    pub fn certify(&self, email: &str, public_key: &PublicKey) -> Result<Certificate, SigningError> {
        self.mint_certificate(email, public_key, self.certificate_validity)
    }

    /// Generate an assertion for `audience` with the user's private key.
    ///
    /// `private_key` is the big endian scalar of the certified key. The assertion is valid until
    /// `expiry`, or for two minutes (see [`Self::assertion_validity`]) when no expiry is given.
    pub fn generate_assertion(
        &self,
        audience: &str,
        email: &str,
        private_key: &[u8],
        expiry: Option<DateTime<Utc>>,
    ) -> Result<SignedAssertion, SigningError> {
        let key_pair = KeyPair::from_bytes(private_key)?;
        let claims = AssertionClaims {
            aud: origin_of(audience).ok_or(SigningError::InvalidAudience)?,
            exp: self.expiry(expiry)?,
            iss: None,
            principal: Some(Principal {
                email: email.to_owned(),
            }),
        };
        sign_claims(claims, &key_pair)
    }

    /// Sign an assertion for `email` directly with the authority key, with no certificate.
    ///
    /// Such an assertion carries `iss` and verifies against [`TrustedRoots`] on its own.
    pub fn issue_assertion(
        &self,
        audience: &str,
        email: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<SignedAssertion, SigningError> {
        if split_email(email).is_none() {
            return Err(SigningError::InvalidPrincipal);
        }
        let claims = AssertionClaims {
            aud: origin_of(audience).ok_or(SigningError::InvalidAudience)?,
            exp: self.expiry(expiry)?,
            iss: Some(self.issuer.clone()),
            principal: Some(Principal {
                email: email.to_owned(),
            }),
        };
        sign_claims(claims, &self.key_pair)
    }

    fn expiry(&self, expiry: Option<DateTime<Utc>>) -> Result<i64, SigningError> {
        let expiry = match expiry {
            Some(expiry) => expiry,
            None => Utc::now()
                .checked_add_signed(self.assertion_validity)
                .ok_or(SigningError::ExpiryOutOfRange)?,
        };
        Ok(expiry.timestamp_millis())
    }

    /// Verify a `cert~...~assertion` bundle as the relying party at `audience`.
    ///
    /// Checks are made in this order, the first one to fail is reported:
    /// 1. the root certificate is issued by one of `trusted_roots`
    /// 1. every certificate is signed by the key of the previous one (the root key for the
    ///    first), and has not expired at `now`
    /// 1. the assertion is signed by the last certified key, has not expired, and was generated
    ///    for the same origin as `audience`
    /// 1. the assertion's principal, if any, is the certified one
    ///
    /// A bundle without certificates is only accepted when the assertion carries `iss` and was
    /// signed directly with that trusted root's key.
    pub fn verify_chain(
        bundle: &str,
        trusted_roots: &TrustedRoots,
        audience: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedIdentity, VerificationFailure> {
        let backed = BackedAssertion::parse(bundle)?;
        let result = verify_backed_assertion(&backed, trusted_roots, audience, now);
        if let Err(failure) = &result {
            log::debug!("rejected assertion for {audience}: {failure}");
        }
        result
    }
}

fn verify_backed_assertion(
    backed: &BackedAssertion,
    trusted_roots: &TrustedRoots,
    audience: &str,
    now: DateTime<Utc>,
) -> Result<VerifiedIdentity, VerificationFailure> {
    let now = now.timestamp_millis();
    let assertion = backed.assertion();

    let (issuer, certified_key, certified_email) = match backed.certificates() {
        [] => {
            let issuer = assertion
                .claims()
                .iss
                .as_deref()
                .ok_or(VerificationFailure::Malformed)?;
            let email = assertion
                .claims()
                .principal
                .as_ref()
                .map(|principal| principal.email.as_str())
                .ok_or(VerificationFailure::Malformed)?;
            let key = trusted_roots
                .get(issuer)
                .ok_or(VerificationFailure::UntrustedIssuer)?;
            (issuer, key, email)
        }
        [root, ..] => {
            let issuer = root.claims().iss.as_str();
            let mut signer = trusted_roots
                .get(issuer)
                .ok_or(VerificationFailure::UntrustedIssuer)?;
            let mut email = root.email();
            for certificate in backed.certificates() {
                if !certificate.is_signed_by(signer) {
                    return Err(VerificationFailure::SignatureInvalid);
                }
                if certificate.claims().exp < now {
                    return Err(VerificationFailure::ExpiredCertificate);
                }
                signer = &certificate.claims().public_key;
                email = certificate.email();
            }
            (issuer, signer, email)
        }
    };

    if !assertion.is_signed_by(certified_key) {
        return Err(VerificationFailure::SignatureInvalid);
    }
    if assertion.claims().exp < now {
        return Err(VerificationFailure::ExpiredAssertion);
    }
    let expected = origin_of(audience).ok_or(VerificationFailure::AudienceMismatch)?;
    if origin_of(&assertion.claims().aud).as_deref() != Some(expected.as_str()) {
        return Err(VerificationFailure::AudienceMismatch);
    }
    if let Some(principal) = &assertion.claims().principal {
        if principal.email != certified_email {
            return Err(VerificationFailure::PrincipalMismatch);
        }
    }

    Ok(VerifiedIdentity {
        email: certified_email.to_owned(),
        audience: expected,
        issuer: issuer.to_owned(),
        expires: assertion.claims().exp,
    })
}

fn sign_claims<T: Serialize>(claims: T, key_pair: &KeyPair) -> Result<Signed<T>, SigningError> {
    let token = jws::sign(&claims, &key_pair.signing_key())?;
    let jws = Jws::decode(&token).ok_or(SigningError::SignatureFailed)?;
    Ok(Signed::new(jws, claims))
}

/// The serialized origin of `audience`, or `None` when it has no tuple origin.
fn origin_of(audience: &str) -> Option<String> {
    let origin = Url::parse(audience).ok()?.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization())
}
