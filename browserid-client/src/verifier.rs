use std::fmt;

use browserid_authority::{
    AssertionAuthority, BackedAssertion, TrustedRoots, VerificationFailure, VerifiedIdentity,
};
use browserid_types::{split_email, PublicKey};
use chrono::{DateTime, Utc};

use crate::{DelegationResolver, Fetcher, Resolution, ResolveError};


/// Errors produced while verifying a backed assertion on behalf of a relying party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// The assertion was rejected.
    Rejected(VerificationFailure),
    /// The authority of the email domain could not be determined.
    Resolve(ResolveError),
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::Rejected(failure) => write!(f, "{failure}"),
            VerifyError::Resolve(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for VerifyError {}

impl From<VerificationFailure> for VerifyError {
    fn from(failure: VerificationFailure) -> Self {
        VerifyError::Rejected(failure)
    }
}

impl From<ResolveError> for VerifyError {
    fn from(error: ResolveError) -> Self {
        VerifyError::Resolve(error)
    }
}

/// Verifies backed assertions the way a relying party's verification service does: the root of
/// the chain must be an authority that may speak for the email's domain.
///
/// That is either the secondary authority, whose key is configured with
/// [`Verifier::secondary_key`], or the primary the email domain resolves to, whose key is the one
/// in its declaration of support.
pub struct Verifier<F> {
    resolver: DelegationResolver<F>,
    secondary_key: Option<PublicKey>,
}

impl<F: Fetcher> Verifier<F> {
    /// Create a verifier that trusts primaries found by `resolver`.
    pub fn new(resolver: DelegationResolver<F>) -> Self {
        Self {
            resolver,
            secondary_key: None,
        }
    }

    /// Trust the configured secondary authority when it signs with `key`.
    pub fn secondary_key(mut self, key: PublicKey) -> Self {
        self.secondary_key = Some(key);
        self
    }

    /// Verify `bundle` for the relying party at `audience`.
    pub async fn verify(
        &self,
        bundle: &str,
        audience: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedIdentity, VerifyError> {
        let backed = BackedAssertion::parse(bundle)?;
        let (issuer, email) = match backed.certificates() {
            [] => {
                let claims = backed.assertion().claims();
                let issuer = claims.iss.clone().ok_or(VerificationFailure::Malformed)?;
                let email = claims
                    .principal
                    .as_ref()
                    .map(|principal| principal.email.clone())
                    .ok_or(VerificationFailure::Malformed)?;
                (issuer, email)
            }
            certificates @ [root, ..] => {
                let leaf = certificates.last().unwrap_or(root);
                (root.claims().iss.clone(), leaf.email().to_owned())
            }
        };
        let (_, domain) = split_email(&email).ok_or(VerificationFailure::Malformed)?;

        let key = self.issuer_key(&issuer, domain).await?;
        let roots = TrustedRoots::new().with(issuer, key);
        Ok(AssertionAuthority::verify_chain(bundle, &roots, audience, now)?)
    }

    async fn issuer_key(&self, issuer: &str, email_domain: &str) -> Result<PublicKey, VerifyError> {
        if issuer == self.resolver.config().secondary_authority {
            return self
                .secondary_key
                .clone()
                .ok_or(VerifyError::Rejected(VerificationFailure::UntrustedIssuer));
        }

        match self.resolver.resolve(email_domain).await? {
            Resolution::Authority(authority) if authority.domain == issuer => Ok(authority.public_key),
            _ => {
                log::debug!("{issuer} may not speak for {email_domain}");
                Err(VerifyError::Rejected(VerificationFailure::UntrustedIssuer))
            }
        }
    }
}
