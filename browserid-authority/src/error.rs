use std::fmt;

/// Errors produced while signing a certificate or an assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningError {
    /// The private key bytes are not a valid P-256 scalar.
    MalformedKey,
    /// The audience is not an origin that can be serialized, such as `https://rp.example`.
    InvalidAudience,
    /// The email address to certify is not of the form `local@domain`.
    InvalidPrincipal,
    /// The requested validity puts the expiry outside of the representable time range.
    ExpiryOutOfRange,
    /// The claims could not be encoded, or the signing primitive rejected them.
    SignatureFailed,
}

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SigningError::MalformedKey => "malformed private key",
            SigningError::InvalidAudience => "audience is not a valid origin",
            SigningError::InvalidPrincipal => "principal is not a valid email address",
            SigningError::ExpiryOutOfRange => "expiry out of range",
            SigningError::SignatureFailed => "could not sign the claims",
        })
    }
}

impl std::error::Error for SigningError {}

/// The reason a backed assertion was rejected by a relying party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The bundle, one of its tokens, or the claims within could not be decoded.
    Malformed,
    /// A certificate in the chain expired before the verification time.
    ExpiredCertificate,
    /// The assertion expired before the verification time.
    ExpiredAssertion,
    /// The assertion was generated for a different relying party.
    AudienceMismatch,
    /// The root of the chain was issued by an authority that is not trusted.
    UntrustedIssuer,
    /// A certificate or the assertion was not signed by the key it should have been.
    SignatureInvalid,
    /// The assertion claims a different email address than the one certified.
    PrincipalMismatch,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationFailure::Malformed => "malformed assertion",
            VerificationFailure::ExpiredCertificate => "certificate expired",
            VerificationFailure::ExpiredAssertion => "assertion has expired",
            VerificationFailure::AudienceMismatch => "audience mismatch",
            VerificationFailure::UntrustedIssuer => "issuer is not trusted",
            VerificationFailure::SignatureInvalid => "signature invalid",
            VerificationFailure::PrincipalMismatch => "principal mismatch",
        })
    }
}

impl std::error::Error for VerificationFailure {}
