//! # BrowserID Authority
//!
//! This crate holds everything that signs or checks signatures in a BrowserID deployment:
//!
//! * [`KeyPair`], the ECDSA P-256 keys users and authorities sign with.
//! * [`AssertionAuthority`], which mints certificates binding a user's key to an email address,
//!   generates the short lived assertions a browser hands to a relying party, and verifies a
//!   [`BackedAssertion`] back to one of a set of [`TrustedRoots`].
//! * [`IdentityStore`], the narrow storage contract for the identities a browser knows about,
//!   with an in memory implementation.
//!
//! Certificates and assertions are compact JSON Web Signatures using `ES256`. A bundle
//! presented to a relying party is every certificate in the chain followed by the assertion,
//! joined with `~`.

mod authority;
mod error;
mod identity_store;
mod jws;
mod key_pair;
mod signed;

pub use self::{
    authority::{AssertionAuthority, TrustedRoots, VerifiedIdentity},
    error::{SigningError, VerificationFailure},
    identity_store::{IdentityStore, KnownIdentity, MemoryStore},
    key_pair::KeyPair,
    signed::{BackedAssertion, Certificate, Signed, SignedAssertion},
};

#[cfg(any(test, feature = "testable"))]
pub use self::identity_store::MockIdentityStore;
