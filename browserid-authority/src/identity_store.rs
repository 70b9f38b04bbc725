use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use browserid_types::PublicKey;
use chrono::{DateTime, Utc};

use crate::{Certificate, KeyPair};

/// What a browser remembers about one of its user's email addresses.
#[derive(Debug, Clone)]
pub struct KnownIdentity {
    /// When the address was first used in this browser.
    pub created: DateTime<Utc>,
    /// The authority that certified the key, when it is not the fallback authority.
    pub issuer: Option<String>,
    /// The key pair generated for this address, if any.
    pub key_pair: Option<KeyPair>,
    /// The certificate of [`Self::key_pair`], once one was issued.
    pub certificate: Option<Certificate>,
}

impl KnownIdentity {
    /// An address with no key yet.
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            created,
            issuer: None,
            key_pair: None,
            certificate: None,
        }
    }

    /// The public key of the generated key pair.
    pub fn public_key(&self) -> Option<PublicKey> {
        self.key_pair.as_ref().map(KeyPair::public_key)
    }

    /// The key pair and certificate, when the certificate is still valid at `now`.
    pub fn certified_key(&self, now: DateTime<Utc>) -> Option<(&KeyPair, &Certificate)> {
        let key_pair = self.key_pair.as_ref()?;
        let certificate = self.certificate.as_ref().filter(|cert| {
            cert.is_valid_at(now) && cert.claims().public_key == key_pair.public_key()
        })?;
        Some((key_pair, certificate))
    }
}

/// Use this on a type that persists the identities known to a browser.
///
/// The methods take `&self` since a store is shared by a dialog and the operations it starts.
#[cfg_attr(any(test, feature = "testable"), mockall::automock)]
pub trait IdentityStore {
    /// Every known identity, by email address.
    fn known_identities(&self) -> BTreeMap<String, KnownIdentity>;

    /// Remember `identity` for `email`, replacing what was known before.
    fn set_known_identity(&self, email: &str, identity: KnownIdentity);

    /// Forget `email`.
    fn remove_known_identity(&self, email: &str);

    /// The identity known for `email`.
    fn known_identity(&self, email: &str) -> Option<KnownIdentity> {
        self.known_identities().remove(email)
    }
}

/// In-memory store for known identities
pub type MemoryStore = Mutex<BTreeMap<String, KnownIdentity>>;

impl IdentityStore for MemoryStore {
    fn known_identities(&self) -> BTreeMap<String, KnownIdentity> {
        self.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_known_identity(&self, email: &str, identity: KnownIdentity) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(email.to_owned(), identity);
    }

    fn remove_known_identity(&self, email: &str) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(email);
    }

    fn known_identity(&self, email: &str) -> Option<KnownIdentity> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(email)
            .cloned()
    }
}
