use serde::{Deserialize, Serialize};
use typeshare::typeshare;
use url::Url;

use crate::PublicKey;

/// How the owner of an email address authenticates.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AddressType {
    /// The email's domain, or the domain it delegates to, vouches for its own addresses.
    Primary,
    /// The domain has no declaration of support; the fallback authority vouches for the
    /// address after a password based authentication.
    Secondary,
}

/// How much is currently known about an email address.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AddressState {
    /// Nothing has been resolved yet.
    Unknown,
    /// Resolution succeeded.
    Known,
    /// The authority could not be reached. This is not the same as "not supported", the caller
    /// should offer the user to retry.
    Offline,
}

/// The endpoints and key of a resolved primary authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryAuthority {
    /// Where the user is sent to authenticate with the authority.
    #[serde(rename = "auth")]
    pub authentication: Url,
    /// The silent provisioning endpoint that certifies the user's key.
    #[serde(rename = "prov")]
    pub provisioning: Url,
    /// The key the authority signs certificates with.
    #[serde(rename = "public-key")]
    pub public_key: PublicKey,
}

/// The classification of a single email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// The normalized address.
    pub email: String,
    /// Primary or secondary.
    #[serde(rename = "type")]
    pub ty: AddressType,
    /// Known, or offline when the authority could not be asked.
    pub state: AddressState,
    /// The domain that is authoritative for this address after following delegation. For
    /// secondary addresses this is the fallback authority.
    #[serde(rename = "issuer")]
    pub idp_domain: String,
    /// Present only for primaries whose support was resolved.
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<PrimaryAuthority>,
}

impl AddressInfo {
    /// A primary address whose authority was resolved.
    pub fn primary(email: String, idp_domain: String, authority: PrimaryAuthority) -> Self {
        Self {
            email,
            ty: AddressType::Primary,
            state: AddressState::Known,
            idp_domain,
            primary: Some(authority),
        }
    }

    /// A secondary address, vouched for by `fallback_authority`.
    pub fn secondary(email: String, fallback_authority: String) -> Self {
        Self {
            email,
            ty: AddressType::Secondary,
            state: AddressState::Known,
            idp_domain: fallback_authority,
            primary: None,
        }
    }

    /// An address whose authority did not answer. `ty` is the last known type of the address.
    pub fn offline(email: String, ty: AddressType, idp_domain: String) -> Self {
        Self {
            email,
            ty,
            state: AddressState::Offline,
            idp_domain,
            primary: None,
        }
    }

    /// Is this a primary address?
    pub fn is_primary(&self) -> bool {
        self.ty == AddressType::Primary
    }

    /// Was the authority unreachable?
    pub fn is_offline(&self) -> bool {
        self.state == AddressState::Offline
    }
}

/// Split an email address into its local part and domain.
///
/// Returns `None` unless there is exactly one `@` with something on both sides of it.
pub fn split_email(email: &str) -> Option<(&str, &str)> {
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some((local, domain))
}
