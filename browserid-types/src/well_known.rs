//! The declaration of support a domain hosts to announce that it vouches for its own email
//! addresses, or that another domain does so on its behalf.

use serde::Deserialize;
use serde_json::Value;

use crate::{utils::serde::default_if_mistyped, DocumentError, PublicKey};


/// The path, relative to a domain's root, where the declaration of support is hosted.
pub const WELL_KNOWN_PATH: &str = "/.well-known/browserid";

/// The members of a declaration of support, as published.
///
/// Members of the wrong JSON type are treated as absent; what absence means is decided by
/// [`SupportDocument::parse`].
#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    supported: Option<Value>,
    #[serde(default, deserialize_with = "default_if_mistyped")]
    disabled: Option<bool>,
    #[serde(default, deserialize_with = "default_if_mistyped")]
    authority: Option<String>,
    #[serde(default, deserialize_with = "default_if_mistyped")]
    authentication: Option<String>,
    #[serde(default, deserialize_with = "default_if_mistyped")]
    provisioning: Option<String>,
    #[serde(default, rename = "public-key")]
    public_key: Option<Value>,
}

impl RawDocument {
    /// Only an explicit `false` opts out. Any other value of `supported`, even a truthy one of the
    /// wrong type, does not disable support.
    fn is_disabled(&self) -> bool {
        let explicitly_unsupported = match &self.supported {
            Some(Value::Bool(supported)) => !supported,
            Some(Value::String(supported)) => supported == "false",
            _ => false,
        };
        explicitly_unsupported || self.disabled == Some(true)
    }
}

/// What a domain supports, according to its declaration of support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportDocument {
    /// The domain explicitly opted out, its addresses are secondary.
    Disabled,
    /// Another domain is authoritative on this domain's behalf.
    Delegation {
        /// The delegated authority, as published. It still has to be validated as a domain.
        authority: String,
    },
    /// The domain is a primary authority.
    Supported(PrimarySupport),
}

/// The members of a declaration that supports BrowserID directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimarySupport {
    /// The key certificates issued by this domain are signed with.
    pub public_key: PublicKey,
    /// Path of the authentication page, relative to the domain.
    pub authentication: String,
    /// Path of the provisioning page, relative to the domain.
    pub provisioning: String,
}

impl SupportDocument {
    /// Parse and classify a declaration of support.
    ///
    /// The classification is evaluated in order:
    /// 1. `supported` set to `false` or `"false"` (or `disabled` set to `true`) → [`SupportDocument::Disabled`]
    /// 1. a string `authority` → [`SupportDocument::Delegation`]; a non string `authority` is ignored
    /// 1. otherwise `public-key`, `authentication` and `provisioning` are all required →
    ///    [`SupportDocument::Supported`]
    pub fn parse(raw: &[u8]) -> Result<Self, DocumentError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|_| DocumentError::MalformedDocument)?;
        if !value.is_object() {
            return Err(DocumentError::MalformedDocument);
        }
        let document =
            RawDocument::deserialize(value).map_err(|_| DocumentError::MalformedDocument)?;

        if document.is_disabled() {
            return Ok(SupportDocument::Disabled);
        }

        if let Some(authority) = document.authority {
            return Ok(SupportDocument::Delegation { authority });
        }

        let public_key = document
            .public_key
            .filter(Value::is_object)
            .ok_or(DocumentError::MissingRequiredField("public-key"))?;
        let authentication = document
            .authentication
            .ok_or(DocumentError::MissingRequiredField("authentication"))?;
        let provisioning = document
            .provisioning
            .ok_or(DocumentError::MissingRequiredField("provisioning"))?;

        Ok(SupportDocument::Supported(PrimarySupport {
            public_key: PublicKey::from_jwk_value(&public_key)?,
            authentication,
            provisioning,
        }))
    }
}
