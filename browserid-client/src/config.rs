use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Deserializer};
use url::Url;

/// How many times a domain may delegate its authority before resolution gives up.
const DEFAULT_MAX_DELEGATIONS: usize = 6;

/// How long a single support document fetch may take, in milliseconds.
const DEFAULT_FETCH_TIMEOUT: u64 = 10_000;

/// How long an address classification is served from the cache, in milliseconds.
const DEFAULT_CACHE_TTL: u64 = 6 * 60 * 60 * 1000;

/// The authority vouching for secondary addresses.
const DEFAULT_SECONDARY_AUTHORITY: &str = "login.persona.org";

/// Settings shared by the [`DelegationResolver`](crate::DelegationResolver) and the services
/// built on top of it.
///
/// Every member has a default, so the configuration can be deserialized from a partial JSON
/// object:
///
/// ```
/// # use browserid_client::ResolverConfig;
/// let config: ResolverConfig = serde_json::from_str(r#"{
///     "max_delegations": 3,
///     "shimmed_primaries": "example.com|http://127.0.0.1:10005"
/// }"#).unwrap();
/// assert_eq!(config.shims().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub(crate) max_delegations: usize,
    #[serde(rename = "fetch_timeout_ms", deserialize_with = "duration_from_millis")]
    pub(crate) fetch_timeout: Duration,
    #[serde(rename = "cache_ttl_ms", deserialize_with = "duration_from_millis")]
    pub(crate) cache_ttl: Duration,
    pub(crate) disable_primary_support: bool,
    #[serde(rename = "shimmed_primaries", deserialize_with = "shims_from_str")]
    pub(crate) shims: Vec<Shim>,
    pub(crate) secondary_authority: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_delegations: DEFAULT_MAX_DELEGATIONS,
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT),
            cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL),
            disable_primary_support: false,
            shims: Vec::new(),
            secondary_authority: DEFAULT_SECONDARY_AUTHORITY.to_owned(),
        }
    }
}

impl ResolverConfig {
    /// Limit how many times authority may be delegated. Defaults to 6.
    pub fn max_delegations(mut self, max_delegations: usize) -> Self {
        self.max_delegations = max_delegations;
        self
    }

    /// How long a support document fetch may take before the authority is considered
    /// unreachable. Defaults to 10 seconds.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// How long address classifications are cached. Defaults to 6 hours.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Treat every domain as secondary without fetching anything.
    pub fn disable_primary_support(mut self, is_disabled: bool) -> Self {
        self.disable_primary_support = is_disabled;
        self
    }

    /// Serve `domain`'s support document, and its endpoints, from `origin` instead.
    ///
    /// This is meant for local development against primaries that are not deployed.
    pub fn shim(mut self, shim: Shim) -> Self {
        self.shims.retain(|existing| existing.domain != shim.domain);
        self.shims.push(shim);
        self
    }

    /// The domain that vouches for secondary addresses.
    pub fn secondary_authority(mut self, authority: impl Into<String>) -> Self {
        self.secondary_authority = authority.into();
        self
    }

    /// The configured shims.
    pub fn shims(&self) -> &[Shim] {
        &self.shims
    }

    pub(crate) fn shim_for(&self, domain: &str) -> Option<&Shim> {
        self.shims.iter().find(|shim| shim.domain == domain)
    }
}

/// A domain whose traffic is redirected to a local origin, written `domain|origin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shim {
    domain: String,
    origin: Url,
}

impl Shim {
    /// Redirect `domain` to `origin`. Only the origin of the url is kept.
    pub fn new(domain: impl Into<String>, origin: &Url) -> Result<Self, ConfigError> {
        let domain = domain.into().to_ascii_lowercase();
        let serialized = origin.origin().ascii_serialization();
        let origin = Url::parse(&serialized).map_err(|_| ConfigError::InvalidShim(domain.clone()))?;
        Ok(Self { domain, origin })
    }

    /// Parse a comma separated list of `domain|origin` shims.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, ConfigError> {
        list.split(',')
            .map(str::trim)
            .filter(|shim| !shim.is_empty())
            .map(str::parse)
            .collect()
    }

    /// The shimmed domain.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Where the domain's traffic goes.
    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

impl FromStr for Shim {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // a trailing path to a local copy of the document is tolerated and ignored
        let mut parts = s.split('|');
        let (Some(domain), Some(origin)) = (parts.next(), parts.next()) else {
            return Err(ConfigError::InvalidShim(s.to_owned()));
        };
        let origin = Url::parse(origin).map_err(|_| ConfigError::InvalidShim(s.to_owned()))?;
        Shim::new(domain.trim(), &origin)
    }
}

/// Errors produced while reading a [`ResolverConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A shim is not of the form `domain|origin`, or its origin is not a url.
    InvalidShim(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidShim(shim) => write!(f, "invalid shimmed primary: {shim}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn duration_from_millis<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
    u64::deserialize(de).map(Duration::from_millis)
}

fn shims_from_str<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Shim>, D::Error> {
    let list = String::deserialize(de)?;
    Shim::parse_list(&list).map_err(serde::de::Error::custom)
}
