use std::fmt;

use browserid_types::{
    well_known::WELL_KNOWN_PATH, DocumentError, PrimaryAuthority, PrimarySupport, PublicKey,
    SupportDocument,
};
use itertools::Itertools;
use public_suffix::EffectiveTLDProvider;
use url::Url;

use crate::{FetchError, Fetcher, ResolverConfig, SupportResponse};


/// Follows declarations of support from an email domain to the authority responsible for it.
///
/// Every resolution starts afresh, the hops of a delegation chain are not cached individually.
pub struct DelegationResolver<F> {
    fetcher: F,
    config: ResolverConfig,
    tld_provider: Box<dyn EffectiveTLDProvider + Send + Sync>,
}

/// The final answer of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The domain, or one it delegates to, is a primary authority.
    Authority(ResolvedAuthority),
    /// No authority declared support, addresses of the domain are secondary.
    NotSupported,
}

/// A primary authority found at the end of a delegation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuthority {
    /// The domain that declared support. For delegated domains this is not the email domain.
    pub domain: String,
    /// The key certificates from this authority are signed with.
    pub public_key: PublicKey,
    /// The absolute url of the authentication page.
    pub authentication: Url,
    /// The absolute url of the provisioning page.
    pub provisioning: Url,
}

impl From<ResolvedAuthority> for PrimaryAuthority {
    fn from(authority: ResolvedAuthority) -> Self {
        PrimaryAuthority {
            authentication: authority.authentication,
            provisioning: authority.provisioning,
            public_key: authority.public_key,
        }
    }
}

/// The domains visited while following delegations, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationChain(Vec<String>);

impl DelegationChain {
    /// The visited domains.
    pub fn domains(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for DelegationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().format(" > "))
    }
}

/// Errors produced while resolving the authority of a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The domain is not a registrable domain name.
    InvalidDomain(String),
    /// A domain delegated to a domain that was already visited.
    DelegationCycle(DelegationChain),
    /// More delegations than allowed by [`ResolverConfig::max_delegations`].
    DelegationTooDeep(DelegationChain),
    /// The domain could not be asked for its declaration of support. This is not the same as
    /// the domain not supporting BrowserID.
    AuthorityUnreachable(String),
    /// The domain published a declaration of support that cannot be used.
    Document {
        /// The domain that published the document.
        domain: String,
        /// What is wrong with it.
        error: DocumentError,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::InvalidDomain(domain) => write!(f, "invalid domain: {domain}"),
            ResolveError::DelegationCycle(chain) => {
                write!(f, "circular reference in delegating authority: {chain}")
            }
            ResolveError::DelegationTooDeep(chain) => {
                write!(f, "too many hops while delegating authority: {chain}")
            }
            ResolveError::AuthorityUnreachable(domain) => {
                write!(f, "authority unreachable: {domain}")
            }
            ResolveError::Document { domain, error } => {
                write!(f, "bad support document for '{domain}': {error}")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

impl<F: Fetcher> DelegationResolver<F> {
    /// Create a resolver that fetches with `fetcher` and validates domains against the Mozilla
    /// Public Suffix List.
    pub fn new(fetcher: F, config: ResolverConfig) -> Self {
        Self {
            fetcher,
            config,
            tld_provider: Box::new(public_suffix::DEFAULT_PROVIDER),
        }
    }

    /// Validate domains against a custom TLD provider instead.
    pub fn tld_provider<P>(mut self, provider: P) -> Self
    where
        P: EffectiveTLDProvider + Send + Sync + 'static,
    {
        self.tld_provider = Box::new(provider);
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The fetcher documents are fetched with.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Lower case and punycode encode `domain`, and make sure it is registrable.
    ///
    /// Shimmed domains are accepted as is, since they usually are not real domains.
    pub fn normalize_domain(&self, domain: &str) -> Result<String, ResolveError> {
        let invalid = || ResolveError::InvalidDomain(domain.to_owned());

        let ascii = idna::domain_to_ascii(domain.trim()).map_err(|_| invalid())?;
        let is_hostname = !ascii.is_empty()
            && ascii.split('.').all(|label| {
                !label.is_empty()
                    && label
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
            });
        if !is_hostname {
            return Err(invalid());
        }
        if self.config.shim_for(&ascii).is_some() {
            return Ok(ascii);
        }

        self.tld_provider
            .effective_tld_plus_one(&ascii)
            .map_err(|_| invalid())?;
        Ok(ascii)
    }

    /// Follow the declarations of support starting at `start_domain`.
    ///
    /// A domain without a declaration, or one that explicitly disables support, ends resolution
    /// with [`Resolution::NotSupported`]. A domain that supports BrowserID ends it with its
    /// [`ResolvedAuthority`]. A delegation continues at the delegated domain, unless it was
    /// already visited or [`ResolverConfig::max_delegations`] would be exceeded.
    pub async fn resolve(&self, start_domain: &str) -> Result<Resolution, ResolveError> {
        if self.config.disable_primary_support {
            log::debug!("primary support disabled, {start_domain} is secondary");
            return Ok(Resolution::NotSupported);
        }

        let mut current = self.normalize_domain(start_domain)?;
        let mut visited = vec![current.clone()];

        loop {
            let document = match self.fetch_document(&current).await? {
                Some(document) => document,
                None => {
                    log::debug!("{current} is not a browserid primary");
                    return Ok(Resolution::NotSupported);
                }
            };

            match document {
                SupportDocument::Disabled => {
                    log::debug!("{current} has explicitly disabled browserid support");
                    return Ok(Resolution::NotSupported);
                }
                SupportDocument::Supported(support) => {
                    let authority = self.resolved_authority(current, support)?;
                    log::info!(
                        "{start_domain} is a valid browserid primary, authority {}",
                        authority.domain
                    );
                    return Ok(Resolution::Authority(authority));
                }
                SupportDocument::Delegation { authority } => {
                    let next = self.normalize_domain(&authority)?;
                    if visited.contains(&next) {
                        return Err(ResolveError::DelegationCycle(DelegationChain(visited)));
                    }
                    if visited.len() > self.config.max_delegations {
                        return Err(ResolveError::DelegationTooDeep(DelegationChain(visited)));
                    }
                    log::debug!("{current} delegates authority to {next}");
                    visited.push(next.clone());
                    current = next;
                }
            }
        }
    }

    /// The origin serving `domain`, which is its https origin unless it is shimmed.
    fn origin(&self, domain: &str) -> Result<Url, ResolveError> {
        match self.config.shim_for(domain) {
            Some(shim) => Ok(shim.origin().clone()),
            None => Url::parse(&format!("https://{domain}"))
                .map_err(|_| ResolveError::InvalidDomain(domain.to_owned())),
        }
    }

    async fn fetch_document(&self, domain: &str) -> Result<Option<SupportDocument>, ResolveError> {
        let url = self
            .origin(domain)?
            .join(WELL_KNOWN_PATH)
            .map_err(|_| ResolveError::InvalidDomain(domain.to_owned()))?;

        let fetch = self.fetcher.fetch_support_document(url);
        let response = match tokio::time::timeout(self.config.fetch_timeout, fetch).await {
            Ok(response) => response,
            Err(_) => Err(FetchError::Timeout),
        };

        match response {
            Ok(SupportResponse::Document(body)) => SupportDocument::parse(&body)
                .map(Some)
                .map_err(|error| {
                    log::debug!("{domain} is a broken browserid primary: {error}");
                    ResolveError::Document {
                        domain: domain.to_owned(),
                        error,
                    }
                }),
            Ok(SupportResponse::Absent) => Ok(None),
            Err(error) => {
                log::warn!("could not fetch the support document of {domain}: {error}");
                Err(ResolveError::AuthorityUnreachable(domain.to_owned()))
            }
        }
    }

    fn resolved_authority(
        &self,
        domain: String,
        support: PrimarySupport,
    ) -> Result<ResolvedAuthority, ResolveError> {
        let origin = self.origin(&domain)?;
        let endpoint = |path: &str| {
            // only paths on the authority's own origin
            if !path.starts_with('/') || path.starts_with("//") {
                return None;
            }
            origin.join(path).ok()
        };
        let malformed = || ResolveError::Document {
            domain: domain.clone(),
            error: DocumentError::MalformedDocument,
        };

        let authentication = endpoint(&support.authentication).ok_or_else(malformed)?;
        let provisioning = endpoint(&support.provisioning).ok_or_else(malformed)?;
        Ok(ResolvedAuthority {
            domain,
            public_key: support.public_key,
            authentication,
            provisioning,
        })
    }
}
