use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use browserid_types::{split_email, AddressInfo, AddressType};
use tokio::time::Instant;

use crate::{DelegationResolver, Fetcher, Resolution, ResolveError};


/// Errors produced while classifying an email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressInfoError {
    /// The address is not of the form `local@domain`, or its domain is not valid.
    InvalidEmail,
    /// The authority of the domain could not be determined.
    Resolve(ResolveError),
}

impl fmt::Display for AddressInfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressInfoError::InvalidEmail => f.write_str("invalid email address"),
            AddressInfoError::Resolve(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for AddressInfoError {}

impl From<ResolveError> for AddressInfoError {
    fn from(error: ResolveError) -> Self {
        AddressInfoError::Resolve(error)
    }
}

struct CacheEntry {
    info: AddressInfo,
    stored: Instant,
}

#[derive(Default)]
struct Cache {
    entries: HashMap<String, CacheEntry>,
    /// Survives invalidation, so an address that goes offline keeps the type it had.
    last_type: HashMap<String, AddressType>,
}

/// Classifies email addresses as primary or secondary, caching the answers.
///
/// One service is meant to be owned by one session. The cache is guarded by a mutex that is
/// never held across an await, so the service can also be shared between concurrent requests.
pub struct AddressInfoService<F> {
    resolver: DelegationResolver<F>,
    cache: Mutex<Cache>,
}

impl<F: Fetcher> AddressInfoService<F> {
    /// Create a service classifying addresses with `resolver`.
    pub fn new(resolver: DelegationResolver<F>) -> Self {
        Self {
            resolver,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// The resolver behind this service.
    pub fn resolver(&self) -> &DelegationResolver<F> {
        &self.resolver
    }

    /// Classify `email`.
    ///
    /// An unreachable authority is reported as [`AddressState::Offline`](browserid_types::AddressState::Offline)
    /// with the last known type of the address, or primary when there is none. Both known and
    /// offline answers are cached until they expire or are invalidated. Other resolution errors
    /// are returned and not cached.
    pub async fn address_info(&self, email: &str) -> Result<AddressInfo, AddressInfoError> {
        let email = self.normalize_email(email)?;
        if let Some(info) = self.cached(&email) {
            log::debug!("serving cached address info for {email}");
            return Ok(info);
        }

        let domain = email
            .split_once('@')
            .map(|(_, domain)| domain)
            .ok_or(AddressInfoError::InvalidEmail)?;
        let info = match self.resolver.resolve(domain).await {
            Ok(Resolution::Authority(authority)) => {
                AddressInfo::primary(email, authority.domain.clone(), authority.into())
            }
            Ok(Resolution::NotSupported) => {
                AddressInfo::secondary(email, self.resolver.config().secondary_authority.clone())
            }
            Err(ResolveError::AuthorityUnreachable(idp_domain)) => {
                let ty = self.last_type(&email).unwrap_or(AddressType::Primary);
                AddressInfo::offline(email, ty, idp_domain)
            }
            Err(error) => return Err(error.into()),
        };

        self.store(&info);
        Ok(info)
    }

    /// Forget the cached classification of `email`, the next lookup resolves it again.
    pub fn invalidate(&self, email: &str) {
        if let Ok(email) = self.normalize_email(email) {
            self.lock().entries.remove(&email);
        }
    }

    /// Forget every cached classification.
    pub fn invalidate_all(&self) {
        self.lock().entries.clear();
    }

    /// Lower case and punycode the domain of `email`, the local part is kept as is.
    fn normalize_email(&self, email: &str) -> Result<String, AddressInfoError> {
        let (local, domain) = split_email(email.trim()).ok_or(AddressInfoError::InvalidEmail)?;
        let domain = self
            .resolver
            .normalize_domain(domain)
            .map_err(|_| AddressInfoError::InvalidEmail)?;
        Ok(format!("{local}@{domain}"))
    }

    fn cached(&self, email: &str) -> Option<AddressInfo> {
        let ttl = self.resolver.config().cache_ttl;
        let mut cache = self.lock();
        match cache.entries.get(email) {
            Some(entry) if entry.stored.elapsed() <= ttl => Some(entry.info.clone()),
            Some(_) => {
                cache.entries.remove(email);
                None
            }
            None => None,
        }
    }

    fn last_type(&self, email: &str) -> Option<AddressType> {
        self.lock().last_type.get(email).copied()
    }

    fn store(&self, info: &AddressInfo) {
        let mut cache = self.lock();
        cache.last_type.insert(info.email.clone(), info.ty);
        cache.entries.insert(
            info.email.clone(),
            CacheEntry {
                info: info.clone(),
                stored: Instant::now(),
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
