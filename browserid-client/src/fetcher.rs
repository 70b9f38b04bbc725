use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::OnceCell;
use url::Url;

#[cfg(feature = "reqwest")]
mod reqwest_fetcher;

/// A trait to implement fetching declarations of support.
///
/// The implementer should take the following into consideration:
/// * Ensure a proper user agent is set
/// * Only follow HTTPS links and redirects, unless the url itself is a local shim
/// * Limit the number of redirects
/// * Set the `Accept` header to `application/json`
///
/// Timeouts are enforced by the caller, a fetcher does not need to apply its own.
#[expect(async_fn_in_trait)]
pub trait Fetcher {
    /// Fetch the declaration of support at `url`.
    ///
    /// The URL provided here already points to the `/.well-known/browserid` path of a domain,
    /// the fetcher should use the url parameter without modifications.
    async fn fetch_support_document(&self, url: Url) -> Result<SupportResponse, FetchError>;
}

/// The outcome of a fetch that reached the domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportResponse {
    /// The body of a successful response.
    Document(Vec<u8>),
    /// The domain answered that it has no declaration of support, for example with a 404.
    Absent,
}

/// The domain could not be asked for its declaration of support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request did not complete in time.
    Timeout,
    /// The connection failed, or the server answered with an error of its own.
    Network(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Timeout => f.write_str("timed out"),
            FetchError::Network(reason) => write!(f, "network error: {reason}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Without a network every domain is without support.
impl Fetcher for () {
    async fn fetch_support_document(&self, _url: Url) -> Result<SupportResponse, FetchError> {
        Ok(SupportResponse::Absent)
    }
}

impl<F: Fetcher> Fetcher for Arc<F> {
    async fn fetch_support_document(&self, url: Url) -> Result<SupportResponse, FetchError> {
        F::fetch_support_document(self, url).await
    }
}

type InFlight = Arc<OnceCell<Result<SupportResponse, FetchError>>>;

/// Wraps a [`Fetcher`] so that concurrent fetches of the same document share one request.
///
/// A request is only shared while it is in flight, once it completes the next fetch of the same
/// url goes to the network again.
pub struct Deduplicated<F> {
    inner: F,
    in_flight: Mutex<HashMap<Url, InFlight>>,
}

impl<F> Deduplicated<F> {
    /// Deduplicate the fetches of `inner`.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped fetcher.
    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: Fetcher> Fetcher for Deduplicated<F> {
    async fn fetch_support_document(&self, url: Url) -> Result<SupportResponse, FetchError> {
        let cell = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.clone())
            .or_default()
            .clone();

        let response = cell
            .get_or_init(|| self.inner.fetch_support_document(url.clone()))
            .await
            .clone();

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(&url)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(&url);
        }
        response
    }
}
