use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use browserid_authority::KeyPair;
use browserid_types::PublicKey;
use serde_json::{json, Value};
use url::Url;

use crate::{FetchError, Fetcher, SupportResponse};

/// How a domain answers in a [`TestFetcher`].
#[derive(Debug, Clone)]
pub(crate) enum Answer {
    Document(Value),
    Raw(&'static [u8]),
    Absent,
    Unreachable,
    Hang,
}

/// Answers fetches from a table keyed by the host of the requested url. Hosts that are not in the
/// table have no declaration of support.
#[derive(Default)]
pub(crate) struct TestFetcher {
    answers: Mutex<HashMap<String, Answer>>,
    fetches: Mutex<Vec<Url>>,
    latency: Option<Duration>,
}

impl TestFetcher {
    pub(crate) fn with(self, host: &str, answer: Answer) -> Self {
        self.answer(host, answer);
        self
    }

    pub(crate) fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn answer(&self, host: &str, answer: Answer) {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_owned(), answer);
    }

    pub(crate) fn fetches(&self) -> Vec<Url> {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn fetch_count(&self, host: &str) -> usize {
        self.fetches()
            .iter()
            .filter(|url| url.host_str() == Some(host))
            .count()
    }
}

impl Fetcher for TestFetcher {
    async fn fetch_support_document(&self, url: Url) -> Result<SupportResponse, FetchError> {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let host = url.host_str().unwrap_or_default();
        let answer = self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned();
        match answer {
            Some(Answer::Document(document)) => {
                Ok(SupportResponse::Document(document.to_string().into_bytes()))
            }
            Some(Answer::Raw(body)) => Ok(SupportResponse::Document(body.to_vec())),
            Some(Answer::Absent) | None => Ok(SupportResponse::Absent),
            Some(Answer::Unreachable) => Err(FetchError::Network("connection refused".into())),
            Some(Answer::Hang) => std::future::pending().await,
        }
    }
}

pub(crate) fn test_key() -> PublicKey {
    KeyPair::generate().public_key()
}

/// A declaration of direct support signed with `key`.
pub(crate) fn supported(key: &PublicKey) -> Answer {
    Answer::Document(json!({
        "public-key": key,
        "authentication": "/browserid/sign_in.html",
        "provisioning": "/browserid/provision.html",
    }))
}

/// A declaration delegating to `authority`.
pub(crate) fn delegates_to(authority: &str) -> Answer {
    Answer::Document(json!({ "authority": authority }))
}
