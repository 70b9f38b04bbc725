use reqwest::{header::ACCEPT, Client};
use url::Url;

use super::{FetchError, Fetcher, SupportResponse};

impl Fetcher for Client {
    async fn fetch_support_document(&self, url: Url) -> Result<SupportResponse, FetchError> {
        let response = self
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Network(error.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Ok(SupportResponse::Absent);
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!("unexpected status {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| FetchError::Network(error.to_string()))?;
        Ok(SupportResponse::Document(body.to_vec()))
    }
}
