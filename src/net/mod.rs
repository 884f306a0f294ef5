//! The network boundary: a single [`reqwest::Client`] dialed through the
//! SSRF-guarded resolver, plus the response wrapper every fetching
//! component builds on.

pub mod response;
pub mod ssrf;

pub use response::{HttpResponse, LinkEntry, XmlElement};
pub use ssrf::with_non_global_allowed;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Response(#[from] response::ResponseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Builds the shared HTTP client used by every outbound fetch in the
/// system. All DNS resolution for this client funnels through
/// [`ssrf::GlobalOnlyResolver`].
pub fn build_client(
    user_agent: &str,
    timeout: Duration,
    max_redirects: usize,
) -> Result<reqwest::Client, reqwest::Error> {
    let resolver = ssrf::GlobalOnlyResolver::from_system_config()
        .expect("failed to initialize the DNS resolver");

    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(max_redirects))
        .dns_resolver(Arc::new(resolver))
        .build()
}

/// GETs `url` and wraps the result.
#[tracing::instrument(name = "Fetch URL", skip(client))]
pub async fn fetch(client: &reqwest::Client, url: &Url) -> Result<HttpResponse, FetchError> {
    let response = client.get(url.clone()).send().await?;
    let wrapped = HttpResponse::from_reqwest(response).await?;
    Ok(wrapped)
}

/// GETs `url` and returns the raw body bytes, preserving content-encoding
/// (feed parsers need the bytes, not a lossily-decoded string).
#[tracing::instrument(name = "Fetch bytes", skip(client))]
pub async fn fetch_bytes(client: &reqwest::Client, url: &Url) -> Result<bytes::Bytes, FetchError> {
    let response = client.get(url.clone()).send().await?;
    let response = response.error_for_status()?;
    Ok(response.bytes().await?)
}
