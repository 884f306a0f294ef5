//! Webmention/Pingback capability detection: given an article URL, resolve
//! whichever notification endpoints it advertises.

use select::predicate::{Attr, Name, Or, Predicate};
use url::Url;

use crate::net::{self, FetchError, HttpResponse};

const WEBMENTION_REL: &str = "webmention";
const PINGBACK_REL: &str = "pingback";
const PINGBACK_HEADER: &str = "X-Pingback";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionCapabilities {
    pub webmention_url: Option<String>,
    pub pingback_url: Option<String>,
}

impl MentionCapabilities {
    pub fn is_empty(&self) -> bool {
        self.webmention_url.is_none() && self.pingback_url.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// GETs `url` and resolves its Webmention and/or Pingback endpoints. Any IO
/// error or non-2xx response yields `Ok(None)` — a failed probe is not an
/// error, it's an absent capability.
#[tracing::instrument(name = "Check mention capabilities", skip(client))]
pub async fn fetch_page_check_mention_capabilities(
    client: &reqwest::Client,
    url: &Url,
) -> Result<Option<MentionCapabilities>, CapabilityError> {
    let response = match net::fetch(client, url).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%err, %url, "failed to fetch page for capability detection");
            return Ok(None);
        }
    };

    if !response.status().is_success() {
        return Ok(None);
    }

    let capabilities = MentionCapabilities {
        webmention_url: find_webmention_endpoint(&response),
        pingback_url: find_pingback_endpoint(&response),
    };

    if capabilities.is_empty() {
        return Ok(None);
    }

    Ok(Some(capabilities))
}

fn find_webmention_endpoint(response: &HttpResponse) -> Option<String> {
    let links = response.links();

    // Exact rel match first.
    if let Some(entry) = links.iter().find(|l| l.rel == WEBMENTION_REL) {
        return response.resolve_url(&entry.url).map(|u| u.to_string());
    }

    // Then a rel that merely contains "webmention" as one whitespace-separated
    // token (the header technically allows multiple space-separated rel
    // values, a compliance quirk a naive strict-equality parser would miss).
    if let Some(entry) = links
        .iter()
        .find(|l| l.rel.split_whitespace().any(|tok| tok == WEBMENTION_REL))
    {
        return response.resolve_url(&entry.url).map(|u| u.to_string());
    }

    // Fall back to the HTML body: the first <link> or <a rel="webmention">.
    let document = response.parsed_html();
    let predicate = Or(
        Name("link").and(Attr("rel", WEBMENTION_REL)),
        Name("a").and(Attr("rel", WEBMENTION_REL)),
    );

    for node in document.find(predicate) {
        if let Some(href) = node.attr("href") {
            return response.resolve_url(href).map(|u| u.to_string());
        }
    }

    None
}

fn find_pingback_endpoint(response: &HttpResponse) -> Option<String> {
    if let Some(value) = response.headers().get(PINGBACK_HEADER) {
        if let Ok(value) = value.to_str() {
            return Some(value.to_string());
        }
    }

    let document = response.parsed_html();
    for node in document.find(Name("link").and(Attr("rel", PINGBACK_REL))) {
        // Returned un-absolutised: callers needing an absolute pingback
        // endpoint must resolve it themselves.
        if let Some(href) = node.attr("href") {
            return Some(href.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::HttpResponse;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    async fn response_from(
        url: &str,
        headers: HeaderMap,
        body: &str,
    ) -> HttpResponse {
        let server = wiremock::MockServer::start().await;
        use wiremock::matchers::any;
        use wiremock::{Mock, ResponseTemplate};

        let mut template = ResponseTemplate::new(200).set_body_string(body);
        for (name, value) in headers.iter() {
            template = template.append_header(name.as_str(), value.to_str().unwrap());
        }

        Mock::given(any())
            .respond_with(template)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let full_url = format!("{}{}", server.uri(), url);
        let response = client.get(&full_url).send().await.unwrap();
        HttpResponse::from_reqwest(response).await.unwrap()
    }

    #[tokio::test]
    async fn webmention_header_wins_over_html_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("link"),
            HeaderValue::from_static(r#"<https://wm.example/endpoint>; rel="webmention""#),
        );

        let response = response_from(
            "/post",
            headers,
            r#"<html><link rel="webmention" href="/other-endpoint"></html>"#,
        )
        .await;

        assert_eq!(
            find_webmention_endpoint(&response),
            Some("https://wm.example/endpoint".to_string())
        );
    }

    #[tokio::test]
    async fn webmention_via_html_relative_link_resolves_against_final_url() {
        let response = response_from(
            "/post",
            HeaderMap::new(),
            r#"<html><link rel="webmention" href="/wm"></html>"#,
        )
        .await;

        let endpoint = find_webmention_endpoint(&response).expect("endpoint found");
        assert!(endpoint.ends_with("/wm"));
    }

    #[tokio::test]
    async fn pingback_via_x_pingback_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-pingback"),
            HeaderValue::from_static("https://pb.example/xmlrpc.php"),
        );

        let response = response_from("/post", headers, "<html></html>").await;

        assert_eq!(
            find_pingback_endpoint(&response),
            Some("https://pb.example/xmlrpc.php".to_string())
        );
    }
}
