//! Article link extraction: from an article's body, the outbound absolute
//! cross-origin links worth checking for mention capabilities.

use select::document::Document;
use select::node::Node;
use select::predicate::{Attr, Name, Predicate};
use url::Url;

use crate::net::{self, FetchError, HttpResponse};

#[derive(Debug, thiserror::Error)]
pub enum ArticleLinkError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Fetches `absolute_url` (with the SSRF guard relaxed, since a
/// user-submitted article may live on a non-global host during local
/// development) and yields every outbound absolute link found in its body.
#[tracing::instrument(name = "Parse page for links", skip(client))]
pub async fn parse_page_find_links(
    client: &reqwest::Client,
    absolute_url: &Url,
) -> Result<Vec<Url>, ArticleLinkError> {
    let response = net::with_non_global_allowed(net::fetch(client, absolute_url)).await?;

    Ok(extract_links(&response))
}

fn extract_links(response: &HttpResponse) -> Vec<Url> {
    let document = response.parsed_html();
    let source_host = response.url().host_str().map(str::to_owned);

    let Some(body) = find_article_body(document) else {
        return vec![];
    };

    let mut links = Vec::new();
    for anchor in body.find(Name("a")) {
        let Some(href) = anchor.attr("href") else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let Some(resolved) = response.resolve_url(href) else {
            continue;
        };

        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }

        if resolved.host_str().map(str::to_owned) == source_host {
            continue;
        }

        links.push(resolved);
    }

    links
}

/// Locates the article body: prefers the single
/// `itemtype="https://schema.org/Article"` element's `itemprop="articleBody"`
/// descendant; falls back to the sole `<article>` element. Anything other
/// than exactly one match yields no body.
fn find_article_body(document: &Document) -> Option<Node<'_>> {
    let schema_articles: Vec<_> = document
        .find(Attr("itemtype", "https://schema.org/Article"))
        .collect();

    if schema_articles.len() == 1 {
        let mut bodies = schema_articles[0].find(Attr("itemprop", "articleBody"));
        let first = bodies.next();
        if first.is_some() && bodies.next().is_none() {
            return first;
        }
    }

    let mut articles = document.find(Name("article"));
    let first = articles.next();
    if first.is_some() && articles.next().is_none() {
        return first;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::any;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn response_with_body(html: &str) -> HttpResponse {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let response = client.get(server.uri()).send().await.unwrap();
        HttpResponse::from_reqwest(response).await.unwrap()
    }

    #[tokio::test]
    async fn extracts_cross_origin_links_from_article_element() {
        let response = response_with_body(
            r#"<html><body><article>
                <a href="https://other.example/post">hi</a>
                <a href="#section">self</a>
                <a href="/local">same host</a>
            </article></body></html>"#,
        )
        .await;

        let links = extract_links(&response);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://other.example/post");
    }

    #[tokio::test]
    async fn yields_nothing_without_a_unique_article_element() {
        let response = response_with_body(
            r#"<html><body>
                <article><a href="https://other.example/a">a</a></article>
                <article><a href="https://other.example/b">b</a></article>
            </body></html>"#,
        )
        .await;

        assert!(extract_links(&response).is_empty());
    }

    #[tokio::test]
    async fn prefers_schema_org_article_body_when_present() {
        let response = response_with_body(
            r#"<html><body>
                <div itemtype="https://schema.org/Article">
                    <div itemprop="articleBody">
                        <a href="https://other.example/in-body">in</a>
                    </div>
                    <a href="https://other.example/outside">outside</a>
                </div>
            </body></html>"#,
        )
        .await;

        let links = extract_links(&response);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://other.example/in-body");
    }
}
