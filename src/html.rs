use crate::net::{self, FetchError};
use select::document::Document;
use select::predicate::Name;
use url::Url;

/// Fetches the document at `url` using `client` and parses it leniently.
#[tracing::instrument(name = "Fetch document", skip(client))]
pub async fn fetch_document(client: &reqwest::Client, url: &Url) -> Result<Document, FetchError> {
    let bytes = net::fetch_bytes(client, url).await?;
    Ok(Document::from_read(&bytes[..])?)
}

/// Criteria when finding a link in a document
pub enum FindLinkCriteria<'a> {
    /// Single rel attribute value to find
    Rel(&'a str),
    /// Any type attribute to find
    AnyType(&'a [&'a str]),
}

/// Find the first link in a [`select::document::Document`] matching a [`FindLinkCriteria`].
pub fn find_link_in_document(
    url: &Url,
    document: &Document,
    criteria: FindLinkCriteria<'_>,
) -> Option<Url> {
    for link in document.find(Name("link")) {
        let link_href = link.attr("href").unwrap_or_default();

        // The href might be absolute
        let url = if !link_href.starts_with("http") {
            url.join(link_href)
        } else {
            Url::parse(link_href)
        };

        if let Ok(url) = url {
            match criteria {
                FindLinkCriteria::Rel(rel) => {
                    let link_rel = link.attr("rel").unwrap_or_default();
                    if link_rel == rel {
                        return Some(url);
                    }
                }
                FindLinkCriteria::AnyType(types) => {
                    let link_type = link.attr("type").unwrap_or_default();
                    for typ in types {
                        if link_type == *typ {
                            return Some(url);
                        }
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_link_in_document_with_rel() {
        let url = Url::parse("https://example.com").unwrap();
        let document = Document::from(
            r#"
            <html>
            <head>
            <link rel="foobar" href="/hello">
            </head>
            </html>
        "#,
        );

        let link = find_link_in_document(&url, &document, FindLinkCriteria::Rel("foobar"));
        assert!(link.is_some());
        assert_eq!("https://example.com/hello", link.unwrap().to_string())
    }

    #[test]
    fn find_link_in_document_with_type() {
        let url = Url::parse("https://example.com").unwrap();
        let document = Document::from(
            r#"
            <html>
            <head>
            <link href="/yesterday" type="foo">
            </head>
            </html>
        "#,
        );

        let link = find_link_in_document(&url, &document, FindLinkCriteria::AnyType(&["foo"]));
        assert!(link.is_some());
        assert_eq!("https://example.com/yesterday", link.unwrap().to_string())
    }
}
