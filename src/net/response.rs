//! Wraps a completed HTTP response, memoising its lazily-parsed HTML/XML
//! views and resolving relative URLs against the response's *final* URL
//! (i.e. after following redirects), not the URL that was originally
//! requested.

use once_cell::sync::OnceCell;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use select::document::Document;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// One entry from a parsed HTTP `Link` header.
#[derive(Debug, Clone)]
pub struct LinkEntry {
    pub url: String,
    /// The raw `rel` attribute value, possibly space-separated per RFC 8288.
    pub rel: String,
}

/// A minimal, lenient XML element tree. Good enough to walk for the small
/// set of XML-RPC response shapes this system cares about; not a
/// conformance-checking parser.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parses an XML string leniently into an [`XmlElement`] tree. Exposed
/// standalone (not only via [`HttpResponse::parsed_xml`]) for callers that
/// parse a POST response body rather than a fetched [`HttpResponse`].
pub fn parse_xml_str(text: &str) -> XmlElement {
    parse_lenient_xml(text.as_bytes())
}

fn parse_lenient_xml(bytes: &[u8]) -> XmlElement {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut root = XmlElement {
        name: "#document".to_string(),
        ..Default::default()
    };
    let mut stack: Vec<XmlElement> = vec![];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let attrs = e
                    .attributes()
                    .filter_map(|a| a.ok())
                    .map(|a| {
                        let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
                        let value = a.unescape_value().unwrap_or_default().to_string();
                        (key, value)
                    })
                    .collect();
                stack.push(XmlElement {
                    name,
                    attrs,
                    text: String::new(),
                    children: vec![],
                });
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let attrs = e
                    .attributes()
                    .filter_map(|a| a.ok())
                    .map(|a| {
                        let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
                        let value = a.unescape_value().unwrap_or_default().to_string();
                        (key, value)
                    })
                    .collect();
                let leaf = XmlElement {
                    name,
                    attrs,
                    text: String::new(),
                    children: vec![],
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(leaf),
                    None => root.children.push(leaf),
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(_)) => {
                if let Some(finished) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(finished),
                        None => root.children.push(finished),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    root
}

/// Parses an HTTP `Link` header value into its entries, per RFC 8288's
/// `<url>; rel="value"; ...` shape.
pub fn parse_link_header(value: &str) -> Vec<LinkEntry> {
    let mut entries = Vec::new();

    for part in value.split(',') {
        let part = part.trim();
        let Some(url_end) = part.find('>') else {
            continue;
        };
        let Some(url) = part.strip_prefix('<').map(|s| &s[..url_end - 1]) else {
            continue;
        };

        let mut rel = String::new();
        for param in part[url_end + 1..].split(';') {
            let param = param.trim();
            if let Some(raw) = param.strip_prefix("rel=") {
                rel = raw.trim_matches('"').to_string();
            }
        }

        entries.push(LinkEntry {
            url: url.to_string(),
            rel,
        });
    }

    entries
}

pub struct HttpResponse {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: bytes::Bytes,
    parsed_html: OnceCell<Document>,
    parsed_xml: OnceCell<XmlElement>,
}

impl HttpResponse {
    pub async fn from_reqwest(response: reqwest::Response) -> Result<Self, ResponseError> {
        let url = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Self {
            url,
            status,
            headers,
            body,
            parsed_html: OnceCell::new(),
            parsed_xml: OnceCell::new(),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The final URL after following redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &bytes::Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// All `Link` response header entries, parsed.
    pub fn links(&self) -> Vec<LinkEntry> {
        self.headers
            .get_all(reqwest::header::LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_link_header)
            .collect()
    }

    pub fn parsed_html(&self) -> &Document {
        self.parsed_html
            .get_or_init(|| Document::from(self.text().as_str()))
    }

    pub fn parsed_xml(&self) -> &XmlElement {
        self.parsed_xml.get_or_init(|| parse_lenient_xml(&self.body))
    }

    /// Resolves `rel` against this response's final URL.
    pub fn resolve_url(&self, rel: &str) -> Option<Url> {
        self.url.join(rel).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_link_header() {
        let entries = parse_link_header(r#"<https://wm.example/endpoint>; rel="webmention""#);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://wm.example/endpoint");
        assert_eq!(entries[0].rel, "webmention");
    }

    #[test]
    fn parses_multiple_link_header_entries() {
        let entries = parse_link_header(
            r#"<https://a.example/>; rel="self", <https://b.example/>; rel="webmention alternate""#,
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].rel, "webmention alternate");
    }

    #[test]
    fn parses_lenient_xml_tree() {
        let xml = b"<methodResponse><params><param><value><string>ok</string></value></param></params></methodResponse>";
        let root = parse_lenient_xml(xml);
        let method_response = root.child("methodResponse").expect("methodResponse");
        let params = method_response.child("params").expect("params");
        let param = params.child("param").expect("param");
        let value = param.child("value").expect("value");
        let string = value.child("string").expect("string");
        assert_eq!(string.text, "ok");
    }
}
