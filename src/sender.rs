//! Sends a Webmention or Pingback notification and classifies pingback
//! faults into the permanent/transient taxonomy.

use reqwest::header::CONTENT_TYPE;

use crate::capability::MentionCapabilities;
use crate::net::response::XmlElement;

#[derive(Debug, Clone)]
pub struct MentionCandidate {
    pub mentioner_url: String,
    pub mentioned_url: String,
    pub capabilities: MentionCapabilities,
}

/// A structured fault reported by a pingback target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendMentionError {
    #[error("permanent pingback fault: {0}")]
    Permanent(RemoteError),
    #[error("transient pingback fault: {0}")]
    Transient(RemoteError),
    #[error("request to remote endpoint failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for SendMentionError {
    fn from(err: reqwest::Error) -> Self {
        SendMentionError::Request(err.to_string())
    }
}

/// A fault code that indicates the target is already registered — not an
/// error, reported to the caller as success.
const ALREADY_REGISTERED: i64 = 0x0030;

/// Fault codes the remote pingback spec documents as permanent: the target
/// does not exist, the source does not link to the target, or access is
/// denied.
const PERMANENT_FAULTS: &[i64] = &[0x0011, 0x0020, 0x0021];

const INDETERMINATE_ERROR_CODE: i64 = -1;

/// Sends the mention described by `candidate`, preferring Webmention over
/// Pingback when a target advertises both.
#[tracing::instrument(name = "Send mention", skip(client, candidate), fields(target = %candidate.mentioned_url))]
pub async fn send_mention(
    client: &reqwest::Client,
    candidate: &MentionCandidate,
) -> Result<(), SendMentionError> {
    if let Some(webmention_url) = &candidate.capabilities.webmention_url {
        return send_webmention(client, webmention_url, candidate).await;
    }

    if let Some(pingback_url) = &candidate.capabilities.pingback_url {
        return send_pingback(client, pingback_url, candidate).await;
    }

    Ok(())
}

async fn send_webmention(
    client: &reqwest::Client,
    endpoint: &str,
    candidate: &MentionCandidate,
) -> Result<(), SendMentionError> {
    let response = client
        .post(endpoint)
        .form(&[
            ("source", candidate.mentioner_url.as_str()),
            ("target", candidate.mentioned_url.as_str()),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(SendMentionError::Request(format!(
            "webmention endpoint returned {}",
            response.status()
        )));
    }

    Ok(())
}

async fn send_pingback(
    client: &reqwest::Client,
    endpoint: &str,
    candidate: &MentionCandidate,
) -> Result<(), SendMentionError> {
    let body = pingback_request_body(&candidate.mentioner_url, &candidate.mentioned_url);

    let response = client
        .post(endpoint)
        .header(CONTENT_TYPE, "text/xml; charset=utf-8")
        .body(body)
        .send()
        .await?;

    let text = response
        .text()
        .await
        .map_err(|err| SendMentionError::Request(err.to_string()))?;

    let root = crate::net::response::parse_xml_str(&text);

    if let Some(fault) = find_fault(&root) {
        return classify_fault(fault);
    }

    if let Some(message) = find_success_message(&root) {
        tracing::info!(%message, "pingback accepted");
    }

    Ok(())
}

/// Builds the pretty-printed `pingback.ping` XML-RPC request body, escaping
/// the two URL params.
fn pingback_request_body(mentioner_url: &str, mentioned_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <methodCall>\n  \
         <methodName>pingback.ping</methodName>\n  \
         <params>\n    \
         <param><value><string>{}</string></value></param>\n    \
         <param><value><string>{}</string></value></param>\n  \
         </params>\n\
         </methodCall>",
        xml_escape(mentioner_url),
        xml_escape(mentioned_url),
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn find_fault(root: &XmlElement) -> Option<&XmlElement> {
    root.child("methodResponse")
        .and_then(|r| r.child("fault"))
        .and_then(|f| f.child("value"))
        .and_then(|v| v.child("struct"))
}

fn find_success_message(root: &XmlElement) -> Option<&str> {
    let string = root
        .child("methodResponse")?
        .child("params")?
        .child("param")?
        .child("value")?
        .child("string")?;
    Some(string.text.as_str())
}

fn classify_fault(fault_struct: &XmlElement) -> Result<(), SendMentionError> {
    let members: Vec<&XmlElement> = fault_struct.children_named("member").collect();

    let code = members
        .iter()
        .find(|m| m.child("name").map(|n| n.text.as_str()) == Some("faultCode"))
        .and_then(|m| m.child("value"))
        .and_then(|v| v.child("int").or_else(|| v.child("i4")))
        .and_then(|v| v.text.trim().parse::<i64>().ok());

    let message = members
        .iter()
        .find(|m| m.child("name").map(|n| n.text.as_str()) == Some("faultString"))
        .and_then(|m| m.child("value"))
        .and_then(|v| v.child("string"))
        .map(|v| v.text.clone());

    let (code, message) = match (code, message) {
        (Some(code), Some(message)) => (code, message),
        _ => (INDETERMINATE_ERROR_CODE, "malformed fault response".to_string()),
    };

    if code == ALREADY_REGISTERED {
        return Ok(());
    }

    let remote_error = RemoteError { code, message };

    if PERMANENT_FAULTS.contains(&code) {
        Err(SendMentionError::Permanent(remote_error))
    } else {
        Err(SendMentionError::Transient(remote_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::response::parse_xml_str;

    #[test]
    fn request_body_contains_both_urls_in_order() {
        let body = pingback_request_body(
            "https://sender.potato",
            "https://destination.potato",
        );

        let sender_pos = body.find("https://sender.potato").unwrap();
        let destination_pos = body.find("https://destination.potato").unwrap();
        assert!(sender_pos < destination_pos);
        assert!(body.contains("<methodName>pingback.ping</methodName>"));
    }

    #[test]
    fn permanent_fault_is_classified_as_permanent() {
        let xml = r#"<methodResponse><fault><value><struct>
            <member><name>faultCode</name><value><int>32</int></value></member>
            <member><name>faultString</name><value><string>target does not exist</string></value></member>
        </struct></value></fault></methodResponse>"#;

        let root = parse_xml_str(xml);
        let fault = find_fault(&root).expect("fault present");
        let result = classify_fault(fault);

        assert_eq!(
            result,
            Err(SendMentionError::Permanent(RemoteError {
                code: 32,
                message: "target does not exist".to_string(),
            }))
        );
    }

    #[test]
    fn already_registered_fault_is_suppressed() {
        let xml = r#"<methodResponse><fault><value><struct>
            <member><name>faultCode</name><value><int>48</int></value></member>
            <member><name>faultString</name><value><string>already registered</string></value></member>
        </struct></value></fault></methodResponse>"#;

        let root = parse_xml_str(xml);
        let fault = find_fault(&root).expect("fault present");
        assert_eq!(classify_fault(fault), Ok(()));
    }

    #[test]
    fn malformed_fault_is_indeterminate_transient() {
        let xml = r#"<methodResponse><fault><value><struct>
            <member><name>faultCode</name><value><string>not-a-number</string></value></member>
        </struct></value></fault></methodResponse>"#;

        let root = parse_xml_str(xml);
        let fault = find_fault(&root).expect("fault present");
        let result = classify_fault(fault);

        assert_eq!(
            result,
            Err(SendMentionError::Transient(RemoteError {
                code: -1,
                message: "malformed fault response".to_string(),
            }))
        );
    }

    #[test]
    fn success_body_has_no_fault() {
        let xml = r#"<?xml version="1.0"?><methodResponse><params><param><value>
          <string>Pingback from A to B registered.</string>
        </value></param></params></methodResponse>"#;

        let root = parse_xml_str(xml);
        assert!(find_fault(&root).is_none());
        assert_eq!(
            find_success_message(&root),
            Some("Pingback from A to B registered.")
        );
    }
}
