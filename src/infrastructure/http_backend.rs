//! HTTP adapter for the remote backend.
//!
//! Authorize calls are `GET {base}/transactions/authorize.xml` with the
//! identity and the expected usage in the query string. Reports are posted
//! as form bodies to the payload's endpoint.
//!
//! Status mapping for authorize:
//! - `200` authorized
//! - `403`, `404`, `409` denied, with the `<reason>` element as the reason
//! - anything else is a protocol error

use crate::application::ports::{AuthorizeRequest, RemoteBackend};
use crate::domain::decision::BackendVerdict;
use crate::domain::error::TransportError;
use crate::domain::report::{
    BatchPayload, ServiceAuthParam, APP_ID, APP_KEY, SERVICE_ID, USAGE, USER_ID, USER_KEY,
};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use url::form_urlencoded;

const AUTHORIZE_PATH: &str = "/transactions/authorize.xml";

/// `RemoteBackend` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    auth_param: ServiceAuthParam,
    timeout: Duration,
}

impl HttpBackend {
    /// Create an adapter for the backend at `base_url`.
    ///
    /// `timeout` bounds each request at the transport level.
    pub fn new(base_url: impl Into<String>, auth_param: ServiceAuthParam, timeout: Duration) -> Self {
        Self::with_client(Client::new(), base_url, auth_param, timeout)
    }

    /// Use a preconfigured client, e.g. with custom TLS settings.
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        auth_param: ServiceAuthParam,
        timeout: Duration,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_param,
            timeout,
        }
    }

    fn authorize_url(&self, request: &AuthorizeRequest) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair(SERVICE_ID, &request.service_id);
        query.append_pair(self.auth_param.as_str(), &request.service_token);

        let identity = &request.identity;
        let fields = [
            (USER_KEY, &identity.user_key),
            (APP_ID, &identity.app_id),
            (APP_KEY, &identity.app_key),
            (USER_ID, &identity.user_id),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                query.append_pair(name, value);
            }
        }
        for (metric, delta) in request.usage.iter() {
            query.append_pair(&format!("{USAGE}[{metric}]"), &delta.to_string());
        }

        format!("{}{}?{}", self.base_url, AUTHORIZE_PATH, query.finish())
    }

    fn transport_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Unreachable(error.to_string())
        }
    }
}

/// Extract the text of the `<reason>` element of an XML response.
fn parse_reason(body: &str) -> Option<String> {
    let start = body.find("<reason>")? + "<reason>".len();
    let end = body[start..].find("</reason>")? + start;
    let reason = decode_entities(body[start..end].trim());
    (!reason.is_empty()).then_some(reason)
}

/// Replace the predefined XML entities and numeric character references.
///
/// Unknown or malformed references are kept as written.
fn decode_entities(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let resolved = rest.find(';').and_then(|semi| {
            let ch = match &rest[1..semi] {
                "amp" => '&',
                "lt" => '<',
                "gt" => '>',
                "quot" => '"',
                "apos" => '\'',
                entity => {
                    let code = match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                        None => entity.strip_prefix('#')?.parse().ok()?,
                    };
                    char::from_u32(code)?
                }
            };
            Some((ch, semi))
        });
        match resolved {
            Some((ch, semi)) => {
                decoded.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<BackendVerdict, TransportError> {
        let response = self
            .client
            .get(self.authorize_url(request))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        match status {
            StatusCode::OK => Ok(BackendVerdict::authorized()),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                let body = response.text().await.unwrap_or_default();
                let reason = parse_reason(&body).unwrap_or_else(|| status.to_string());
                Ok(BackendVerdict::denied(reason))
            }
            other => {
                tracing::warn!(status = other.as_u16(), "unexpected authorize status");
                Err(TransportError::Protocol(format!("authorize returned {other}")))
            }
        }
    }

    async fn report(&self, payload: &BatchPayload) -> Result<(), TransportError> {
        let response = self
            .client
            .post(payload.endpoint())
            .header(header::CONTENT_TYPE, payload.content_type())
            .body(payload.body().to_string())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            let detail = parse_reason(&body).unwrap_or_else(|| status.to_string());
            Err(TransportError::Protocol(format!("report rejected: {detail}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credentials::Identity;
    use crate::domain::usage::MetricDeltaMap;

    #[test]
    fn test_parse_reason() {
        let body = r#"<?xml version="1.0"?><status><authorized>false</authorized><reason>usage limits are exceeded</reason></status>"#;
        assert_eq!(parse_reason(body).as_deref(), Some("usage limits are exceeded"));
        assert_eq!(parse_reason("<status/>"), None);
        assert_eq!(parse_reason("<reason> </reason>"), None);
    }

    #[test]
    fn test_parse_reason_decodes_entities() {
        let body = "<status><reason>application key &quot;k&amp;1&quot; is &lt;invalid&gt;</reason></status>";
        assert_eq!(
            parse_reason(body).as_deref(),
            Some(r#"application key "k&1" is <invalid>"#)
        );
        assert_eq!(decode_entities("it&apos;s &#65;&#x42;"), "it's AB");
        assert_eq!(decode_entities("a & b &bogus; &#xZZ;"), "a & b &bogus; &#xZZ;");
    }

    #[test]
    fn test_authorize_url() {
        let backend = HttpBackend::new(
            "https://backend.example/",
            ServiceAuthParam::ServiceToken,
            Duration::from_secs(1),
        );
        let usage: MetricDeltaMap = [("hits", 2)].into_iter().collect();
        let request = AuthorizeRequest {
            api_id: "api".to_string(),
            service_id: "42".to_string(),
            service_token: "tok".to_string(),
            identity: Identity::user_key("abc"),
            usage,
        };

        let url = backend.authorize_url(&request);
        assert_eq!(
            url,
            "https://backend.example/transactions/authorize.xml?service_id=42&service_token=tok&user_key=abc&usage%5Bhits%5D=2"
        );
    }
}
