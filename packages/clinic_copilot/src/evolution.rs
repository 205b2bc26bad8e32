//! HTTP client for the Evolution API WhatsApp gateway.
//!
//! One base URL and API key per deployment, injected at construction. Every
//! call goes through `request()`, which folds transport failures and non-2xx
//! answers into [`GatewayError`] so callers see a single recoverable error
//! shape. Response bodies are parsed leniently: the gateway's JSON drifts
//! between versions and a missing field must not take the pipeline down.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;

/// Events the gateway must deliver to our webhook.
pub const WEBHOOK_EVENTS: &[&str] = &["QRCODE_UPDATED", "CONNECTION_UPDATE", "MESSAGES_UPSERT"];

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("gateway response missing {0}")]
    MissingField(&'static str),
}

/// What the connect call handed back for completing the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectArtifact {
    PairingCode(String),
    QrCode(String),
    AlreadyConnected,
}

pub struct EvolutionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EvolutionClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request(&self, req: reqwest::RequestBuilder) -> Result<Value, GatewayError> {
        let response = req.header("apikey", &self.api_key).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::Status { status, body });
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
    }

    /// Create the session on the gateway. An "already exists" answer counts
    /// as success so re-provisioning the same tenant stays idempotent.
    pub async fn create_instance(&self, name: &str, want_qr: bool) -> Result<(), GatewayError> {
        let payload = json!({
            "instanceName": name,
            "qrcode": want_qr,
            "integration": "WHATSAPP-BAILEYS",
        });
        match self
            .request(self.http.post(self.url("/instance/create")).json(&payload))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => {
                debug!(instance = name, "instance already exists on gateway");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Point the gateway's event delivery at our webhook endpoint.
    pub async fn set_webhook(&self, name: &str, webhook_url: &str) -> Result<(), GatewayError> {
        let payload = json!({
            "webhook": {
                "enabled": true,
                "url": webhook_url,
                "byEvents": false,
                "base64": true,
                "events": WEBHOOK_EVENTS,
            }
        });
        self.request(
            self.http
                .post(self.url(&format!("/webhook/set/{name}")))
                .json(&payload),
        )
        .await
        .map(|_| ())
    }

    /// Session behavior: groups are dropped at the gateway and voice calls
    /// rejected, so the pipeline only ever sees direct chats.
    pub async fn set_settings(&self, name: &str) -> Result<(), GatewayError> {
        let payload = json!({
            "rejectCall": true,
            "msgCall": "",
            "groupsIgnore": true,
            "alwaysOnline": false,
            "readMessages": false,
            "readStatus": false,
        });
        self.request(
            self.http
                .post(self.url(&format!("/settings/set/{name}")))
                .json(&payload),
        )
        .await
        .map(|_| ())
    }

    /// Raw gateway connection state ("open", "connecting", "close", ...).
    pub async fn connection_state(&self, name: &str) -> Result<String, GatewayError> {
        let body = self
            .request(
                self.http
                    .get(self.url(&format!("/instance/connectionState/{name}"))),
            )
            .await?;
        Ok(extract_state(&body).unwrap_or_default())
    }

    /// Start the pairing handshake. With a phone number the gateway issues a
    /// pairing code; without one it issues a QR image.
    pub async fn connect(
        &self,
        name: &str,
        phone: Option<&str>,
    ) -> Result<ConnectArtifact, GatewayError> {
        let mut req = self.http.get(self.url(&format!("/instance/connect/{name}")));
        if let Some(number) = phone {
            req = req.query(&[("number", number)]);
        }
        let body = self.request(req).await?;
        parse_connect_response(&body, phone.is_some())
    }

    pub async fn send_text(
        &self,
        name: &str,
        number: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        let payload = json!({
            "number": number,
            "options": {
                "delay": 1200,
                "presence": "composing",
                "linkPreview": false,
            },
            "textMessage": { "text": text },
        });
        self.request(
            self.http
                .post(self.url(&format!("/message/sendText/{name}")))
                .json(&payload),
        )
        .await
        .map(|_| ())
    }

    pub async fn logout(&self, name: &str) -> Result<(), GatewayError> {
        self.request(
            self.http
                .delete(self.url(&format!("/instance/logout/{name}"))),
        )
        .await
        .map(|_| ())
    }
}

fn is_already_exists(err: &GatewayError) -> bool {
    match err {
        GatewayError::Status { body, .. } => {
            let lower = body.to_lowercase();
            lower.contains("already") && (lower.contains("exist") || lower.contains("use"))
        }
        _ => false,
    }
}

fn extract_state(body: &Value) -> Option<String> {
    body.get("instance")
        .and_then(|i| i.get("state"))
        .or_else(|| body.get("state"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

fn non_empty_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Pick exactly one artifact out of the connect response. Pairing code wins
/// when a phone number was supplied; otherwise the QR image, which newer
/// gateways put at `base64` and older ones under `qrcode.base64`.
fn parse_connect_response(
    body: &Value,
    pairing_preferred: bool,
) -> Result<ConnectArtifact, GatewayError> {
    if extract_state(body).as_deref() == Some("open") {
        return Ok(ConnectArtifact::AlreadyConnected);
    }

    if pairing_preferred {
        if let Some(code) = non_empty_str(body, "pairingCode") {
            return Ok(ConnectArtifact::PairingCode(code.to_string()));
        }
    }

    let qr = non_empty_str(body, "base64").or_else(|| {
        body.get("qrcode")
            .and_then(|q| q.get("base64"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    });
    if let Some(qr) = qr {
        return Ok(ConnectArtifact::QrCode(qr.to_string()));
    }

    // Gateway issued a pairing code even though none was asked for.
    if let Some(code) = non_empty_str(body, "pairingCode") {
        return Ok(ConnectArtifact::PairingCode(code.to_string()));
    }

    Err(GatewayError::MissingField("pairingCode or base64"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_detection() {
        let err = GatewayError::Status {
            status: StatusCode::FORBIDDEN,
            body: r#"{"error":"Instance already exists"}"#.to_string(),
        };
        assert!(is_already_exists(&err));

        let err = GatewayError::Status {
            status: StatusCode::CONFLICT,
            body: r#"{"message":"This name is already in use"}"#.to_string(),
        };
        assert!(is_already_exists(&err));

        let err = GatewayError::Status {
            status: StatusCode::UNAUTHORIZED,
            body: r#"{"error":"invalid api key"}"#.to_string(),
        };
        assert!(!is_already_exists(&err));
    }

    #[test]
    fn state_extracted_from_both_shapes() {
        let nested = json!({"instance": {"instanceName": "x", "state": "open"}});
        assert_eq!(extract_state(&nested).as_deref(), Some("open"));

        let flat = json!({"state": "connecting"});
        assert_eq!(extract_state(&flat).as_deref(), Some("connecting"));

        assert_eq!(extract_state(&json!({})), None);
    }

    #[test]
    fn connect_prefers_pairing_code_with_phone() {
        let body = json!({"pairingCode": "ABCD-1234", "base64": "data:image/png;base64,xyz"});
        assert_eq!(
            parse_connect_response(&body, true).unwrap(),
            ConnectArtifact::PairingCode("ABCD-1234".to_string())
        );
    }

    #[test]
    fn connect_returns_qr_without_phone() {
        let body = json!({"pairingCode": "ABCD-1234", "base64": "data:image/png;base64,xyz"});
        assert_eq!(
            parse_connect_response(&body, false).unwrap(),
            ConnectArtifact::QrCode("data:image/png;base64,xyz".to_string())
        );
    }

    #[test]
    fn connect_reads_legacy_qr_location() {
        let body = json!({"qrcode": {"base64": "data:image/png;base64,legacy"}});
        assert_eq!(
            parse_connect_response(&body, false).unwrap(),
            ConnectArtifact::QrCode("data:image/png;base64,legacy".to_string())
        );
    }

    #[test]
    fn connect_detects_open_session() {
        let body = json!({"instance": {"state": "open"}});
        assert_eq!(
            parse_connect_response(&body, true).unwrap(),
            ConnectArtifact::AlreadyConnected
        );
    }

    #[test]
    fn connect_falls_back_to_pairing_code() {
        // No QR anywhere but a pairing code is present.
        let body = json!({"pairingCode": "WXYZ-9876"});
        assert_eq!(
            parse_connect_response(&body, false).unwrap(),
            ConnectArtifact::PairingCode("WXYZ-9876".to_string())
        );
    }

    #[test]
    fn connect_with_no_artifact_is_error() {
        let body = json!({"count": 0});
        assert!(matches!(
            parse_connect_response(&body, false),
            Err(GatewayError::MissingField(_))
        ));
    }

    #[test]
    fn empty_artifacts_are_skipped() {
        let body = json!({"pairingCode": "", "base64": ""});
        assert!(parse_connect_response(&body, true).is_err());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client =
            EvolutionClient::new("http://localhost:8080/", "secret", Duration::from_secs(5))
                .unwrap();
        assert_eq!(client.url("/instance/create"), "http://localhost:8080/instance/create");
    }

    #[test]
    fn webhook_events_cover_required_minimum() {
        assert!(WEBHOOK_EVENTS.contains(&"CONNECTION_UPDATE"));
        assert!(WEBHOOK_EVENTS.contains(&"MESSAGES_UPSERT"));
    }
}
