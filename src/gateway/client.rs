use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::config::Settings;
use crate::gateway::payload::VenueResponse;
use crate::gateway::GatewayError;
use crate::logger::{EventKind, EventLog};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Signed REST client. One reqwest client (and its connection pool) per
/// instance; clones share the pool, so concurrent batch dispatch reuses
/// connections instead of re-handshaking.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    recv_window: String,
    // key material validated once at construction
    mac: HmacSha256,
    log: EventLog,
}

impl GatewayClient {
    pub fn new(settings: &Settings, log: EventLog) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building http client")?;
        let mac = HmacSha256::new_from_slice(settings.api_secret.as_bytes())
            .context("invalid api secret")?;
        Ok(Self {
            http,
            base_url: settings.rest_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            recv_window: settings.recv_window_ms.to_string(),
            mac,
            log,
        })
    }

    fn sign(&self, timestamp: &str, body: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(timestamp.as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(self.recv_window.as_bytes());
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Executes one signed POST. Transport and protocol problems are errors;
    /// a venue rejection (`retCode != 0`) comes back as a normal response.
    /// Every non-success outcome emits exactly one event-log entry here, so
    /// callers never log the same failure twice.
    pub async fn submit(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<VenueResponse, GatewayError> {
        let body_text = body.to_string();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .to_string();
        let signature = self.sign(&timestamp, &body_text);

        let sent = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", &self.recv_window)
            .header("X-BAPI-SIGN", &signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body_text.clone())
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                let err = GatewayError::Transport(e.to_string());
                self.log.publish(
                    EventKind::ApiError,
                    format!("{endpoint}: {err}, payload: {body_text}"),
                );
                return Err(err);
            }
        };

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                let err = GatewayError::Transport(e.to_string());
                self.log.publish(
                    EventKind::ApiError,
                    format!("{endpoint}: {err}, payload: {body_text}"),
                );
                return Err(err);
            }
        };

        let parsed: VenueResponse = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                let err = GatewayError::Protocol(e.to_string());
                self.log.publish(
                    EventKind::ApiError,
                    format!("{endpoint}: {err}, raw: {text}"),
                );
                return Err(err);
            }
        };

        if !parsed.is_ok() {
            debug!(endpoint, ret_code = parsed.ret_code, msg = %parsed.ret_msg, "venue rejected request");
            self.log.publish(
                EventKind::ApiError,
                format!(
                    "{endpoint}: retCode {} ({}), payload: {body_text}",
                    parsed.ret_code, parsed.ret_msg
                ),
            );
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn client() -> GatewayClient {
        let settings = Settings::for_tests();
        let log = EventLog::spawn(settings.log_path.clone(), 1 << 20, 1);
        GatewayClient::new(&settings, log).unwrap()
    }

    #[tokio::test]
    async fn test_signature_is_deterministic_hex() {
        let client = client();
        let a = client.sign("1700000000000", r#"{"symbol":"BTCUSDT"}"#);
        let b = client.sign("1700000000000", r#"{"symbol":"BTCUSDT"}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // hex-encoded sha256
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_signature_covers_timestamp_and_body() {
        let client = client();
        let base = client.sign("1700000000000", "{}");
        assert_ne!(base, client.sign("1700000000001", "{}"));
        assert_ne!(base, client.sign("1700000000000", r#"{"a":1}"#));
    }
}
