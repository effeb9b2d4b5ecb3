//! Smart Device Management (SDM) API client.
//!
//! The UI speaks in `action.devices.commands.*` intents; the SDM API wants
//! its own `sdm.devices.commands.*` names. [`map_command`] is the only
//! translation, and [`DeviceClient::execute`] refuses anything it does not
//! know before touching the network.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DevicesConfig;
use crate::error::{HearthError, Result};

const COMMAND_MAP: &[(&str, &str)] = &[
    (
        "action.devices.commands.OnOff",
        "sdm.devices.commands.OnOff.SetOnOff",
    ),
    (
        "action.devices.commands.BrightnessAbsolute",
        "sdm.devices.commands.Brightness.SetBrightness",
    ),
    (
        "action.devices.commands.ThermostatTemperatureSetpoint",
        "sdm.devices.commands.ThermostatTemperatureSetpoint.SetHeat",
    ),
    (
        "action.devices.commands.ThermostatSetMode",
        "sdm.devices.commands.ThermostatMode.SetMode",
    ),
    (
        "action.devices.commands.ColorAbsolute",
        "sdm.devices.commands.Color.SetColor",
    ),
];

/// SDM command name for a UI action, if one exists.
pub fn map_command(action: &str) -> Option<&'static str> {
    COMMAND_MAP
        .iter()
        .find(|(ui, _)| *ui == action)
        .map(|(_, sdm)| *sdm)
}

/// Device and project ids end up as URL path segments, so only
/// `[A-Za-z0-9_-]` is accepted.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(HearthError::BadRequest(format!("{} must not be empty", kind)));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(HearthError::BadRequest(format!(
            "{} may only contain letters, digits, '-' and '_'",
            kind
        )));
    }
    Ok(())
}

pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
}

impl DeviceClient {
    pub fn new(config: &DevicesConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
        })
    }

    fn enterprise_url(&self) -> Result<String> {
        if self.project_id.is_empty() {
            return Err(HearthError::BadRequest(
                "devices.project_id is not configured".to_string(),
            ));
        }
        validate_id("devices.project_id", &self.project_id)?;
        Ok(format!("{}/enterprises/{}", self.base_url, self.project_id))
    }

    pub async fn list_devices(&self, token: &str) -> Result<Value> {
        let url = format!("{}/devices", self.enterprise_url()?);
        let response = self.http.get(&url).bearer_auth(token).send().await?;
        read_json(response).await
    }

    /// Run a UI action against one device.
    pub async fn execute(
        &self,
        token: &str,
        device_id: &str,
        action: &str,
        params: Value,
    ) -> Result<Value> {
        let command = map_command(action)
            .ok_or_else(|| HearthError::UnsupportedCommand(action.to_string()))?;
        validate_id("device_id", device_id)?;

        let url = format!(
            "{}/devices/{}:executeCommand",
            self.enterprise_url()?,
            device_id
        );
        debug!(device_id, command, "executing device command");

        let body = json!({ "command": command, "params": params });
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        warn!(%status, "device API request failed");
        return Err(HearthError::Upstream(format!(
            "device API returned {}: {}",
            status, text
        )));
    }
    response
        .json()
        .await
        .map_err(|e| HearthError::Upstream(format!("device API returned malformed JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{StatusCode, Uri};
    use axum::response::IntoResponse;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        hits: AtomicUsize,
        last: Mutex<Option<(String, Value)>>,
    }

    /// Spawn a stand-in SDM API that records every request and replies with
    /// `status` and `body`.
    async fn mock_api(status: StatusCode, body: &'static str) -> (String, Arc<Recorded>) {
        let recorded = Arc::new(Recorded::default());
        let seen = Arc::clone(&recorded);
        let app = Router::new().fallback(move |uri: Uri, bytes: Bytes| {
            let seen = Arc::clone(&seen);
            async move {
                seen.hits.fetch_add(1, Ordering::SeqCst);
                let payload = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                *seen.last.lock().unwrap() = Some((uri.path().to_string(), payload));
                (status, body).into_response()
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), recorded)
    }

    fn client(base_url: &str) -> DeviceClient {
        DeviceClient::new(&DevicesConfig {
            project_id: "proj-1".into(),
            base_url: base_url.into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_map_command_table() {
        assert_eq!(
            map_command("action.devices.commands.OnOff"),
            Some("sdm.devices.commands.OnOff.SetOnOff")
        );
        assert_eq!(
            map_command("action.devices.commands.ThermostatTemperatureSetpoint"),
            Some("sdm.devices.commands.ThermostatTemperatureSetpoint.SetHeat")
        );
        assert_eq!(
            map_command("action.devices.commands.ColorAbsolute"),
            Some("sdm.devices.commands.Color.SetColor")
        );
        assert_eq!(map_command("action.devices.commands.Dock"), None);
        assert_eq!(map_command(""), None);
    }

    #[tokio::test]
    async fn test_unsupported_command_makes_no_request() {
        let (url, recorded) = mock_api(StatusCode::OK, "{}").await;
        let err = client(&url)
            .execute("tok", "dev-1", "action.devices.commands.Dock", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_command");
        assert_eq!(recorded.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_posts_mapped_command() {
        let (url, recorded) = mock_api(StatusCode::OK, "{}").await;
        let result = client(&url)
            .execute(
                "tok",
                "dev-1",
                "action.devices.commands.OnOff",
                json!({ "on": true }),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({}));
        assert_eq!(recorded.hits.load(Ordering::SeqCst), 1);

        let (path, body) = recorded.last.lock().unwrap().clone().unwrap();
        assert_eq!(path, "/enterprises/proj-1/devices/dev-1:executeCommand");
        assert_eq!(body["command"], "sdm.devices.commands.OnOff.SetOnOff");
        assert_eq!(body["params"]["on"], true);
    }

    #[tokio::test]
    async fn test_device_id_cannot_escape_its_path_segment() {
        let (url, recorded) = mock_api(StatusCode::OK, "{}").await;
        let client = client(&url);
        for bad in ["../../../evil?x=", "dev-1#frag", "a/b", "dev 1", ""] {
            let err = client
                .execute("tok", bad, "action.devices.commands.OnOff", json!({}))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "bad_request", "{bad}");
        }
        assert_eq!(recorded.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_id_accepts_sdm_style_ids() {
        assert!(validate_id("device_id", "AVPHwEu_1x-9Qz").is_ok());
        assert!(validate_id("device_id", "dev.1").is_err());
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_error() {
        let (url, _recorded) = mock_api(StatusCode::FORBIDDEN, "denied").await;
        let err = client(&url)
            .execute("tok", "dev-1", "action.devices.commands.OnOff", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "upstream_error");
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_upstream_error() {
        let (url, _recorded) = mock_api(StatusCode::OK, "not json").await;
        let err = client(&url).list_devices("tok").await.unwrap_err();
        assert_eq!(err.code(), "upstream_error");
    }
}
