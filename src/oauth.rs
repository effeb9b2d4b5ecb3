//! OAuth 2.0 authorization-code flow with PKCE for the device API.
//!
//! [`OAuthService::begin_authorization`] mints a state token and a PKCE
//! pair and remembers the verifier. The provider redirects back with that
//! state and a code; [`OAuthService::complete`] consumes the pending entry
//! (once, whether or not it is still valid) and exchanges the code for a
//! token, which is then cached and refreshed on demand.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DevicesConfig, OAuthConfig};
use crate::error::{HearthError, Result};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

impl PkcePair {
    /// 64 hex chars of verifier, drawn from two random UUIDs.
    pub fn generate() -> Self {
        let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
            method: "S256",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: String,
}

/// What callers learn about a freshly obtained token. The token itself
/// stays inside the service.
#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub expires_in: u64,
    pub has_refresh_token: bool,
}

struct PendingAuth {
    verifier: String,
    created: Instant,
}

struct CachedToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct OAuthService {
    config: OAuthConfig,
    project_id: String,
    http: reqwest::Client,
    pending: Mutex<HashMap<String, PendingAuth>>,
    token: Mutex<Option<CachedToken>>,
}

impl OAuthService {
    pub fn new(config: &OAuthConfig, devices: &DevicesConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            project_id: devices.project_id.clone(),
            http,
            pending: Mutex::new(HashMap::new()),
            token: Mutex::new(None),
        })
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.config.is_configured() {
            Ok(())
        } else {
            Err(HearthError::OAuthNotConfigured)
        }
    }

    fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.config.state_ttl_secs)
    }

    pub async fn begin_authorization(&self) -> Result<AuthorizationRequest> {
        self.ensure_configured()?;

        let pkce = PkcePair::generate();
        let state = Uuid::new_v4().simple().to_string();

        let base = self.config.auth_url.replace("{project_id}", &self.project_id);
        let url = reqwest::Url::parse_with_params(
            &base,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.config.scope.as_str()),
                ("state", state.as_str()),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", pkce.method),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| HearthError::BadRequest(format!("invalid oauth.auth_url: {}", e)))?;

        let ttl = self.state_ttl();
        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| p.created.elapsed() <= ttl);
        pending.insert(
            state.clone(),
            PendingAuth {
                verifier: pkce.verifier,
                created: Instant::now(),
            },
        );
        debug!(pending = pending.len(), "authorization started");

        Ok(AuthorizationRequest {
            authorization_url: url.to_string(),
            state,
        })
    }

    /// Finish the flow for `state` by redeeming `code`.
    pub async fn complete(&self, state: &str, code: &str) -> Result<TokenSummary> {
        self.ensure_configured()?;

        let entry = self.pending.lock().await.remove(state);
        let verifier = match entry {
            Some(p) if p.created.elapsed() <= self.state_ttl() => p.verifier,
            Some(_) => {
                warn!("authorization state expired");
                return Err(HearthError::InvalidState);
            }
            None => {
                warn!("unknown authorization state");
                return Err(HearthError::InvalidState);
            }
        };

        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", verifier.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await?;

        let summary = TokenSummary {
            expires_in: response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
            has_refresh_token: response.refresh_token.is_some(),
        };
        *self.token.lock().await = Some(cached(response, None));
        info!(expires_in = summary.expires_in, "authorization complete");
        Ok(summary)
    }

    /// A usable access token, refreshing it first if it is about to expire.
    pub async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;

        let refresh = match token.as_ref() {
            Some(t) if t.expires_at > Instant::now() + EXPIRY_SKEW => {
                return Ok(t.access_token.clone());
            }
            Some(CachedToken {
                refresh_token: Some(r),
                ..
            }) => r.clone(),
            _ => {
                return Err(HearthError::NotAuthorized(
                    "no access token; sign in via /auth/login".to_string(),
                ))
            }
        };

        debug!("refreshing access token");
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;
        let fresh = cached(response, Some(refresh));
        let access = fresh.access_token.clone();
        *token = Some(fresh);
        Ok(access)
    }

    pub async fn is_authorized(&self) -> bool {
        self.token.lock().await.is_some()
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "token endpoint rejected request");
            return Err(HearthError::Upstream(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| HearthError::Upstream(format!("malformed token response: {}", e)))
    }
}

/// Cache a token response, keeping `previous_refresh` when the provider
/// does not rotate refresh tokens.
fn cached(response: TokenResponse, previous_refresh: Option<String>) -> CachedToken {
    let lifetime = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    CachedToken {
        access_token: response.access_token,
        refresh_token: response.refresh_token.or(previous_refresh),
        expires_at: Instant::now() + Duration::from_secs(lifetime),
    }
}
