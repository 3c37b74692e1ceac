use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::error::AuthError;
use crate::services::token_store::{TokenSet, TokenStore};

const TADO_AUTH_BASE: &str = "https://login.tado.com/oauth2";
const TADO_API_BASE: &str = "https://my.tado.com/api/v2";
const TADO_HOPS_BASE: &str = "https://hops.tado.com";

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEVICE_SCOPE: &str = "offline_access home.user";
const ERROR_AUTHORIZATION_PENDING: &str = "authorization_pending";

/// Device-flow handshake details, held client-side only while the user
/// approves access in a browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    pub interval: u64,
}

/// Outcome of one device-code token poll. Pending is the normal state while
/// the user has not approved yet and is not an error.
#[derive(Debug, Clone)]
pub enum DevicePollOutcome {
    Pending,
    Authorized(TokenSet),
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Me {
    #[serde(default)]
    pub homes: Vec<HomeRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeRef {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PercentageValue {
    pub percentage: f64,
}

#[derive(Debug, Deserialize)]
pub struct TemperatureValue {
    pub celsius: f64,
}

#[derive(Debug, Deserialize)]
pub struct NumericValue {
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct StateValue {
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    #[serde(default)]
    pub solar_intensity: Option<PercentageValue>,
    #[serde(default)]
    pub outside_temperature: Option<TemperatureValue>,
    #[serde(default)]
    pub weather_state: Option<StateValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub heating_power: Option<PercentageValue>,
    #[serde(default)]
    pub sensor_data_points: Option<SensorDataPoints>,
    #[serde(default)]
    pub setting: Option<RoomSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDataPoints {
    #[serde(default)]
    pub humidity: Option<PercentageValue>,
    #[serde(default)]
    pub inside_temperature: Option<NumericValue>,
}

#[derive(Debug, Deserialize)]
pub struct RoomSetting {
    #[serde(default)]
    pub temperature: Option<NumericValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatPump {
    #[serde(default)]
    pub heating: Option<HeatPumpHeating>,
    #[serde(default)]
    pub domestic_hot_water: Option<DomesticHotWater>,
}

#[derive(Debug, Deserialize)]
pub struct HeatPumpHeating {
    #[serde(default)]
    pub setting: Option<HeatPumpSetting>,
}

#[derive(Debug, Deserialize)]
pub struct HeatPumpSetting {
    #[serde(default)]
    pub temperature: Option<NumericValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomesticHotWater {
    #[serde(default)]
    pub current_temperature_in_celsius: Option<f64>,
    #[serde(default)]
    pub current_block_setpoint: Option<BlockSetpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSetpoint {
    #[serde(default)]
    pub setpoint_value: Option<SetpointValue>,
}

/// The setpoint value arrives as text on some firmware and as a number on
/// others; keep the raw JSON and probe at extraction time.
#[derive(Debug, Deserialize)]
pub struct SetpointValue {
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Tado cloud client. Owns the OAuth session: device-flow login, transparent
/// refresh on 401 (retried exactly once), and the typed data fetchers the
/// poller drives.
pub struct TadoClient {
    http: reqwest::Client,
    client_id: String,
    store: TokenStore,
    token: RwLock<Option<TokenSet>>,
    auth_base: String,
    api_base: String,
    hops_base: String,
}

impl TadoClient {
    pub fn new(http: reqwest::Client, client_id: String, store: TokenStore) -> Self {
        let token = store.load();
        if token.is_some() {
            tracing::info!("loaded persisted tado token");
        }
        Self {
            http,
            client_id,
            store,
            token: RwLock::new(token),
            auth_base: TADO_AUTH_BASE.to_string(),
            api_base: TADO_API_BASE.to_string(),
            hops_base: TADO_HOPS_BASE.to_string(),
        }
    }

    /// Point the client at alternative endpoints (tests).
    pub fn with_endpoints(
        mut self,
        auth_base: impl Into<String>,
        api_base: impl Into<String>,
        hops_base: impl Into<String>,
    ) -> Self {
        self.auth_base = auth_base.into();
        self.api_base = api_base.into();
        self.hops_base = hops_base.into();
        self
    }

    /// Local presence check only; no expiry or server-side validation.
    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .expect("token lock poisoned")
            .as_ref()
            .map(|t| !t.access_token.is_empty())
            .unwrap_or(false)
    }

    fn current_access_token(&self) -> Option<String> {
        self.token
            .read()
            .expect("token lock poisoned")
            .as_ref()
            .map(|t| t.access_token.clone())
            .filter(|t| !t.is_empty())
    }

    fn set_token(&self, token: Option<TokenSet>) {
        *self.token.write().expect("token lock poisoned") = token;
    }

    /// Drops the in-memory session. The persisted token file is retained for
    /// diagnostics; it is reloaded only on process restart.
    fn clear_session(&self) {
        self.set_token(None);
    }

    pub async fn start_device_authorization(&self) -> Result<DeviceAuthorization, AuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("scope", DEVICE_SCOPE),
        ];
        let resp = self
            .http
            .post(format!("{}/device_authorize", self.auth_base))
            .form(&params)
            .send()
            .await?;
        if !resp.status().is_success() {
            let detail = error_detail(resp).await;
            return Err(AuthError::DeviceFlowRejected(detail));
        }
        let authorization = resp
            .json::<DeviceAuthorization>()
            .await
            .map_err(AuthError::Transport)?;
        Ok(authorization)
    }

    pub async fn poll_device_token(
        &self,
        device_code: &str,
    ) -> Result<DevicePollOutcome, AuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", DEVICE_GRANT_TYPE),
            ("device_code", device_code),
        ];
        let resp = self
            .http
            .post(format!("{}/token", self.auth_base))
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            let token = resp.json::<TokenSet>().await.map_err(AuthError::Transport)?;
            if token.access_token.is_empty() {
                return Err(AuthError::TokenRejected(
                    "token response missing access_token".to_string(),
                ));
            }
            self.store
                .save(&token)
                .map_err(|err| AuthError::Persist(err.to_string()))?;
            self.set_token(Some(token.clone()));
            tracing::info!("device flow completed, session authenticated");
            return Ok(DevicePollOutcome::Authorized(token));
        }

        let body = resp.text().await.unwrap_or_default();
        if let Ok(parsed) = serde_json::from_str::<OAuthErrorBody>(&body) {
            if parsed.error.as_deref() == Some(ERROR_AUTHORIZATION_PENDING) {
                return Ok(DevicePollOutcome::Pending);
            }
            if let Some(error) = parsed.error {
                let detail = match parsed.error_description {
                    Some(description) => format!("{error}: {description}"),
                    None => error,
                };
                return Err(AuthError::TokenRejected(detail));
            }
        }
        Err(AuthError::TokenRejected(if body.is_empty() {
            status.to_string()
        } else {
            body
        }))
    }

    /// Exchanges the refresh token for a new token set and persists it. Any
    /// failure drops the in-memory session so `is_authenticated()` reads
    /// false until a new login completes.
    async fn refresh_token(&self) -> Result<(), AuthError> {
        let refresh = self
            .token
            .read()
            .expect("token lock poisoned")
            .as_ref()
            .and_then(|t| t.refresh_token.clone());
        let Some(refresh) = refresh else {
            self.clear_session();
            return Err(AuthError::NoRefreshToken);
        };

        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.as_str()),
        ];
        let resp = match self
            .http
            .post(format!("{}/token", self.auth_base))
            .form(&params)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                self.clear_session();
                return Err(AuthError::RefreshFailed(err.to_string()));
            }
        };
        if !resp.status().is_success() {
            let detail = error_detail(resp).await;
            self.clear_session();
            return Err(AuthError::RefreshFailed(detail));
        }
        let token = match resp.json::<TokenSet>().await {
            Ok(token) => token,
            Err(err) => {
                self.clear_session();
                return Err(AuthError::RefreshFailed(err.to_string()));
            }
        };
        if token.access_token.is_empty() {
            self.clear_session();
            return Err(AuthError::RefreshFailed(
                "refresh response missing access_token".to_string(),
            ));
        }
        if let Err(err) = self.store.save(&token) {
            // The refreshed session is valid in memory; losing the file only
            // costs re-login after a restart.
            tracing::warn!("failed to persist refreshed token: {err:#}");
        }
        self.set_token(Some(token));
        tracing::info!("token refreshed");
        Ok(())
    }

    /// Bearer GET with refresh-on-401, retried exactly once. A second 401
    /// after a successful refresh ends the session.
    pub async fn authorized_get(&self, url: &str) -> Result<reqwest::Response> {
        let access = self
            .current_access_token()
            .ok_or(AuthError::NotAuthenticated)?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&access)
            .send()
            .await
            .map_err(AuthError::Transport)?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::info!("access token rejected, refreshing");
        self.refresh_token().await?;
        let access = self
            .current_access_token()
            .ok_or(AuthError::NotAuthenticated)?;
        let retry = self
            .http
            .get(url)
            .bearer_auth(&access)
            .send()
            .await
            .map_err(AuthError::Transport)?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            self.clear_session();
            return Err(AuthError::TokenRejected(
                "access token rejected after refresh".to_string(),
            )
            .into());
        }
        Ok(retry)
    }

    pub async fn get_me(&self) -> Result<Me> {
        let url = format!("{}/me", self.api_base);
        let resp = self.authorized_get(&url).await?;
        resp.error_for_status()?
            .json::<Me>()
            .await
            .context("failed to decode profile response")
    }

    pub async fn get_weather(&self, home_id: i64) -> Result<WeatherReport> {
        let url = format!("{}/homes/{home_id}/weather", self.api_base);
        let resp = self.authorized_get(&url).await?;
        resp.error_for_status()?
            .json::<WeatherReport>()
            .await
            .context("failed to decode weather response")
    }

    pub async fn get_rooms(&self, home_id: i64) -> Result<Vec<Room>> {
        let url = format!("{}/homes/{home_id}/rooms?ngsw-bypass=true", self.hops_base);
        let resp = self.authorized_get(&url).await?;
        resp.error_for_status()?
            .json::<Vec<Room>>()
            .await
            .context("failed to decode rooms response")
    }

    pub async fn get_heat_pump(&self, home_id: i64) -> Result<HeatPump> {
        let url = format!(
            "{}/homes/{home_id}/heatPump?ngsw-bypass=true",
            self.hops_base
        );
        let resp = self.authorized_get(&url).await?;
        resp.error_for_status()?
            .json::<HeatPump>()
            .await
            .context("failed to decode heat pump response")
    }
}

async fn error_detail(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Form, State};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct VendorCounters {
        refresh_calls: AtomicUsize,
        me_calls: AtomicUsize,
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base: &str, dir: &tempfile::TempDir) -> TadoClient {
        let store = TokenStore::new(dir.path().join("token.json"));
        TadoClient::new(reqwest::Client::new(), "client-abc".to_string(), store)
            .with_endpoints(base, base, base)
    }

    fn seeded_client(base: &str, dir: &tempfile::TempDir, token: TokenSet) -> TadoClient {
        let path = dir.path().join("token.json");
        TokenStore::new(path.clone()).save(&token).unwrap();
        TadoClient::new(
            reqwest::Client::new(),
            "client-abc".to_string(),
            TokenStore::new(path),
        )
        .with_endpoints(base, base, base)
    }

    fn stale_token() -> TokenSet {
        TokenSet {
            access_token: "stale".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_in: Some(599),
            token_type: Some("Bearer".to_string()),
            scope: None,
        }
    }

    fn bearer(headers: &HeaderMap) -> &str {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn poll_device_token_pending_is_not_an_error() {
        let app = Router::new().route(
            "/token",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "authorization_pending" })),
                )
            }),
        );
        let base = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&base, &dir);

        let outcome = client.poll_device_token("device-1").await.unwrap();
        assert!(matches!(outcome, DevicePollOutcome::Pending));
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn poll_device_token_success_persists_token() {
        let app = Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(
                    form.get("grant_type").map(String::as_str),
                    Some(super::DEVICE_GRANT_TYPE)
                );
                Json(json!({
                    "access_token": "fresh",
                    "refresh_token": "refresh-1",
                    "expires_in": 599,
                    "token_type": "Bearer"
                }))
            }),
        );
        let base = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&base, &dir);

        let outcome = client.poll_device_token("device-1").await.unwrap();
        let DevicePollOutcome::Authorized(token) = outcome else {
            panic!("expected authorized outcome");
        };
        assert_eq!(token.access_token, "fresh");
        assert!(client.is_authenticated());

        // Persisted durably: a fresh store sees the new token.
        let reloaded = TokenStore::new(dir.path().join("token.json")).load().unwrap();
        assert_eq!(reloaded.access_token, "fresh");
    }

    #[tokio::test]
    async fn poll_device_token_denied_is_an_error() {
        let app = Router::new().route(
            "/token",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "access_denied" })),
                )
            }),
        );
        let base = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&base, &dir);

        let err = client.poll_device_token("device-1").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRejected(_)));
    }

    fn refresh_vendor(counters: Arc<VendorCounters>, retry_succeeds: bool) -> Router {
        Router::new()
            .route(
                "/token",
                post(
                    |State(counters): State<Arc<VendorCounters>>,
                     Form(form): Form<HashMap<String, String>>| async move {
                        assert_eq!(
                            form.get("grant_type").map(String::as_str),
                            Some("refresh_token")
                        );
                        counters.refresh_calls.fetch_add(1, Ordering::SeqCst);
                        Json(json!({
                            "access_token": "renewed",
                            "refresh_token": "refresh-2",
                            "expires_in": 599
                        }))
                    },
                ),
            )
            .route(
                "/me",
                get(
                    move |State(counters): State<Arc<VendorCounters>>, headers: HeaderMap| async move {
                        counters.me_calls.fetch_add(1, Ordering::SeqCst);
                        if retry_succeeds && bearer(&headers) == "renewed" {
                            Json(json!({ "homes": [{ "id": 1, "name": "Home" }] }))
                                .into_response()
                        } else {
                            axum::http::StatusCode::UNAUTHORIZED.into_response()
                        }
                    },
                ),
            )
            .with_state(counters)
    }

    #[tokio::test]
    async fn rejected_access_token_triggers_one_refresh_and_one_retry() {
        let counters = Arc::new(VendorCounters::default());
        let base = serve(refresh_vendor(counters.clone(), true)).await;
        let dir = tempfile::tempdir().unwrap();
        let client = seeded_client(&base, &dir, stale_token());

        let me = client.get_me().await.unwrap();
        assert_eq!(me.homes.len(), 1);
        assert_eq!(counters.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.me_calls.load(Ordering::SeqCst), 2);
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn second_rejection_after_refresh_ends_the_session() {
        let counters = Arc::new(VendorCounters::default());
        let base = serve(refresh_vendor(counters.clone(), false)).await;
        let dir = tempfile::tempdir().unwrap();
        let client = seeded_client(&base, &dir, stale_token());

        let err = client.get_me().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::TokenRejected(_))
        ));
        assert_eq!(counters.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.me_calls.load(Ordering::SeqCst), 2);
        assert!(!client.is_authenticated());

        // The stale token file is retained for diagnostics.
        assert!(dir.path().join("token.json").exists());
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_a_refresh_exchange() {
        let counters = Arc::new(VendorCounters::default());
        let base = serve(refresh_vendor(counters.clone(), true)).await;
        let dir = tempfile::tempdir().unwrap();
        let token = TokenSet {
            refresh_token: None,
            ..stale_token()
        };
        let client = seeded_client(&base, &dir, token);

        let err = client.get_me().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::NoRefreshToken)
        ));
        assert_eq!(counters.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(counters.me_calls.load(Ordering::SeqCst), 1);
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn unauthenticated_request_fails_locally() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_for("http://127.0.0.1:1", &dir);

        let err = client.get_me().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::NotAuthenticated)
        ));
    }
}
