use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::PollError;

const AUTH_TOKEN_URL: &str = "https://auth.tesla.com/oauth2/v3/token";
const AUTH_CLIENT_ID: &str = "ownerapi";
const AUTH_SCOPE: &str = "openid email offline_access";
const OWNER_API_BASE: &str = "https://owner-api.teslamotors.com";

/// One live-status sample flattened to the warehouse row shape. Deserializes
/// straight from the upstream response object; keys the upstream omits stay
/// None and are persisted as NULL.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryRecord {
    #[serde(rename = "timestamp", default)]
    pub ts: Option<String>,
    #[serde(rename = "solar_power", default)]
    pub solar_w: Option<f64>,
    #[serde(rename = "load_power", default)]
    pub load_w: Option<f64>,
    #[serde(rename = "grid_power", default)]
    pub grid_w: Option<f64>,
    #[serde(rename = "battery_power", default)]
    pub battery_w: Option<f64>,
    #[serde(rename = "percentage_charged", default)]
    pub battery_soc: Option<f64>,
    #[serde(default)]
    pub grid_status: Option<String>,
    #[serde(default)]
    pub island_status: Option<String>,
}

#[derive(Deserialize)]
struct ProductsEnvelope {
    response: Option<Vec<JsonValue>>,
}

#[derive(Deserialize)]
struct LiveStatusEnvelope {
    response: TelemetryRecord,
}

#[derive(Deserialize)]
struct RefreshedTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct TeslaClient {
    http: Client,
}

impl TeslaClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// One full fetch: token cache, refresh grant, product listing, first
    /// energy site, live status. Never performs an interactive login; a cache
    /// without a usable refresh token fails before any network call.
    pub async fn fetch_live_status(&self, config: &Config) -> Result<TelemetryRecord, PollError> {
        let email = config
            .account_email
            .as_deref()
            .ok_or_else(|| PollError::Auth("TESLA_EMAIL is not set".to_string()))?;

        let mut cache = read_token_cache(&config.token_cache_path)?;
        let refresh_token = cached_refresh_token(&cache, email)
            .ok_or_else(|| PollError::Auth(format!("no cached Tesla authorization for {email}")))?
            .to_string();

        let tokens = self.refresh_tokens(&refresh_token).await?;
        apply_refreshed_tokens(&mut cache, email, &tokens);
        write_token_cache(&config.token_cache_path, &cache)?;
        tracing::debug!("Tesla access token refreshed");

        let products = self.fetch_products(&tokens.access_token).await?;
        let site_id = first_energy_site(&products).ok_or(PollError::SiteNotFound)?;
        tracing::debug!(site_id, "energy site resolved");

        self.fetch_site_live_status(&tokens.access_token, site_id)
            .await
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<RefreshedTokens, PollError> {
        let body = json!({
            "grant_type": "refresh_token",
            "client_id": AUTH_CLIENT_ID,
            "refresh_token": refresh_token,
            "scope": AUTH_SCOPE,
        });
        let tokens = self
            .http
            .post(AUTH_TOKEN_URL)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<RefreshedTokens>()
            .await?;
        Ok(tokens)
    }

    async fn fetch_products(&self, access_token: &str) -> Result<Vec<JsonValue>, PollError> {
        let url = format!("{OWNER_API_BASE}/api/1/products");
        let payload: ProductsEnvelope = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(payload.response.unwrap_or_default())
    }

    async fn fetch_site_live_status(
        &self,
        access_token: &str,
        site_id: u64,
    ) -> Result<TelemetryRecord, PollError> {
        let url = format!("{OWNER_API_BASE}/api/1/energy_sites/{site_id}/live_status");
        let payload: LiveStatusEnvelope = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(payload.response)
    }
}

/// The cache file is an object keyed by account email, written by the
/// out-of-band login tooling. It is read and rewritten as raw JSON so fields
/// this poller does not know about survive the round trip.
fn read_token_cache(path: &Path) -> Result<JsonValue, PollError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        PollError::Auth(format!("failed to read token cache {}: {err}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        PollError::Auth(format!("token cache {} is not valid JSON: {err}", path.display()))
    })
}

fn write_token_cache(path: &Path, cache: &JsonValue) -> Result<(), PollError> {
    let raw = serde_json::to_string_pretty(cache)
        .map_err(|err| PollError::Auth(format!("failed to encode token cache: {err}")))?;
    fs::write(path, raw).map_err(|err| {
        PollError::Auth(format!("failed to write token cache {}: {err}", path.display()))
    })
}

fn cached_refresh_token<'a>(cache: &'a JsonValue, email: &str) -> Option<&'a str> {
    cache
        .get(email)?
        .get("sso")?
        .get("refresh_token")?
        .as_str()
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn apply_refreshed_tokens(cache: &mut JsonValue, email: &str, tokens: &RefreshedTokens) {
    let Some(sso) = cache
        .get_mut(email)
        .and_then(|entry| entry.get_mut("sso"))
        .and_then(JsonValue::as_object_mut)
    else {
        return;
    };
    sso.insert("access_token".to_string(), json!(tokens.access_token));
    if let Some(refresh_token) = tokens.refresh_token.as_deref() {
        sso.insert("refresh_token".to_string(), json!(refresh_token));
    }
    if let Some(expires_in) = tokens.expires_in {
        let expires_at = Utc::now().timestamp() + expires_in as i64;
        sso.insert("expires_at".to_string(), json!(expires_at));
    }
}

fn first_energy_site(products: &[JsonValue]) -> Option<u64> {
    products.iter().find_map(energy_site_id)
}

fn energy_site_id(product: &JsonValue) -> Option<u64> {
    let value = product.get("energy_site_id")?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
}
