use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::domain::{EntityId, NameCache, NameRecord};
use crate::error::DexError;

pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2";
pub const DEFAULT_LOCALE: &str = "de";
pub const FETCH_TIMEOUT: Duration = Duration::from_millis(10_000);

pub trait SpeciesClient: Send + Sync {
    fn fetch_one(&self, id: EntityId, timeout: Duration) -> Result<NameRecord, DexError>;
    fn fetch_all_canonical(&self, max_id: u16) -> Result<NameCache, DexError>;
}

#[derive(Clone)]
pub struct SpeciesHttpClient {
    client: Client,
    base_url: String,
    locale: String,
}

impl SpeciesHttpClient {
    pub fn new(base_url: &str, locale: &str) -> Result<Self, DexError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dex-cache/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DexError::SpeciesHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| DexError::SpeciesHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            locale: locale.to_string(),
        })
    }

    pub fn species_url(&self, id: EntityId) -> String {
        format!("{}/pokemon-species/{}/", self.base_url, id)
    }

    pub fn list_url(&self, max_id: u16) -> String {
        format!("{}/pokemon-species?limit={}", self.base_url, max_id)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, DexError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "species request failed".to_string());
        Err(DexError::SpeciesStatus { status, message })
    }
}

impl SpeciesClient for SpeciesHttpClient {
    fn fetch_one(&self, id: EntityId, timeout: Duration) -> Result<NameRecord, DexError> {
        let timeout_error = || DexError::Timeout {
            id: id.get(),
            timeout_ms: timeout.as_millis() as u64,
        };
        let response = self
            .client
            .get(self.species_url(id))
            .timeout(timeout)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    timeout_error()
                } else {
                    DexError::SpeciesHttp(err.to_string())
                }
            })?;
        let response = Self::handle_status(response)?;
        let raw: Value = response.json().map_err(|err| {
            if err.is_timeout() {
                timeout_error()
            } else {
                DexError::Parse(err.to_string())
            }
        })?;
        extract_name_record(&raw, &self.locale)
    }

    fn fetch_all_canonical(&self, max_id: u16) -> Result<NameCache, DexError> {
        let response = self
            .client
            .get(self.list_url(max_id))
            .send()
            .map_err(|err| DexError::SpeciesHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| DexError::Parse(err.to_string()))?;
        canonical_cache_from_list(&raw, max_id)
    }
}

/// Picks the name tagged with `locale`, falling back to the canonical name.
pub fn extract_name_record(raw: &Value, locale: &str) -> Result<NameRecord, DexError> {
    let canonical = raw
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DexError::Parse("species payload has no name".to_string()))?;
    let localized = raw
        .get("names")
        .and_then(|v| v.as_array())
        .and_then(|names| {
            names.iter().find(|entry| {
                entry
                    .get("language")
                    .and_then(|lang| lang.get("name"))
                    .and_then(|v| v.as_str())
                    == Some(locale)
            })
        })
        .and_then(|entry| entry.get("name"))
        .and_then(|v| v.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(canonical);
    Ok(NameRecord::new(localized, canonical))
}

pub fn canonical_cache_from_list(raw: &Value, max_id: u16) -> Result<NameCache, DexError> {
    let results = raw
        .get("results")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DexError::Parse("species list has no results".to_string()))?;
    let mut cache = NameCache::new();
    for (id, entry) in EntityId::range(max_id).zip(results) {
        let Some(canonical) = entry.get("name").and_then(|v| v.as_str()) else {
            tracing::debug!(%id, "species list entry without name");
            continue;
        };
        cache.insert(id, NameRecord::placeholder(id, canonical));
    }
    Ok(cache)
}
