//! Nominatim geocoding client

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::Coordinates;

/// Nominatim API response
#[derive(Debug, Deserialize)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
    #[serde(default)]
    pub importance: Option<f64>,
}

/// A single search hit
#[derive(Debug, Clone)]
pub struct NominatimMatch {
    pub coordinates: Coordinates,
    pub display_name: String,
    pub importance: Option<f64>,
}

/// Nominatim geocoding client
pub struct NominatimClient {
    base_url: String,
    country_codes: String,
    client: reqwest::Client,
}

impl NominatimClient {
    /// Create a new client; `country_codes` restricts search results (e.g. "th")
    pub fn new(base_url: &str, country_codes: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trip-planner/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            country_codes: country_codes.to_string(),
            client,
        })
    }

    fn search_url(&self, query: &str) -> String {
        let mut url = format!(
            "{}/search?q={}&format=json&limit=1",
            self.base_url,
            urlencoding::encode(query)
        );
        if !self.country_codes.is_empty() {
            url.push_str("&countrycodes=");
            url.push_str(&urlencoding::encode(&self.country_codes));
        }
        url
    }

    /// Free-text address search, first hit only
    pub async fn search(&self, query: &str) -> Result<Option<NominatimMatch>> {
        let response = self
            .client
            .get(self.search_url(query))
            .send()
            .await
            .context("Failed to send geocoding request")?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            anyhow::bail!("Nominatim responded with {}", status);
        }
        if !status.is_success() {
            return Ok(None);
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .context("Failed to parse geocoding response")?;

        match results.into_iter().next() {
            Some(result) => {
                let lat: f64 = result.lat.parse().context("Invalid latitude")?;
                let lng: f64 = result.lon.parse().context("Invalid longitude")?;
                Ok(Some(NominatimMatch {
                    coordinates: Coordinates { lat, lng },
                    display_name: result.display_name,
                    importance: result.importance,
                }))
            }
            None => Ok(None),
        }
    }
}
