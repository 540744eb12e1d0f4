//! Terrain height lookups.

use serde::{Deserialize, Serialize};
use tilestream_coords::GeodeticPosition;

use crate::LocalBoxFuture;
use crate::error::{Error, Result};

/// Default Open Elevation endpoint.
pub const OPEN_ELEVATION_URL: &str = "https://api.open-elevation.com/api/v1/lookup";

/// User agent for API requests.
#[cfg(not(target_family = "wasm"))]
const USER_AGENT: &str = concat!("tilestream/", env!("CARGO_PKG_VERSION"));

/// Resolves terrain heights for geodetic positions.
pub trait ElevationService {
    /// Return `positions` in the same order with their heights replaced by
    /// the terrain height at each latitude/longitude.
    fn sample_heights(
        &self,
        positions: Vec<GeodeticPosition>,
    ) -> LocalBoxFuture<'_, Result<Vec<GeodeticPosition>>>;
}

/// Client for the Open Elevation lookup API.
///
/// Positions are sent in one POST request as a JSON body, so large grids do
/// not hit URL length limits.
#[derive(Debug, Clone)]
pub struct OpenElevation {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct LookupRequest {
    locations: Vec<Location>,
}

#[derive(Debug, Serialize)]
struct Location {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    elevation: f64,
}

impl OpenElevation {
    /// Create a client for the public endpoint.
    pub fn new() -> Result<Self> {
        Self::with_endpoint(OPEN_ELEVATION_URL)
    }

    /// Create a client for a self-hosted endpoint.
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_family = "wasm"))]
        let builder = builder.user_agent(USER_AGENT);
        let http = builder.build().map_err(|e| Error::Elevation {
            message: format!("failed to create client: {e}"),
        })?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    /// The lookup endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn lookup(&self, positions: Vec<GeodeticPosition>) -> Result<Vec<GeodeticPosition>> {
        if positions.is_empty() {
            return Ok(positions);
        }

        let request = LookupRequest {
            locations: positions
                .iter()
                .map(|p| Location {
                    latitude: p.latitude,
                    longitude: p.longitude,
                })
                .collect(),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Elevation {
                message: format!("request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(Error::Elevation {
                message: format!("HTTP {}", response.status()),
            });
        }

        let data: LookupResponse = response.json().await.map_err(|e| Error::Elevation {
            message: format!("failed to parse response: {e}"),
        })?;

        apply_heights(positions, &data.results)
    }
}

fn apply_heights(
    positions: Vec<GeodeticPosition>,
    results: &[LookupResult],
) -> Result<Vec<GeodeticPosition>> {
    if results.len() != positions.len() {
        return Err(Error::Elevation {
            message: format!(
                "expected {} heights, got {}",
                positions.len(),
                results.len()
            ),
        });
    }
    Ok(positions
        .into_iter()
        .zip(results)
        .map(|(p, r)| p.with_height(r.elevation))
        .collect())
}

impl ElevationService for OpenElevation {
    fn sample_heights(
        &self,
        positions: Vec<GeodeticPosition>,
    ) -> LocalBoxFuture<'_, Result<Vec<GeodeticPosition>>> {
        Box::pin(self.lookup(positions))
    }
}
