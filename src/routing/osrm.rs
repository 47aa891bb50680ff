use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::order::GeoPoint;
use crate::models::route::Route;
use crate::routing::{RoutingError, RoutingProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(4);

/// OSRM-compatible HTTP routing backend. Requests alternates so the
/// estimator can pick the shortest candidate as primary.
pub struct OsrmProvider {
    http: reqwest::Client,
    base_url: String,
}

impl OsrmProvider {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self { http, base_url }
    }

    fn route_url(&self, origin: GeoPoint, destination: GeoPoint) -> String {
        // OSRM takes lng,lat pairs.
        format!(
            "{}/route/v1/driving/{},{};{},{}?alternatives=true&overview=full",
            self.base_url.trim_end_matches('/'),
            origin.lng,
            origin.lat,
            destination.lng,
            destination.lat
        )
    }
}

#[derive(Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    #[serde(default)]
    geometry: String,
}

#[async_trait]
impl RoutingProvider for OsrmProvider {
    fn source_name(&self) -> &'static str {
        "osrm"
    }

    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<Vec<Route>, RoutingError> {
        let url = self.route_url(origin, destination);

        let response = self.http.get(&url).send().await.map_err(|err| {
            if err.is_timeout() {
                RoutingError::Timeout
            } else {
                RoutingError::Http(err.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(RoutingError::Http(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let body: OsrmResponse = response
            .json()
            .await
            .map_err(|err| RoutingError::MalformedResponse(err.to_string()))?;

        if body.code != "Ok" {
            return Err(RoutingError::MalformedResponse(format!(
                "provider code {}",
                body.code
            )));
        }

        if body.routes.is_empty() {
            return Err(RoutingError::NoRoute);
        }

        Ok(body
            .routes
            .into_iter()
            .map(|r| Route {
                distance_meters: r.distance,
                duration_seconds: r.duration,
                polyline: r.geometry,
            })
            .collect())
    }
}
