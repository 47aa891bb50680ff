pub mod osrm;

use async_trait::async_trait;
use thiserror::Error;

use crate::geo::haversine_m;
use crate::models::order::GeoPoint;
use crate::models::route::Route;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("http error: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider returned no routes")]
    NoRoute,
}

/// External road-routing service. Stateless: two coordinates in, one or more
/// candidate routes out. Concrete providers are swappable so tests can use a
/// deterministic one.
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<Vec<Route>, RoutingError>;
}

/// Offline fallback used when no provider URL is configured: straight-line
/// distance at an assumed urban driving speed, no polyline detail.
pub struct HaversineProvider {
    assumed_speed_kmh: f64,
}

impl HaversineProvider {
    pub fn new(assumed_speed_kmh: f64) -> Self {
        Self { assumed_speed_kmh }
    }
}

impl Default for HaversineProvider {
    fn default() -> Self {
        Self::new(30.0)
    }
}

#[async_trait]
impl RoutingProvider for HaversineProvider {
    fn source_name(&self) -> &'static str {
        "haversine"
    }

    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<Vec<Route>, RoutingError> {
        let distance_meters = haversine_m(&origin, &destination);
        let duration_seconds = distance_meters / (self.assumed_speed_kmh / 3.6);

        Ok(vec![Route {
            distance_meters,
            duration_seconds,
            polyline: String::new(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::{HaversineProvider, RoutingProvider};
    use crate::models::order::GeoPoint;

    #[tokio::test]
    async fn haversine_provider_returns_one_route() {
        let provider = HaversineProvider::new(36.0);
        let origin = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let destination = GeoPoint {
            lat: 53.5611,
            lng: 9.9937,
        };

        let routes = provider.route(origin, destination).await.unwrap();
        assert_eq!(routes.len(), 1);

        let route = &routes[0];
        // Roughly 1.11 km north, so a bit over a kilometre.
        assert!((route.distance_meters - 1_112.0).abs() < 20.0);
        // 36 km/h is 10 m/s.
        assert!((route.duration_seconds - route.distance_meters / 10.0).abs() < 1e-6);
    }
}
