use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One candidate route as returned by a RoutingProvider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub polyline: String,
}

/// The estimate held per active delivery. Ephemeral: recomputed under the
/// throttle, cleared when the delivery terminates, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub primary_polyline: String,
    /// Remaining candidates, ascending by distance.
    pub alternate_polylines: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

impl RouteEstimate {
    /// Sorts candidates ascending by distance and takes the shortest as
    /// primary. Returns None for an empty candidate list.
    pub fn from_candidates(mut routes: Vec<Route>) -> Option<Self> {
        if routes.is_empty() {
            return None;
        }

        routes.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        let primary = routes.remove(0);

        Some(Self {
            distance_meters: primary.distance_meters,
            duration_seconds: primary.duration_seconds,
            primary_polyline: primary.polyline,
            alternate_polylines: routes.into_iter().map(|r| r.polyline).collect(),
            computed_at: Utc::now(),
        })
    }
}
