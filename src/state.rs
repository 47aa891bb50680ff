use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::models::delivery::Delivery;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::realtime::RealtimeBroadcaster;
use crate::routing::RoutingProvider;
use crate::tracking::estimator::RouteEstimator;
use crate::tracking::session::TrackingSession;

pub struct AppState {
    pub config: Config,
    pub orders: DashMap<Uuid, Order>,
    pub deliveries: DashMap<Uuid, Delivery>,
    /// Order -> delivery index; also the "one delivery per order" guard.
    pub delivery_by_order: DashMap<Uuid, Uuid>,
    pub broadcaster: RealtimeBroadcaster,
    pub estimator: RouteEstimator,
    /// Driver-side timer bundles, keyed by delivery. Cancelled by the state
    /// machine the moment the delivery terminates.
    pub sessions: DashMap<Uuid, TrackingSession>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, provider: Arc<dyn RoutingProvider>) -> Self {
        let metrics = Metrics::new();
        let estimator = RouteEstimator::new(provider, config.route_throttle, metrics.clone());

        Self {
            broadcaster: RealtimeBroadcaster::new(config.event_buffer_size),
            estimator,
            config,
            orders: DashMap::new(),
            deliveries: DashMap::new(),
            delivery_by_order: DashMap::new(),
            sessions: DashMap::new(),
            metrics,
        }
    }

    /// Stops the delivery's timer bundle, if one is running in this process.
    pub fn cancel_session(&self, delivery_id: Uuid) {
        if let Some((_, session)) = self.sessions.remove(&delivery_id) {
            session.stop();
        }
    }
}
