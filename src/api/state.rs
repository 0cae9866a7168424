use std::sync::Arc;

use crate::api::auth::BusAuth;
use crate::bus::{InProcessBus, Topics};
use crate::services::HealthState;

/// Shared state for the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthState>,
    pub bus: Arc<InProcessBus>,
    pub topics: Topics,
    pub auth: Arc<BusAuth>,
}

impl AppState {
    pub fn new(
        health: Arc<HealthState>,
        bus: Arc<InProcessBus>,
        topics: Topics,
        auth: BusAuth,
    ) -> Self {
        Self {
            health,
            bus,
            topics,
            auth: Arc::new(auth),
        }
    }
}
