use std::sync::Arc;

use application::{FeedService, HubHandle, Rescorer};

use crate::ws_connection::SessionConfig;
use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub feed: Arc<FeedService>,
    pub rescorer: Arc<dyn Rescorer>,
    pub jwt_service: Arc<JwtService>,
    pub session: SessionConfig,
}

impl AppState {
    pub fn new(
        hub: HubHandle,
        feed: Arc<FeedService>,
        rescorer: Arc<dyn Rescorer>,
        jwt_service: Arc<JwtService>,
        session: SessionConfig,
    ) -> Self {
        Self {
            hub,
            feed,
            rescorer,
            jwt_service,
            session,
        }
    }
}
