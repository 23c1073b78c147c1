//! Gateway state
//!
//! Shared dependencies for every WebSocket session.

use crate::connection::ConnectionManager;
use crate::subscription::RoomSubscriber;
use collab_api::DocApi;
use collab_common::{AppConfig, AuthCheck};
use std::sync::Arc;

/// Gateway application state.
#[derive(Clone)]
pub struct GatewayState {
    api: Arc<DocApi>,
    manager: Arc<ConnectionManager>,
    subscriber: Arc<RoomSubscriber>,
    auth: Arc<dyn AuthCheck>,
    config: Arc<AppConfig>,
}

impl GatewayState {
    #[must_use]
    pub fn new(
        api: Arc<DocApi>,
        manager: Arc<ConnectionManager>,
        subscriber: Arc<RoomSubscriber>,
        auth: Arc<dyn AuthCheck>,
        config: AppConfig,
    ) -> Self {
        Self {
            api,
            manager,
            subscriber,
            auth,
            config: Arc::new(config),
        }
    }

    pub fn api(&self) -> &DocApi {
        &self.api
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn subscriber(&self) -> &RoomSubscriber {
        &self.subscriber
    }

    pub fn auth(&self) -> &dyn AuthCheck {
        self.auth.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("connections", &self.manager.count())
            .field("rooms", &self.subscriber.room_count())
            .finish()
    }
}
