use sqlx::PgPool;

use crate::config::Config;
use crate::persistence::PersistenceGateway;
use crate::presence::PresenceRegistry;
use crate::services::{ConversationService, MessageService};
use crate::websocket::ConnectionManager;

/// Shared application state passed to all handlers, extractors, and the hub.
///
/// `ConnectionManager` and `PresenceRegistry` are cheaply cloneable (they
/// wrap an `Arc` internally), so cloning `AppState` for each request or
/// socket task is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub gateway: PersistenceGateway,
    pub messages: MessageService,
    pub conversations: ConversationService,
    pub connections: ConnectionManager,
    pub presence: PresenceRegistry,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let gateway = PersistenceGateway::new(pool.clone());
        let messages = MessageService::new(gateway.clone());
        let conversations = ConversationService::new(gateway.clone());

        AppState {
            pool,
            config,
            gateway,
            messages,
            conversations,
            connections: ConnectionManager::new(),
            presence: PresenceRegistry::new(),
        }
    }
}
