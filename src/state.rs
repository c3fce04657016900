use std::sync::Arc;

use crate::auth::participant_token::ParticipantTokens;
use crate::config::Config;
use crate::db::dbsession::DbSession;
use crate::db::store::SessionStore;
use crate::replica::ReplicaFactory;
use crate::services::session_service::SessionService;
use crate::ws::connection::ConnectionHandler;
use crate::ws::registry::{RegistrySettings, SessionRegistry};
use crate::ws::sweeper::ExpirySweeper;

/// Everything the handlers share
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbSession,
    pub registry: Arc<SessionRegistry>,
    pub connections: Arc<ConnectionHandler>,
    pub sessions: Arc<SessionService>,
    pub tokens: Option<Arc<ParticipantTokens>>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn SessionStore>, factory: Arc<dyn ReplicaFactory>) -> Self {
        let db = DbSession::new(store, &config.store_key_prefix);
        let registry = Arc::new(SessionRegistry::new(
            db.clone(),
            factory,
            RegistrySettings {
                grace_period: config.grace_period(),
                idle_ttl: config.idle_ttl(),
                max_participants: config.max_participants,
            },
        ));
        let tokens = config
            .participant_token_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| Arc::new(ParticipantTokens::new(secret)));
        let connections = Arc::new(ConnectionHandler::new(registry.clone(), db.clone()));
        let sessions = Arc::new(SessionService::new(
            db.clone(),
            registry.clone(),
            tokens.clone(),
            config.session_ttl(),
        ));

        Self {
            config: Arc::new(config),
            db,
            registry,
            connections,
            sessions,
            tokens,
        }
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(self.registry.clone(), self.db.clone(), self.config.sweep_interval())
    }
}
