use axum::http::StatusCode;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::participant_token::{ParticipantTokens, TokenError};
use crate::db::dbsession::DbSession;
use crate::db::store::StoreError;
use crate::models::ids::{generate_session_id, is_valid_participant_id, is_valid_session_id};
use crate::models::{
    api_error, internal_error, ApiError, SessionCreateRequest, SessionCreateResponse, SessionEndResponse,
    SessionJoinRequest, SessionJoinResponse, SessionMetadata, SessionStatusResponse,
};
use crate::ws::presence::clean_display_name;
use crate::ws::registry::{RegistryError, SessionRegistry};

const MAX_NOTE_ID_CHARS: usize = 256;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid session id")]
    InvalidSessionId,
    #[error("invalid {0}")]
    InvalidField(&'static str),
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidSessionId => api_error(StatusCode::BAD_REQUEST, "Invalid session id"),
            ServiceError::InvalidField(field) => api_error(StatusCode::BAD_REQUEST, format!("Invalid {}", field)),
            ServiceError::NotFound => api_error(StatusCode::NOT_FOUND, "Session not found"),
            ServiceError::Expired => api_error(StatusCode::GONE, "Session expired"),
            ServiceError::Store(_) | ServiceError::Registry(_) | ServiceError::Token(_) => {
                error!("Session request failed: {}", e);
                internal_error()
            }
        }
    }
}

/// Control-plane operations over the session store
pub struct SessionService {
    db: DbSession,
    registry: Arc<SessionRegistry>,
    tokens: Option<Arc<ParticipantTokens>>,
    session_ttl: Duration,
}

impl SessionService {
    pub fn new(
        db: DbSession,
        registry: Arc<SessionRegistry>,
        tokens: Option<Arc<ParticipantTokens>>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            db,
            registry,
            tokens,
            session_ttl,
        }
    }

    /// Start a session on a note; the host is its first participant
    pub async fn create(&self, request: SessionCreateRequest) -> Result<SessionCreateResponse, ServiceError> {
        let note_id = request.note_id.trim();
        if note_id.is_empty() || note_id.chars().count() > MAX_NOTE_ID_CHARS {
            return Err(ServiceError::InvalidField("noteId"));
        }
        if !is_valid_participant_id(&request.host_id) {
            return Err(ServiceError::InvalidField("hostId"));
        }
        let ttl = chrono::Duration::from_std(self.session_ttl)
            .map_err(|_| ServiceError::InvalidField("session lifetime"))?;

        let now = Utc::now();
        let metadata = SessionMetadata {
            session_id: generate_session_id(),
            note_id: note_id.to_string(),
            host_id: request.host_id.clone(),
            participants: BTreeSet::from([request.host_id]),
            created_at: now,
            expires_at: now + ttl,
        };
        self.db.save_metadata(&metadata, self.session_ttl).await?;
        info!(
            "Session {} created for note {} by {}",
            metadata.session_id, metadata.note_id, metadata.host_id
        );

        Ok(SessionCreateResponse {
            ws_path: ws_path(&metadata.session_id),
            session_id: metadata.session_id,
            note_id: metadata.note_id,
            host_id: metadata.host_id,
            created_at: metadata.created_at,
            expires_at: metadata.expires_at,
        })
    }

    /// Validate a session for a prospective participant. Does not modify the session.
    pub async fn join(&self, session_id: &str, request: SessionJoinRequest) -> Result<SessionJoinResponse, ServiceError> {
        let metadata = self.load_active(session_id).await?;

        let participant_id = match request.participant_id {
            Some(id) if is_valid_participant_id(&id) => id,
            Some(_) => return Err(ServiceError::InvalidField("participantId")),
            None => format!("p-{}", Uuid::new_v4().simple()),
        };
        let display_name = request.display_name.as_deref().and_then(clean_display_name);
        let participant_token = match &self.tokens {
            Some(tokens) => Some(tokens.issue(session_id, &participant_id, metadata.expires_at)?),
            None => None,
        };

        Ok(SessionJoinResponse {
            session_id: metadata.session_id,
            note_id: metadata.note_id,
            expires_at: metadata.expires_at,
            participant_id,
            display_name,
            participant_token,
            ws_path: ws_path(session_id),
        })
    }

    /// Close live sockets and delete every durable key of the session
    pub async fn end(&self, session_id: &str) -> Result<SessionEndResponse, ServiceError> {
        if !is_valid_session_id(session_id) {
            return Err(ServiceError::InvalidSessionId);
        }
        if self.db.load_metadata(session_id).await?.is_none() {
            return Err(ServiceError::NotFound);
        }
        let was_live = self.registry.end(session_id).await?;
        info!("Session {} ended (live: {})", session_id, was_live);
        Ok(SessionEndResponse { ended: true })
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatusResponse, ServiceError> {
        let metadata = self.load_active(session_id).await?;
        let participants = self.db.list_presence(session_id).await?;
        let live = self.registry.get(session_id).await;

        Ok(SessionStatusResponse {
            session_id: metadata.session_id,
            note_id: metadata.note_id,
            host_id: metadata.host_id,
            created_at: metadata.created_at,
            expires_at: metadata.expires_at,
            participant_count: participants.len(),
            participants,
            live: live.as_ref().is_some_and(|s| !s.is_closed()),
            connections: live.map_or(0, |s| s.connection_count()),
        })
    }

    async fn load_active(&self, session_id: &str) -> Result<SessionMetadata, ServiceError> {
        if !is_valid_session_id(session_id) {
            return Err(ServiceError::InvalidSessionId);
        }
        let metadata = self
            .db
            .load_metadata(session_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        if metadata.is_expired_at(Utc::now()) {
            return Err(ServiceError::Expired);
        }
        Ok(metadata)
    }
}

pub fn ws_path(session_id: &str) -> String {
    format!("/ws/{}", session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memstore::MemoryStore;
    use crate::replica::fake::SetReplicaFactory;
    use crate::ws::connection::ConnectionHandler;
    use crate::ws::presence::ParticipantInfo;
    use crate::ws::registry::RegistrySettings;
    use tokio::sync::mpsc;

    struct Harness {
        service: SessionService,
        handler: ConnectionHandler,
        db: DbSession,
    }

    fn harness(tokens: Option<ParticipantTokens>) -> Harness {
        harness_with_ttl(tokens, Duration::from_secs(1200))
    }

    fn harness_with_ttl(tokens: Option<ParticipantTokens>, session_ttl: Duration) -> Harness {
        let db = DbSession::new(Arc::new(MemoryStore::new()), "test");
        let registry = Arc::new(SessionRegistry::new(
            db.clone(),
            Arc::new(SetReplicaFactory::default()),
            RegistrySettings {
                grace_period: Duration::from_secs(30),
                idle_ttl: Duration::from_secs(1200),
                max_participants: 8,
            },
        ));
        Harness {
            service: SessionService::new(
                db.clone(),
                registry.clone(),
                tokens.map(Arc::new),
                session_ttl,
            ),
            handler: ConnectionHandler::new(registry, db.clone()),
            db,
        }
    }

    fn create_request() -> SessionCreateRequest {
        SessionCreateRequest {
            note_id: "abc".to_string(),
            host_id: "host".to_string(),
        }
    }

    #[tokio::test]
    async fn created_sessions_can_be_joined() {
        let h = harness(None);
        let created = h.service.create(create_request()).await.unwrap();
        assert!(is_valid_session_id(&created.session_id));
        assert_eq!(created.ws_path, format!("/ws/{}", created.session_id));
        assert_eq!(created.expires_at - created.created_at, chrono::Duration::seconds(1200));

        let joined = h
            .service
            .join(&created.session_id, SessionJoinRequest::default())
            .await
            .unwrap();
        assert_eq!(joined.note_id, "abc");
        assert!(joined.participant_id.starts_with("p-"));
        assert!(joined.participant_token.is_none());
    }

    #[tokio::test]
    async fn create_rejects_blank_notes() {
        let h = harness(None);
        let request = SessionCreateRequest {
            note_id: "  ".to_string(),
            host_id: "host".to_string(),
        };
        assert!(matches!(
            h.service.create(request).await,
            Err(ServiceError::InvalidField("noteId"))
        ));
    }

    #[tokio::test]
    async fn join_issues_a_token_when_configured() {
        let h = harness(Some(ParticipantTokens::new("secret")));
        let created = h.service.create(create_request()).await.unwrap();
        let joined = h
            .service
            .join(
                &created.session_id,
                SessionJoinRequest {
                    participant_id: Some("alice".to_string()),
                    display_name: Some(" Alice ".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(joined.display_name.as_deref(), Some("Alice"));
        let token = joined.participant_token.unwrap();
        let verified = ParticipantTokens::new("secret")
            .verify(&token, &created.session_id)
            .unwrap();
        assert_eq!(verified, "alice");
    }

    #[tokio::test]
    async fn unknown_and_malformed_sessions() {
        let h = harness(None);
        assert!(matches!(
            h.service.status("nope").await,
            Err(ServiceError::InvalidSessionId)
        ));
        assert!(matches!(
            h.service.status(&generate_session_id()).await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            h.service.end(&generate_session_id()).await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn expired_sessions_report_gone() {
        let h = harness(None);
        let now = Utc::now();
        let metadata = SessionMetadata {
            session_id: generate_session_id(),
            note_id: "abc".to_string(),
            host_id: "host".to_string(),
            participants: BTreeSet::new(),
            created_at: now - chrono::Duration::seconds(1300),
            expires_at: now - chrono::Duration::seconds(100),
        };
        h.db.save_metadata(&metadata, Duration::from_secs(60)).await.unwrap();

        let result = h.service.join(&metadata.session_id, SessionJoinRequest::default()).await;
        assert!(matches!(result, Err(ServiceError::Expired)));
    }

    #[tokio::test]
    async fn status_counts_the_participants_still_connected() {
        let h = harness(None);
        let sid = h.service.create(create_request()).await.unwrap().session_id;
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = h.handler.accept(&sid, ParticipantInfo::new("a"), tx.clone()).await.unwrap();
        let _b = h.handler.accept(&sid, ParticipantInfo::new("b"), tx).await.unwrap();

        h.handler.on_close(&a).await;

        let status = h.service.status(&sid).await.unwrap();
        assert_eq!(status.participant_count, 1);
        assert_eq!(status.participants[0].participant_id, "b");
        assert!(status.live);
        assert_eq!(status.connections, 1);
    }

    #[tokio::test]
    async fn end_closes_sockets_and_deletes_everything() {
        let h = harness(None);
        let sid = h.service.create(create_request()).await.unwrap().session_id;
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.handler.accept(&sid, ParticipantInfo::new("a"), tx).await.unwrap();

        assert!(h.service.end(&sid).await.unwrap().ended);

        assert!(h.db.load_metadata(&sid).await.unwrap().is_none());
        assert!(h.db.list_presence(&sid).await.unwrap().is_empty());
        assert!(matches!(h.service.status(&sid).await, Err(ServiceError::NotFound)));

        let mut last = None;
        while let Ok(outbound) = rx.try_recv() {
            last = Some(outbound);
        }
        assert_eq!(
            last,
            Some(crate::ws::session::Outbound::Close(crate::ws::close::CloseReason::SessionEnded))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn untouched_sessions_are_gone_after_their_lifetime() {
        let ttl = Duration::from_secs(60);
        let h = harness_with_ttl(None, ttl);
        let sid = h.service.create(create_request()).await.unwrap().session_id;
        assert!(h.service.status(&sid).await.is_ok());

        tokio::time::advance(ttl + Duration::from_secs(1)).await;

        assert!(matches!(h.service.status(&sid).await, Err(ServiceError::NotFound)));
        assert!(matches!(
            h.service.join(&sid, SessionJoinRequest::default()).await,
            Err(ServiceError::NotFound)
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        let accepted = h.handler.accept(&sid, ParticipantInfo::new("a"), tx).await;
        assert_eq!(accepted.err(), Some(crate::ws::close::CloseReason::NotFound));
    }
}
