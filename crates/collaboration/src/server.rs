/// Server-side session hosting: one actor task per session
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};
use versioning::VersionStore;

use crate::{
    AutoSaveDue, AutoSaveScheduler, CollabConfig, CollaborationError, LeaveReason, Outgoing,
    Permissions, Result, SessionId, SessionInfo, SessionState, SyncMessage, User, UserId,
};

/// Outbound queue of one connected client
pub type ClientTx = mpsc::UnboundedSender<SyncMessage>;

enum Command {
    Join {
        user: User,
        permissions: Permissions,
        tx: ClientTx,
    },
    Message {
        from: UserId,
        message: SyncMessage,
    },
    Leave {
        user_id: UserId,
    },
    Info {
        reply: oneshot::Sender<SessionInfo>,
    },
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Join the session; the receiver yields everything routed to this user,
    /// starting with `connected`
    pub fn join(&self, user: User, permissions: Permissions) -> Result<mpsc::UnboundedReceiver<SyncMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.command(Command::Join {
            user,
            permissions,
            tx,
        })?;
        Ok(rx)
    }

    /// Queue a message from `from`; handled in arrival order
    pub fn send(&self, from: UserId, message: SyncMessage) -> Result<()> {
        self.command(Command::Message { from, message })
    }

    pub fn leave(&self, user_id: UserId) -> Result<()> {
        self.command(Command::Leave { user_id })
    }

    pub async fn info(&self) -> Result<SessionInfo> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Info { reply })?;
        rx.await
            .map_err(|_| CollaborationError::SessionNotFound(self.id.to_string()))
    }

    fn command(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| CollaborationError::SessionNotFound(self.id.to_string()))
    }
}

/// Start the actor that owns `state`
pub fn spawn_session(state: SessionState, config: &CollabConfig, history_path: Option<PathBuf>) -> SessionHandle {
    let id = state.id();
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = SessionActor {
        state,
        clients: HashMap::new(),
        history_path,
    };
    tokio::spawn(actor.run(rx, config.clone()));
    SessionHandle { id, tx }
}

struct SessionActor {
    state: SessionState,
    clients: HashMap<UserId, ClientTx>,
    history_path: Option<PathBuf>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, config: CollabConfig) {
        let (due_tx, mut due_rx) = mpsc::unbounded_channel::<AutoSaveDue>();
        let autosave = AutoSaveScheduler::spawn(config.auto_save_interval(), due_tx);
        let mut sweep = tokio::time::interval(config.heartbeat_sweep());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Session {} started", self.state.id());

        loop {
            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    let revision = self.state.revision();
                    let versions = self.state.store().len();
                    self.apply(command);
                    if self.state.revision() != revision {
                        autosave.reset();
                    }
                    if self.state.store().len() != versions {
                        self.persist().await;
                    }
                }

                _ = sweep.tick() => {
                    let (dropped, out) = self.state.expire_idle(self.state.now());
                    self.route(out);
                    for user_id in dropped {
                        // Closing the queue tells the client its link is gone
                        self.clients.remove(&user_id);
                    }
                }

                Some(AutoSaveDue) = due_rx.recv() => {
                    match self.state.auto_save() {
                        Ok(out) if !out.is_empty() => {
                            self.route(out);
                            self.persist().await;
                        }
                        Ok(_) => {}
                        Err(e) => error!("Auto-save failed for session {}: {}", self.state.id(), e),
                    }
                }
            }
        }

        info!("Session {} stopped", self.state.id());
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Join {
                user,
                permissions,
                tx,
            } => {
                self.clients.insert(user.id, tx);
                let out = self.state.join(user, permissions);
                self.route(out);
            }
            Command::Message { from, message } => {
                let out = self.state.handle(from, message);
                self.route(out);
            }
            Command::Leave { user_id } => {
                self.clients.remove(&user_id);
                let out = self.state.leave(user_id, LeaveReason::Disconnect);
                self.route(out);
            }
            Command::Info { reply } => {
                let _ = reply.send(self.state.info());
            }
        }
    }

    /// Deliver to connected clients; queues that closed are dropped
    fn route(&mut self, out: Vec<Outgoing>) {
        let mut dead = Vec::new();
        for outgoing in out {
            for (user_id, tx) in &self.clients {
                if !outgoing.to.includes(user_id) {
                    continue;
                }
                if tx.send(outgoing.message.clone()).is_err() {
                    dead.push(*user_id);
                }
            }
        }

        for user_id in dead {
            if self.clients.remove(&user_id).is_some() {
                warn!("Client {} queue closed; removing", user_id);
                let out = self.state.leave(user_id, LeaveReason::Disconnect);
                self.route(out);
            }
        }
    }

    async fn persist(&self) {
        let Some(path) = &self.history_path else {
            return;
        };
        if let Err(e) = self.state.store().save_to(path).await {
            error!("Failed to persist session {}: {}", self.state.id(), e);
        } else {
            debug!("Persisted session {} history", self.state.id());
        }
    }
}

/// Registry of live sessions
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
    config: CollabConfig,
}

impl SessionManager {
    pub fn new(config: CollabConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    /// Create a session, loading its history from the data directory when
    /// one is configured
    pub async fn create_session(&self, session_id: SessionId) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(&session_id) {
            return Err(CollaborationError::InvalidOp(
                "Session already exists".to_string(),
            ));
        }

        let handle = self.start(session_id).await?;
        sessions.insert(session_id, handle.clone());
        Ok(handle)
    }

    /// Join `session_id`, starting it if needed
    ///
    /// Holds the registry lock until the join is queued, so a concurrent
    /// `leave` cannot reap the session in between.
    pub async fn join(
        &self,
        session_id: SessionId,
        user: User,
        permissions: Permissions,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SyncMessage>)> {
        let mut sessions = self.sessions.write().await;
        let handle = match sessions.get(&session_id) {
            Some(handle) => handle.clone(),
            None => {
                info!("Creating new session: {}", session_id);
                let handle = self.start(session_id).await?;
                sessions.insert(session_id, handle.clone());
                handle
            }
        };
        let rx = handle.join(user, permissions)?;
        Ok((handle, rx))
    }

    /// Leave `session_id` and drop the session once nobody is left;
    /// `true` if it was removed
    pub async fn leave(&self, session_id: SessionId, user_id: UserId) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let Some(handle) = sessions.get(&session_id).cloned() else {
            return Ok(false);
        };

        handle.leave(user_id)?;
        let info = handle.info().await?;
        if info.user_count > 0 {
            return Ok(false);
        }
        info!("Session {} is empty, removing", session_id);
        sessions.remove(&session_id);
        Ok(true)
    }

    /// Existing session, or a new one
    pub async fn get_or_create(&self, session_id: SessionId) -> Result<SessionHandle> {
        if let Some(handle) = self.sessions.read().await.get(&session_id) {
            return Ok(handle.clone());
        }

        let mut sessions = self.sessions.write().await;
        if let Some(handle) = sessions.get(&session_id) {
            return Ok(handle.clone());
        }
        info!("Creating new session: {}", session_id);
        let handle = self.start(session_id).await?;
        sessions.insert(session_id, handle.clone());
        Ok(handle)
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| CollaborationError::SessionNotFound(session_id.to_string()))
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn start(&self, session_id: SessionId) -> Result<SessionHandle> {
        let history_path = self
            .config
            .data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", session_id)));

        let store = match &history_path {
            Some(path) => VersionStore::load_or_default(path, self.config.store_config()).await?,
            None => VersionStore::new(self.config.store_config()),
        };

        let state = SessionState::new(session_id, &self.config, store);
        Ok(spawn_session(state, &self.config, history_path))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(CollabConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;
    use std::time::Duration;

    async fn recv(rx: &mut mpsc::UnboundedReceiver<SyncMessage>) -> SyncMessage {
        tokio::select! {
            msg = rx.recv() => msg.expect("channel closed"),
            _ = tokio::time::sleep(Duration::from_millis(500)) => panic!("Timeout waiting for message"),
        }
    }

    #[tokio::test]
    async fn test_session_creation() {
        let manager = SessionManager::default();
        let session_id = SessionId::new();

        let result = manager.create_session(session_id).await;
        assert!(result.is_ok());

        // Try creating again - should fail
        let result = manager.create_session(session_id).await;
        assert!(result.is_err());
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_content_change() {
        let manager = SessionManager::default();
        let session = manager.get_or_create(SessionId::new()).await.unwrap();

        let alice = User::new(UserId::new(), "Alice");
        let bob = User::new(UserId::new(), "Bob");
        let mut rx1 = session.join(alice.clone(), Permissions::owner()).unwrap();
        let mut rx2 = session.join(bob.clone(), Permissions::editor()).unwrap();

        assert!(matches!(recv(&mut rx1).await, SyncMessage::Connected { .. }));
        assert!(matches!(recv(&mut rx2).await, SyncMessage::Connected { .. }));
        assert!(matches!(recv(&mut rx1).await, SyncMessage::Event { .. }));

        session
            .send(
                alice.id,
                SyncMessage::Submit {
                    kind: EventKind::ContentChange {
                        content: "Summary".into(),
                        base_checksum: None,
                    },
                },
            )
            .unwrap();

        match recv(&mut rx2).await {
            SyncMessage::Event { event } => {
                assert_eq!(event.user_id, alice.id);
                assert_eq!(
                    event.kind,
                    EventKind::ContentChange {
                        content: "Summary".into(),
                        base_checksum: Some(versioning::checksum("")),
                    }
                );
            }
            other => panic!("Expected event, got {:?}", other),
        }

        let info = session.info().await.unwrap();
        assert_eq!(info.user_count, 2);
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let session = SessionManager::default()
            .get_or_create(SessionId::new())
            .await
            .unwrap();
        let alice = User::new(UserId::new(), "Alice");
        let mut rx = session.join(alice.clone(), Permissions::editor()).unwrap();
        recv(&mut rx).await;

        session.send(alice.id, SyncMessage::Ping).unwrap();
        assert_eq!(recv(&mut rx).await, SyncMessage::Pong);
    }

    #[tokio::test]
    async fn test_history_persisted_to_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollabConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let session_id = SessionId::new();
        let manager = SessionManager::new(config.clone());
        let session = manager.get_or_create(session_id).await.unwrap();

        let owner = User::new(UserId::new(), "Olive");
        let mut rx = session.join(owner.clone(), Permissions::owner()).unwrap();
        recv(&mut rx).await;

        session
            .send(
                owner.id,
                SyncMessage::Submit {
                    kind: EventKind::ContentChange {
                        content: "Jane Doe\n".into(),
                        base_checksum: None,
                    },
                },
            )
            .unwrap();
        session
            .send(
                owner.id,
                SyncMessage::SaveVersion {
                    title: "first".into(),
                    description: None,
                    milestone: false,
                },
            )
            .unwrap();
        assert!(matches!(recv(&mut rx).await, SyncMessage::Event { .. }));
        session.info().await.unwrap();

        let reopened = SessionManager::new(config);
        let restored = reopened.get_or_create(session_id).await.unwrap();
        let info = restored.info().await.unwrap();
        assert_eq!(info.version_count, 1);
        assert_eq!(info.checksum, versioning::checksum("Jane Doe\n"));
    }

    #[tokio::test]
    async fn test_last_leave_removes_session() {
        let manager = SessionManager::default();
        let session_id = SessionId::new();
        let alice = User::new(UserId::new(), "Alice");
        let bob = User::new(UserId::new(), "Bob");

        let (_, _rx1) = manager.join(session_id, alice.clone(), Permissions::owner()).await.unwrap();
        let (session, _rx2) = manager.join(session_id, bob.clone(), Permissions::editor()).await.unwrap();
        assert_eq!(manager.session_count().await, 1);

        assert!(!manager.leave(session_id, alice.id).await.unwrap());
        assert_eq!(session.info().await.unwrap().user_count, 1);

        assert!(manager.leave(session_id, bob.id).await.unwrap());
        assert_eq!(manager.session_count().await, 0);
        assert!(!manager.leave(session_id, bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_join_racing_last_leave_keeps_session() {
        let manager = Arc::new(SessionManager::default());
        let session_id = SessionId::new();
        let alice = User::new(UserId::new(), "Alice");
        let (_, _rx) = manager.join(session_id, alice.clone(), Permissions::owner()).await.unwrap();

        let leaving = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.leave(session_id, alice.id).await })
        };
        let bob = User::new(UserId::new(), "Bob");
        let (session, mut rx) = manager.join(session_id, bob, Permissions::editor()).await.unwrap();
        leaving.await.unwrap().unwrap();

        // Whichever ran first, Bob sits in the registered session
        assert!(matches!(recv(&mut rx).await, SyncMessage::Connected { .. }));
        assert_eq!(session.info().await.unwrap().user_count, 1);
        let registered = manager.get_session(session_id).await.unwrap();
        assert_eq!(registered.info().await.unwrap().user_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_user_queue_is_closed() {
        let config = CollabConfig {
            heartbeat_timeout_ms: 300,
            heartbeat_sweep_ms: 50,
            ..Default::default()
        };
        let session = SessionManager::new(config)
            .get_or_create(SessionId::new())
            .await
            .unwrap();
        let alice = User::new(UserId::new(), "Alice");
        let mut rx = session.join(alice.clone(), Permissions::editor()).unwrap();
        assert!(matches!(recv(&mut rx).await, SyncMessage::Connected { .. }));

        tokio::time::sleep(Duration::from_millis(600)).await;

        match rx.recv().await {
            Some(SyncMessage::Event { event }) => {
                assert_eq!(event.user_id, alice.id);
                assert_eq!(event.kind, EventKind::UserLeave { reason: crate::LeaveReason::Timeout });
            }
            other => panic!("Expected own user-leave, got {:?}", other),
        }
        assert!(rx.recv().await.is_none());
        assert_eq!(session.info().await.unwrap().user_count, 0);
    }
}
