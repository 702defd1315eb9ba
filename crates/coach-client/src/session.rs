use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use coach_types::events::{ClientCommand, HistoryRequest, SendMessageData, ServerEvent};
use coach_types::models::{Media, MessageId, UserId};

use crate::config::SessionConfig;
use crate::listeners::{Listeners, Subscription};
use crate::state::ConnectionState;
use crate::transport::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, Connector, Frame, TransportEvent, WsConnector, handshake_url,
};

/// Error carried by the final `disconnected` state once retries run out.
pub const RECONNECT_EXHAUSTED: &str = "reconnect attempts exhausted";

/// Body of a media message. `text` is usually a short caption and may be empty.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub text: String,
    pub media: Media,
}

/// One logical chat connection for the lifetime of an app session.
///
/// Survives transport drops by reconnecting with exponential backoff until
/// [`SessionManager::disconnect`] is called or retries are exhausted. Cheap to
/// clone; clones share the same session. Must be used from within a Tokio
/// runtime.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    session: Mutex<Session>,
    message_listeners: Listeners<ServerEvent>,
    state_listeners: Listeners<ConnectionState>,
}

#[derive(Default)]
struct Session {
    current_user: Option<UserId>,
    endpoint: String,
    /// Present only while a transport is open.
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    /// Bumped by every connect, retry and disconnect. Tasks and timers holding
    /// an older value are stale and must not touch the session.
    generation: u64,
    reconnect_attempts: u32,
    exhausted: bool,
    state: ConnectionState,
}

enum AfterClose {
    Stay,
    Retry(Duration),
    GiveUp,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(WsConnector, config)
    }

    pub fn with_connector(connector: impl Connector, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                config,
                session: Mutex::new(Session::default()),
                message_listeners: Listeners::new(),
                state_listeners: Listeners::new(),
            }),
        }
    }

    /// Open a connection for `user_id`, closing any existing one first.
    pub fn connect(&self, user_id: UserId, endpoint: impl Into<String>) {
        let generation = {
            let mut session = self.lock();
            if let Some(outbound) = session.outbound.take() {
                let _ = outbound.send(Frame::Close {
                    code: CLOSE_NORMAL,
                    reason: "Reconnecting".into(),
                });
            }
            session.current_user = Some(user_id);
            session.endpoint = endpoint.into();
            session.reconnect_attempts = 0;
            session.exhausted = false;
            session.generation += 1;
            session.generation
        };
        self.start_attempt(generation);
    }

    /// Close with a normal-closure code and forget the user, all listeners and
    /// the retry counter. Cancels any pending reconnect.
    pub fn disconnect(&self) {
        let outbound = {
            let mut session = self.lock();
            session.generation += 1;
            session.current_user = None;
            session.reconnect_attempts = 0;
            session.exhausted = false;
            session.state = ConnectionState::disconnected();
            session.outbound.take()
        };
        if let Some(outbound) = outbound {
            let _ = outbound.send(Frame::Close {
                code: CLOSE_NORMAL,
                reason: "Client disconnect".into(),
            });
        }
        self.inner.message_listeners.clear();
        self.inner.state_listeners.clear();
        info!("chat session disconnected");
    }

    /// Reopen the transport for the current user, keeping listeners.
    pub fn force_reconnect(&self) {
        let target = {
            let session = self.lock();
            session
                .current_user
                .map(|user_id| (user_id, session.endpoint.clone()))
        };
        if let Some((user_id, endpoint)) = target {
            self.connect(user_id, endpoint);
        }
    }

    pub fn send_message(&self, receiver_id: UserId, text: &str) -> bool {
        let Some(user_id) = self.current_user() else {
            warn!("send_message without a current user");
            return false;
        };
        self.send_command(&ClientCommand::SendMessage {
            data: SendMessageData::text(user_id, receiver_id, text),
        })
    }

    pub fn send_media_message(&self, receiver_id: UserId, payload: MediaPayload) -> bool {
        let Some(user_id) = self.current_user() else {
            warn!("send_media_message without a current user");
            return false;
        };
        self.send_command(&ClientCommand::SendMessage {
            data: SendMessageData::text(user_id, receiver_id, payload.text).with_media(payload.media),
        })
    }

    pub fn mark_as_read(&self, message_id: MessageId) -> bool {
        self.send_command(&ClientCommand::MarkRead { message_id })
    }

    pub fn request_history(&self, other_user_id: UserId) -> bool {
        self.send_command(&ClientCommand::GetChatHistory {
            data: Some(HistoryRequest {
                other_user_id: Some(other_user_id),
            }),
        })
    }

    pub fn ping(&self) -> bool {
        self.send_command(&ClientCommand::Ping)
    }

    /// Every event the relay sends, in arrival order.
    pub fn on_message(&self, callback: impl Fn(&ServerEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.message_listeners.subscribe(callback)
    }

    pub fn on_connection_change(
        &self,
        callback: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.state_listeners.subscribe(callback)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.lock().outbound.is_some()
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.lock().current_user
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    /// True once automatic retries have given up. Cleared by `connect`.
    pub fn reconnect_exhausted(&self) -> bool {
        self.lock().exhausted
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn send_command(&self, command: &ClientCommand) -> bool {
        let text = match serde_json::to_string(command) {
            Ok(text) => text,
            Err(e) => {
                warn!("could not encode chat command: {}", e);
                return false;
            }
        };

        let session = self.lock();
        match &session.outbound {
            Some(outbound) => outbound.send(Frame::Text(text)).is_ok(),
            None => {
                warn!("chat socket not open, command dropped");
                false
            }
        }
    }

    /// Publish a state change, unless `generation` has been superseded.
    fn set_state(&self, generation: u64, state: ConnectionState) {
        {
            let mut session = self.lock();
            if session.generation != generation {
                return;
            }
            session.state = state.clone();
        }
        self.inner.state_listeners.emit(&state);
    }

    fn start_attempt(&self, generation: u64) {
        self.set_state(generation, ConnectionState::connecting());
        let this = self.clone();
        tokio::spawn(async move { this.run_transport(generation).await });
    }

    async fn run_transport(&self, generation: u64) {
        let url = {
            let session = self.lock();
            match session.current_user {
                Some(user_id) if session.generation == generation => {
                    handshake_url(&session.endpoint, user_id)
                }
                _ => return,
            }
        };
        debug!("opening chat socket {}", url);

        let transport = match self.inner.connector.open(url).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("could not open chat socket: {:#}", e);
                self.on_closed(generation, CLOSE_ABNORMAL, Some("Failed to create connection"));
                return;
            }
        };

        {
            let mut session = self.lock();
            if session.generation != generation {
                let _ = transport.outbound.send(Frame::Close {
                    code: CLOSE_NORMAL,
                    reason: "Superseded".into(),
                });
                return;
            }
            session.outbound = Some(transport.outbound);
            session.reconnect_attempts = 0;
            session.exhausted = false;
        }
        info!("chat socket open");
        self.set_state(generation, ConnectionState::connected());

        self.read_loop(generation, transport.inbound).await;
    }

    async fn read_loop(&self, generation: u64, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = inbound.recv().await {
            if !self.is_current(generation) {
                return;
            }
            match event {
                TransportEvent::Text(text) => self.dispatch(&text),
                TransportEvent::Error(error) => {
                    warn!("chat socket error: {}", error);
                    {
                        let mut session = self.lock();
                        if session.generation == generation {
                            session.outbound = None;
                        }
                    }
                    self.set_state(generation, ConnectionState::failed("Connection error"));
                }
                TransportEvent::Closed { code, reason } => {
                    info!("chat socket closed: {} {}", code, reason);
                    self.on_closed(generation, code, None);
                    return;
                }
            }
        }
        // Transport went away without a close event
        self.on_closed(generation, CLOSE_ABNORMAL, None);
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                if let ServerEvent::Error { error } = &event {
                    warn!("relay reported error: {}", error);
                }
                self.inner.message_listeners.emit(&event);
            }
            Err(e) => warn!("unparseable frame from relay: {}", e),
        }
    }

    /// Transport for `generation` is gone. Decide whether to retry.
    fn on_closed(&self, generation: u64, code: u16, error: Option<&str>) {
        let next = {
            let mut session = self.lock();
            if session.generation != generation || session.current_user.is_none() {
                return;
            }
            session.outbound = None;
            if code == CLOSE_NORMAL {
                AfterClose::Stay
            } else {
                match self.inner.config.reconnect_delay(session.reconnect_attempts) {
                    Some(delay) => AfterClose::Retry(delay),
                    None => {
                        session.exhausted = true;
                        AfterClose::GiveUp
                    }
                }
            }
        };

        let state = match error {
            Some(error) => ConnectionState::failed(error),
            None => ConnectionState::disconnected(),
        };
        match next {
            AfterClose::Stay => self.set_state(generation, state),
            AfterClose::Retry(delay) => {
                self.set_state(generation, state);
                info!("reconnecting in {}ms", delay.as_millis());
                self.schedule_reconnect(generation, delay);
            }
            AfterClose::GiveUp => {
                warn!(
                    "giving up after {} reconnect attempts",
                    self.inner.config.max_attempts
                );
                self.set_state(generation, ConnectionState::failed(RECONNECT_EXHAUSTED));
            }
        }
    }

    fn schedule_reconnect(&self, generation: u64, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let next_generation = {
                let mut session = this.lock();
                // disconnect() or a newer connect() ran while we slept
                if session.generation != generation || session.current_user.is_none() {
                    return;
                }
                session.reconnect_attempts += 1;
                session.generation += 1;
                session.generation
            };
            this.start_attempt(next_generation);
        });
    }
}
