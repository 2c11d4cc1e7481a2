//! The device session state machine
//!
//! A [`Session`] owns the device identity, the token signer, the current
//! token, the transport and the observer slots. It performs no background
//! work: broker traffic only moves while the caller awaits [`Session::pump`]
//! (or one of the looping variants).

use super::observers::{
    CallbackResult, Notification, Observers, PendingAction, SessionContext,
};
use super::state::{effective_keep_alive, SessionState, DEFAULT_KEEP_ALIVE_SECS};
use super::SessionError;
use crate::auth::{Token, TokenSigner};
use crate::protocol::{resolve_with, DeviceIdentity, TopicKind, TopicPath, TopicScheme};
use crate::time::{Clock, HttpFetch, TimeServiceCredentials, TimeSource, Timestamp};
use crate::transport::{ConnectParams, QoS, Transport, TransportError, TransportEvent};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// The bridge ignores the username; the token travels as the password
pub const MQTT_USERNAME: &str = "unused";

/// Default bound on waiting for the connection acknowledgment
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated broker session for one device
pub struct Session<T: Transport> {
    identity: DeviceIdentity,
    signer: TokenSigner,
    transport: T,
    clock: Arc<dyn Clock>,
    topic_scheme: TopicScheme,
    keep_alive: Duration,
    connect_timeout: Duration,
    state: SessionState,
    token: Option<Token>,
    observers: Observers,
    backlog: VecDeque<TransportEvent>,
}

impl<T: Transport> Session<T> {
    pub fn new(
        identity: DeviceIdentity,
        signer: TokenSigner,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            signer,
            transport,
            clock,
            topic_scheme: TopicScheme::default(),
            keep_alive: effective_keep_alive(DEFAULT_KEEP_ALIVE_SECS),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            state: SessionState::Disconnected,
            token: None,
            observers: Observers::default(),
            backlog: VecDeque::new(),
        }
    }

    /// Requested keep-alive, clamped to the broker quota
    pub fn with_keep_alive(mut self, keep_alive_secs: u64) -> Self {
        let effective = effective_keep_alive(keep_alive_secs);
        if effective.as_secs() != keep_alive_secs {
            debug!(
                configured = keep_alive_secs,
                effective = effective.as_secs(),
                "Keep-alive outside broker quota, clamped"
            );
        }
        self.keep_alive = effective;
        self
    }

    pub fn with_topic_scheme(mut self, scheme: TopicScheme) -> Self {
        self.topic_scheme = scheme;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn client_id(&self) -> String {
        self.identity.client_id()
    }

    pub fn effective_keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn topic_scheme(&self) -> TopicScheme {
        self.topic_scheme
    }

    pub fn current_token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolve a topic for this device under the session's scheme
    pub fn topic(&self, kind: TopicKind, subfolder: Option<&str>) -> Result<TopicPath, SessionError> {
        Ok(resolve_with(self.topic_scheme, &self.identity, kind, subfolder)?)
    }

    // ---- observers ----

    pub fn on_connect(
        &mut self,
        callback: impl FnMut(&mut SessionContext, u8) -> CallbackResult + Send + 'static,
    ) {
        self.observers.set_on_connect(callback);
    }

    pub fn on_disconnect(
        &mut self,
        callback: impl FnMut(&mut SessionContext) -> CallbackResult + Send + 'static,
    ) {
        self.observers.set_on_disconnect(callback);
    }

    pub fn on_message(
        &mut self,
        callback: impl FnMut(&mut SessionContext, &str, &[u8]) -> CallbackResult + Send + 'static,
    ) {
        self.observers.set_on_message(callback);
    }

    pub fn on_subscribe(
        &mut self,
        callback: impl FnMut(&mut SessionContext, u16, &[u8]) -> CallbackResult + Send + 'static,
    ) {
        self.observers.set_on_subscribe(callback);
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    // ---- tokens ----

    /// True when there is no token or `now >= expires_at`
    pub fn token_is_stale(&self, now: Timestamp) -> bool {
        self.token.as_ref().map_or(true, |token| token.is_stale(now))
    }

    /// True when there is no token or it expires within `margin_secs` of `now`
    pub fn token_expires_within(&self, now: Timestamp, margin_secs: u64) -> bool {
        let margin = i64::try_from(margin_secs).unwrap_or(i64::MAX);
        self.token
            .as_ref()
            .map_or(true, |token| now.saturating_add(margin) >= token.expires_at())
    }

    /// Issue a fresh token at `now`, replacing the current one
    ///
    /// An open connection keeps using the token it was opened with; reconnect
    /// to present the new one.
    pub fn reissue_token(&mut self, now: Timestamp) -> Result<&Token, SessionError> {
        let span = crate::token_span!(
            audience = self.identity.project_id(),
            ttl = self.signer.ttl_seconds()
        );
        let _entered = span.enter();

        let token = self.signer.issue(&self.identity, now)?;
        info!(
            issued_at = token.issued_at(),
            expires_at = token.expires_at(),
            "Device token issued"
        );
        Ok(self.token.insert(token))
    }

    /// Synchronize the clock from the time service, then issue a token
    pub async fn sync_clock_and_issue<F: HttpFetch>(
        &mut self,
        time_source: &TimeSource<F>,
        credentials: &TimeServiceCredentials,
        timezone: Option<&str>,
    ) -> Result<&Token, SessionError> {
        let now = time_source.sync_clock(credentials, timezone).await?;
        self.reissue_token(now)
    }

    // ---- connection ----

    /// Open the broker connection with the current token
    ///
    /// A failing on-connect callback is returned as
    /// [`SessionError::Callback`] with the session already Connected. Use
    /// [`Session::connect_and_subscribe`] to back out of such a connection.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let span = crate::session_span!(client_id = %self.identity, operation = "connect");
        self.connect_inner().instrument(span).await
    }

    async fn connect_inner(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }

        let now = self.clock.now();
        let token = self.token.as_ref().ok_or(SessionError::MissingToken)?;
        if token.is_stale(now) {
            return Err(SessionError::TokenExpired {
                expires_at: token.expires_at(),
                now,
            });
        }

        let params = ConnectParams {
            client_id: self.identity.client_id(),
            username: MQTT_USERNAME.to_string(),
            password: token.as_str().to_string(),
            keep_alive: self.keep_alive,
        };

        self.transition(SessionState::Connecting);
        self.backlog.clear();

        if let Err(e) = self.transport.connect(&params).await {
            self.transition(SessionState::Disconnected);
            return Err(e.into());
        }

        let connect_timeout = self.connect_timeout;
        let acknowledged =
            match tokio::time::timeout(connect_timeout, self.await_acknowledgment()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(connect_timeout).into()),
            };

        match acknowledged {
            Ok(0) => {
                self.transition(SessionState::Connected);
                info!(
                    keep_alive_secs = self.keep_alive.as_secs(),
                    "Connected to broker"
                );
                self.notify(Notification::Connect(0)).await
            }
            Ok(code) => {
                warn!(code, "Broker rejected the connection");
                self.abort_connect().await;
                Err(SessionError::BrokerRejected(code))
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                self.abort_connect().await;
                Err(e)
            }
        }
    }

    /// Pump until the connection acknowledgment, keeping later events queued
    async fn await_acknowledgment(&mut self) -> Result<u8, SessionError> {
        loop {
            while let Some(event) = self.backlog.pop_front() {
                match event {
                    TransportEvent::ConnAck(code) => return Ok(code),
                    TransportEvent::Disconnected(reason) => {
                        return Err(TransportError::ConnectionLost(reason).into())
                    }
                    other => debug!(event = ?other, "Ignoring event before acknowledgment"),
                }
            }

            let events = self.transport.pump().await?;
            if events.is_empty() {
                tokio::task::yield_now().await;
            }
            self.backlog.extend(events);
        }
    }

    /// Connect, then subscribe to config and all commands
    ///
    /// If any step fails after the broker accepted the connection, the
    /// connection is dropped again so the caller never keeps a session that
    /// is missing its subscriptions. Observers stay registered.
    pub async fn connect_and_subscribe(&mut self) -> Result<(), SessionError> {
        let result = self.open_subscribed().await;
        if let Err(e) = &result {
            if self.is_connected() {
                warn!(error = %e, "Connection set up incomplete, dropping it");
                self.abort_connect().await;
            }
        }
        result
    }

    async fn open_subscribed(&mut self) -> Result<(), SessionError> {
        self.connect().await?;
        self.subscribe_to_config().await?;
        self.subscribe_to_all_commands().await
    }

    async fn abort_connect(&mut self) {
        self.backlog.clear();
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport cleanup after failed connect also failed");
        }
        self.transition(SessionState::Disconnected);
    }

    /// Close the connection and clear every observer
    ///
    /// The session ends up Disconnected even when the transport fails to
    /// close cleanly; that failure is returned.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        let span = crate::session_span!(client_id = %self.identity, operation = "disconnect");
        self.disconnect_inner().instrument(span).await
    }

    async fn disconnect_inner(&mut self) -> Result<(), SessionError> {
        self.observers.clear();
        self.backlog.clear();

        if self.state == SessionState::Disconnected {
            debug!("Already disconnected, observers cleared");
            return Ok(());
        }

        self.transition(SessionState::Disconnecting);
        let result = self.transport.disconnect().await;
        self.transition(SessionState::Disconnected);

        match result {
            Ok(()) => {
                info!("Disconnected from broker");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Transport disconnect failed, session forced to disconnected");
                Err(e.into())
            }
        }
    }

    // ---- messaging ----

    /// Publish `payload` unchanged to the resolved topic
    pub async fn publish(
        &mut self,
        kind: TopicKind,
        payload: impl Into<Vec<u8>>,
        subfolder: Option<&str>,
        qos: QoS,
    ) -> Result<(), SessionError> {
        self.require_connected()?;
        let topic = self.topic(kind, subfolder)?;
        let payload = payload.into();

        debug!(topic = %topic, bytes = payload.len(), qos = qos.level(), "Publishing");
        self.transport.publish(topic.as_str(), payload, qos).await?;
        Ok(())
    }

    /// Report device state at QoS 0
    pub async fn publish_state(&mut self, payload: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        self.publish(TopicKind::State, payload, None, QoS::AtMostOnce)
            .await
    }

    pub async fn subscribe(&mut self, kind: TopicKind, qos: QoS) -> Result<(), SessionError> {
        self.require_connected()?;
        let topic = self.topic(kind, None)?;

        debug!(topic = %topic, qos = qos.level(), "Subscribing");
        self.transport.subscribe(topic.as_str(), qos).await?;
        Ok(())
    }

    pub async fn subscribe_to_config(&mut self) -> Result<(), SessionError> {
        self.subscribe(TopicKind::Config, QoS::AtLeastOnce).await
    }

    pub async fn subscribe_to_all_commands(&mut self) -> Result<(), SessionError> {
        self.subscribe(TopicKind::CommandsWildcard, QoS::AtLeastOnce)
            .await
    }

    // ---- event processing ----

    /// Process one batch of transport events, dispatching observers in order
    ///
    /// Events left over after a failing callback stay queued for the next
    /// call.
    pub async fn pump(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;

        if self.backlog.is_empty() {
            let fetched = self.transport.pump().await;
            self.accept_fetched(fetched).await?;
        }
        self.dispatch_backlog().await
    }

    /// Pump forever
    ///
    /// Only returns with an error, including [`SessionError::NotConnected`]
    /// once the connection drops.
    pub async fn pump_blocking(&mut self) -> Result<Infallible, SessionError> {
        loop {
            self.pump().await?;
            if self.backlog.is_empty() {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Pump until `shutdown` becomes true or its sender is dropped
    ///
    /// Only the wait for new transport events is interrupted by shutdown.
    /// A batch that was received is always dispatched in full, including the
    /// actions its callbacks queue.
    pub async fn pump_until(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SessionError> {
        loop {
            if *shutdown.borrow_and_update() {
                debug!("Shutdown requested, leaving pump loop");
                return Ok(());
            }
            self.require_connected()?;

            if self.backlog.is_empty() {
                let fetched = tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                        continue;
                    }
                    fetched = self.transport.pump() => fetched,
                };
                self.accept_fetched(fetched).await?;
            }

            self.dispatch_backlog().await?;
            tokio::task::yield_now().await;
        }
    }

    async fn accept_fetched(
        &mut self,
        fetched: Result<Vec<TransportEvent>, TransportError>,
    ) -> Result<(), SessionError> {
        match fetched {
            Ok(events) => {
                self.backlog.extend(events);
                Ok(())
            }
            Err(e) => {
                self.connection_lost(&e.to_string()).await?;
                Err(e.into())
            }
        }
    }

    async fn dispatch_backlog(&mut self) -> Result<(), SessionError> {
        while let Some(event) = self.backlog.pop_front() {
            self.handle_event(event).await?;
            if !self.is_connected() {
                self.backlog.clear();
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        match event {
            TransportEvent::ConnAck(code) => {
                debug!(code, "Ignoring acknowledgment outside connect");
                Ok(())
            }
            TransportEvent::Disconnected(reason) => self.connection_lost(&reason).await,
            TransportEvent::Message { topic, payload } => {
                debug!(topic = %topic, bytes = payload.len(), "Message received");
                self.notify(Notification::Message { topic, payload }).await
            }
            TransportEvent::SubAck {
                packet_id,
                return_codes,
            } => {
                debug!(packet_id, ?return_codes, "Subscription acknowledged");
                self.notify(Notification::Subscribe {
                    packet_id,
                    return_codes,
                })
                .await
            }
        }
    }

    /// Transport-initiated disconnect; observers stay registered
    async fn connection_lost(&mut self, reason: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            return Ok(());
        }
        warn!(reason, "Connection lost");
        self.transition(SessionState::Disconnected);
        self.backlog.clear();
        self.notify(Notification::Disconnect).await
    }

    async fn notify(&mut self, notification: Notification) -> Result<(), SessionError> {
        let mut context = SessionContext::new(self.state);
        self.observers
            .dispatch(&mut context, &notification)
            .map_err(SessionError::Callback)?;
        self.run_pending(context.into_pending()).await
    }

    async fn run_pending(&mut self, actions: Vec<PendingAction>) -> Result<(), SessionError> {
        for action in actions {
            match action {
                PendingAction::Publish {
                    kind,
                    payload,
                    subfolder,
                    qos,
                } => self.publish(kind, payload, subfolder.as_deref(), qos).await?,
                PendingAction::Subscribe { kind, qos } => self.subscribe(kind, qos).await?,
            }
        }
        Ok(())
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected { state: self.state });
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Session state transition");
        self.state = next;
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("keep_alive", &self.keep_alive)
            .field("topic_scheme", &self.topic_scheme)
            .field("token", &self.token)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}
