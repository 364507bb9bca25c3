use crate::command::Command;
use crate::config::{ServerConfig, SessionOptions};
use crate::error::{LmsError, Result};
use crate::protocol::{
    response_channel, Advice, Message, MetaReply, CONNECT_CHANNEL, HANDSHAKE_CHANNEL,
    SUBSCRIBE_CHANNEL,
};
use crate::schema::{ChannelEvent, Classified, SubscriptionOutcome};
use crate::transport::{BayeuxTransport, HttpTransport};
use crate::types::PlayerId;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::Span;

const EVENT_CAPACITY: usize = 100;
const STATE_CAPACITY: usize = 16;
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Token for the session's active channel subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    channel: String,
    message_id: String,
}

impl SubscriptionHandle {
    pub(crate) fn new(channel: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            message_id: message_id.into(),
        }
    }

    /// Subscribed channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Id of the subscribe request the server confirmed
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

/// Lifecycle of a [`SubscriptionSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Handshake in progress, either from `connect` or after the server
    /// forgot the client
    Handshaking,
    Connected {
        client_id: String,
        subscription: SubscriptionHandle,
    },
    /// Unsubscribed; a new session is needed to connect again
    Closed,
}

struct SessionInner {
    state: SessionState,
    state_tx: broadcast::Sender<SessionState>,
    stop_tx: Option<broadcast::Sender<()>>,
    poll_handle: Option<JoinHandle<()>>,
}

impl SessionInner {
    fn set_state(&mut self, state: SessionState) -> SessionState {
        let _ = self.state_tx.send(state.clone());
        std::mem::replace(&mut self.state, state)
    }
}

/// Validates inbound payloads and fans them out to subscribers
#[derive(Clone)]
struct Inbound {
    events_tx: broadcast::Sender<ChannelEvent>,
    span: Span,
}

impl Inbound {
    fn dispatch(&self, payload: &Value) -> Option<ChannelEvent> {
        match ChannelEvent::classify(payload) {
            Classified::Event(event) => {
                tracing::trace!(parent: &self.span, ?event, "Channel event");
                let _ = self.events_tx.send(event.clone());
                Some(event)
            }
            Classified::Unrecognized(errors) => {
                let detail = join_errors(&errors);
                // Bare acknowledgements carry no data and are expected here.
                if payload.get("data").is_none() {
                    tracing::debug!(parent: &self.span, %payload, %detail, "Ignoring acknowledgement");
                } else {
                    tracing::warn!(parent: &self.span, %payload, %detail, "Unrecognized message from server");
                }
                None
            }
        }
    }
}

/// What a `/meta/connect` round trip asks the poll loop to do next
#[derive(Debug, Clone, PartialEq)]
enum PollOutcome {
    /// Poll again, after the server's requested pause if any
    Continue(Option<Duration>),
    /// Back off before polling again
    Failed(String),
    /// The server forgot the client; handshake again
    Rehandshake,
    /// The server asked the client to stop
    Stop,
}

/// Everything needed to exchange messages with the server for one player
#[derive(Clone)]
struct Link {
    device_id: PlayerId,
    transport: Arc<dyn BayeuxTransport>,
    options: SessionOptions,
    inbound: Inbound,
    span: Span,
}

impl Link {
    async fn exchange(&self, messages: &[Message]) -> Result<Vec<Value>> {
        timeout(
            self.options.request_timeout,
            self.transport.exchange(messages, self.options.request_timeout),
        )
        .await
        .map_err(|_| LmsError::Timeout)?
    }

    async fn handshake(&self) -> Result<String> {
        let message = Message::handshake();
        let replies = self.exchange(&[message.clone()]).await?;
        let reply = replies
            .iter()
            .find(|r| channel_of(r) == Some(HANDSHAKE_CHANNEL))
            .map(|r| correlate(r, &message.id))
            .ok_or_else(|| LmsError::HandshakeFailed("no handshake reply".to_string()))?;

        // Handshake replies are validated like any other payload but stay internal.
        match ChannelEvent::classify(&reply) {
            Classified::Event(ChannelEvent::Subscription(event)) => match event.outcome {
                SubscriptionOutcome::Subscribed { client_id } => Ok(client_id),
                SubscriptionOutcome::Failed { error } => Err(LmsError::HandshakeFailed(error)),
            },
            Classified::Event(other) => Err(LmsError::HandshakeFailed(format!(
                "unexpected handshake reply: {:?}",
                other
            ))),
            Classified::Unrecognized(errors) => Err(LmsError::HandshakeFailed(format!(
                "unrecognized handshake reply: {}",
                join_errors(&errors)
            ))),
        }
    }

    async fn subscribe_channel(&self, client_id: &str) -> Result<SubscriptionHandle> {
        let channel = response_channel(client_id);
        let message = Message::subscribe(client_id, &channel);
        let replies = self.exchange(&[message.clone()]).await?;

        let mut outcome = None;
        for reply in &replies {
            let reply = if channel_of(reply) == Some(SUBSCRIBE_CHANNEL) {
                correlate(reply, &message.id)
            } else {
                reply.clone()
            };
            if let Some(ChannelEvent::Subscription(event)) = self.inbound.dispatch(&reply) {
                if event.id == message.id {
                    outcome = Some(event.outcome);
                }
            }
        }

        match outcome {
            Some(SubscriptionOutcome::Subscribed { .. }) => {
                Ok(SubscriptionHandle::new(channel, message.id))
            }
            Some(SubscriptionOutcome::Failed { error }) => Err(LmsError::SubscribeFailed(error)),
            None => Err(LmsError::SubscribeFailed(
                "no subscribe confirmation".to_string(),
            )),
        }
    }

    /// Handshake and subscribe in one go
    async fn establish(&self) -> Result<(String, SubscriptionHandle)> {
        let client_id = self.handshake().await?;
        let subscription = self.subscribe_channel(&client_id).await?;
        Ok((client_id, subscription))
    }

    /// Dispatch pushes carried by a long-poll reply and read the server's advice
    fn read_poll_replies(&self, replies: &[Value]) -> PollOutcome {
        let mut outcome = PollOutcome::Failed("no /meta/connect reply".to_string());

        for reply in replies {
            if channel_of(reply) != Some(CONNECT_CHANNEL) {
                self.inbound.dispatch(reply);
                continue;
            }

            let Some(meta) = MetaReply::parse(reply) else {
                outcome = PollOutcome::Failed("malformed /meta/connect reply".to_string());
                continue;
            };
            let advice = meta.advice.as_ref();
            outcome = if advice.is_some_and(Advice::requires_handshake) {
                PollOutcome::Rehandshake
            } else if advice.is_some_and(Advice::forbids_reconnect) {
                PollOutcome::Stop
            } else if !meta.is_successful() {
                PollOutcome::Failed(
                    meta.error
                        .unwrap_or_else(|| "long-poll rejected".to_string()),
                )
            } else {
                PollOutcome::Continue(advice.and_then(Advice::delay))
            };
        }

        outcome
    }
}

/// CometD session for one player
///
/// Performs the handshake, subscribes to the client's private response
/// channel, keeps a long-poll open for pushes, and publishes commands. Every
/// payload the server sends back is validated and delivered through
/// [`events`](Self::events); payloads matching no known shape are logged and
/// dropped.
///
/// When the server forgets the client (after a restart, say) the long-poll
/// handshakes and subscribes again on its own; the new subscribe confirmation
/// arrives through [`events`](Self::events) and
/// [`state_changes`](Self::state_changes) reports the detour through
/// [`SessionState::Handshaking`].
pub struct SubscriptionSession {
    link: Link,
    inner: Arc<Mutex<SessionInner>>,
}

impl SubscriptionSession {
    /// Create an idle session talking through `transport`
    pub fn new(
        device_id: impl Into<PlayerId>,
        transport: Arc<dyn BayeuxTransport>,
        options: SessionOptions,
        span: Span,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = broadcast::channel(STATE_CAPACITY);
        Self {
            link: Link {
                device_id: device_id.into(),
                transport,
                options,
                inbound: Inbound {
                    events_tx,
                    span: span.clone(),
                },
                span,
            },
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::Idle,
                state_tx,
                stop_tx: None,
                poll_handle: None,
            })),
        }
    }

    /// Session talking to the server's `/cometd` endpoint
    pub fn over_http(
        device_id: impl Into<PlayerId>,
        config: &ServerConfig,
        options: SessionOptions,
        span: Span,
    ) -> Result<Self> {
        let transport = HttpTransport::new(config, &options)?;
        Ok(Self::new(device_id, Arc::new(transport), options, span))
    }

    /// Player commands are published for
    pub fn device_id(&self) -> &str {
        &self.link.device_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// Every state the session moves into from now on
    pub fn state_changes(&self) -> broadcast::Receiver<SessionState> {
        self.lock().state_tx.subscribe()
    }

    /// Client id assigned by the server, while connected
    pub fn client_id(&self) -> Option<String> {
        match &self.lock().state {
            SessionState::Connected { client_id, .. } => Some(client_id.clone()),
            _ => None,
        }
    }

    /// Active channel subscription, while connected
    pub fn subscription(&self) -> Option<SubscriptionHandle> {
        match &self.lock().state {
            SessionState::Connected { subscription, .. } => Some(subscription.clone()),
            _ => None,
        }
    }

    /// Receive validated events: publish replies, pushes and subscribe confirmations
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.link.inbound.events_tx.subscribe()
    }

    /// Handshake, start the long-poll and subscribe to the response channel
    ///
    /// Returns immediately when already connected. A failed handshake leaves
    /// the session idle so `connect` may be called again.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            match &inner.state {
                SessionState::Idle => {}
                SessionState::Connected { .. } => return Ok(()),
                SessionState::Handshaking => {
                    return Err(LmsError::HandshakeFailed(
                        "handshake already in progress".to_string(),
                    ))
                }
                SessionState::Closed => return Err(LmsError::SessionClosed),
            }
            inner.set_state(SessionState::Handshaking);
        }

        let client_id = match self.handshake_with_retry().await {
            Ok(client_id) => client_id,
            Err(e) => {
                self.reset_handshaking();
                return Err(e);
            }
        };
        tracing::debug!(parent: &self.link.span, %client_id, "Handshake successful");

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let poll_handle = tokio::spawn(poll_loop(
            self.link.clone(),
            client_id.clone(),
            Arc::downgrade(&self.inner),
            stop_rx,
        ));
        {
            let mut inner = self.lock();
            inner.stop_tx = Some(stop_tx);
            inner.poll_handle = Some(poll_handle);
        }

        let subscription = match self.link.subscribe_channel(&client_id).await {
            Ok(handle) => handle,
            Err(e) => {
                self.stop_polling().await;
                self.reset_handshaking();
                return Err(e);
            }
        };

        let cancelled = {
            let mut inner = self.lock();
            if inner.state == SessionState::Handshaking {
                inner.set_state(SessionState::Connected {
                    client_id,
                    subscription,
                });
                false
            } else {
                true
            }
        };
        if cancelled {
            self.stop_polling().await;
            return Err(LmsError::SessionClosed);
        }

        tracing::info!(parent: &self.link.span, "Subscribed to player updates");
        Ok(())
    }

    /// Publish a command; replies arrive through [`events`](Self::events)
    pub async fn publish(&self, command: &Command) -> Result<()> {
        let client_id = match &self.lock().state {
            SessionState::Connected { client_id, .. } => client_id.clone(),
            SessionState::Closed => return Err(LmsError::SessionClosed),
            _ => return Err(LmsError::NotConnected),
        };

        let message = Message::publish(&client_id, &self.link.device_id, command);
        tracing::debug!(parent: &self.link.span, command = %command.encode(), "Publishing");
        let replies = self.link.exchange(&[message.clone()]).await?;

        let mut rejection = None;
        for reply in &replies {
            if let Some(meta) = MetaReply::parse(reply) {
                if meta.id.as_deref() == Some(message.id.as_str()) && meta.successful == Some(false) {
                    rejection = Some(meta.error.unwrap_or_else(|| "publish rejected".to_string()));
                }
            }
            self.link.inbound.dispatch(reply);
        }

        match rejection {
            Some(error) => Err(LmsError::PublishFailed(error)),
            None => Ok(()),
        }
    }

    /// Drop the channel subscription and end the session
    ///
    /// Does nothing unless connected (or handshaking); calling it twice is harmless.
    pub async fn unsubscribe(&self) {
        let previous = {
            let mut inner = self.lock();
            if matches!(inner.state, SessionState::Idle | SessionState::Closed) {
                return;
            }
            inner.set_state(SessionState::Closed)
        };

        self.stop_polling().await;

        if let SessionState::Connected {
            client_id,
            subscription,
        } = previous
        {
            let messages = [
                Message::unsubscribe(&client_id, subscription.channel()),
                Message::disconnect(&client_id),
            ];
            if let Err(e) = self.link.exchange(&messages).await {
                tracing::warn!(parent: &self.link.span, error = %e, "Failed to notify server of unsubscribe");
            }
            tracing::info!(parent: &self.link.span, "Unsubscribed from player updates");
        }
    }

    async fn handshake_with_retry(&self) -> Result<String> {
        let attempts = self.link.options.handshake_attempts.max(1);
        let mut backoff = Duration::ZERO;
        let mut attempt = 1;

        loop {
            match self.link.handshake().await {
                Ok(client_id) => return Ok(client_id),
                Err(e) if attempt < attempts && self.state() == SessionState::Handshaking => {
                    backoff = self.link.options.backoff.next(backoff);
                    tracing::warn!(
                        parent: &self.link.span,
                        error = %e,
                        attempt,
                        "Handshake failed, retrying in {:?}",
                        backoff
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(parent: &self.link.span, error = %e, "Handshake failed");
                    return Err(e);
                }
            }
        }
    }

    async fn stop_polling(&self) {
        let (stop_tx, handle) = {
            let mut inner = self.lock();
            (inner.stop_tx.take(), inner.poll_handle.take())
        };
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = handle {
            // Give it a moment to stop gracefully
            let _ = timeout(STOP_GRACE, handle).await;
        }
    }

    fn reset_handshaking(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Handshaking {
            inner.set_state(SessionState::Idle);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        lock_inner(&self.inner)
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        let mut inner = self.lock();
        if let Some(handle) = inner.poll_handle.take() {
            handle.abort();
        }
    }
}

fn lock_inner(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keep a `/meta/connect` long-poll open and dispatch whatever it returns
async fn poll_loop(
    link: Link,
    mut client_id: String,
    inner: Weak<Mutex<SessionInner>>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let span = link.span.clone();
    let options = link.options;
    let mut backoff = Duration::ZERO;

    loop {
        let batch = [Message::connect(&client_id)];
        let result = tokio::select! {
            _ = stop_rx.recv() => break,
            result = timeout(options.poll_timeout, link.transport.exchange(&batch, options.poll_timeout)) => {
                result.unwrap_or(Err(LmsError::Timeout))
            }
        };

        let outcome = match result {
            Ok(replies) => link.read_poll_replies(&replies),
            Err(e) => PollOutcome::Failed(e.to_string()),
        };

        match outcome {
            PollOutcome::Continue(delay) => {
                backoff = Duration::ZERO;
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = stop_rx.recv() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
            PollOutcome::Failed(reason) => {
                backoff = options.backoff.next(backoff);
                tracing::warn!(parent: &span, %reason, "Long-poll failed, retrying in {:?}", backoff);
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = sleep(backoff) => {}
                }
            }
            PollOutcome::Rehandshake => match begin_rehandshake(&inner, &client_id) {
                Some(true) => {
                    tracing::warn!(parent: &span, "Server forgot the client, handshaking again");
                    match rehandshake(&link, &inner, &mut stop_rx).await {
                        Some(renewed) => {
                            tracing::info!(parent: &span, client_id = %renewed, "Session re-established");
                            client_id = renewed;
                            backoff = Duration::ZERO;
                        }
                        None => break,
                    }
                }
                Some(false) => {
                    // `connect` is still subscribing; let it finish first.
                    backoff = options.backoff.next(backoff);
                    tokio::select! {
                        _ = stop_rx.recv() => break,
                        _ = sleep(backoff) => {}
                    }
                }
                None => break,
            },
            PollOutcome::Stop => {
                tracing::warn!(parent: &span, "Server ended the session");
                mark_idle(&inner, &client_id);
                return;
            }
        }
    }

    tracing::debug!(parent: &span, "Long-poll stopped");
}

/// Move a connected session back to handshaking
///
/// `Some(false)` while the initial `connect` still owns the handshake, `None`
/// once the session is gone or closed.
fn begin_rehandshake(inner: &Weak<Mutex<SessionInner>>, client_id: &str) -> Option<bool> {
    let inner = inner.upgrade()?;
    let mut inner = lock_inner(&inner);
    match &inner.state {
        SessionState::Connected { client_id: current, .. } if current == client_id => {
            inner.set_state(SessionState::Handshaking);
            Some(true)
        }
        SessionState::Handshaking => Some(false),
        _ => None,
    }
}

/// Handshake and subscribe until it works or the session is stopped
async fn rehandshake(
    link: &Link,
    inner: &Weak<Mutex<SessionInner>>,
    stop_rx: &mut broadcast::Receiver<()>,
) -> Option<String> {
    let mut backoff = Duration::ZERO;

    loop {
        let attempt = tokio::select! {
            _ = stop_rx.recv() => return None,
            attempt = link.establish() => attempt,
        };

        match attempt {
            Ok((client_id, subscription)) => {
                let inner = inner.upgrade()?;
                let mut inner = lock_inner(&inner);
                if inner.state != SessionState::Handshaking {
                    return None;
                }
                inner.set_state(SessionState::Connected {
                    client_id: client_id.clone(),
                    subscription,
                });
                return Some(client_id);
            }
            Err(e) => {
                backoff = link.options.backoff.next(backoff);
                tracing::warn!(parent: &link.span, error = %e, "Re-handshake failed, retrying in {:?}", backoff);
                tokio::select! {
                    _ = stop_rx.recv() => return None,
                    _ = sleep(backoff) => {}
                }
            }
        }
    }
}

/// Drop back to idle when the server tells this client to stop
fn mark_idle(inner: &Weak<Mutex<SessionInner>>, client_id: &str) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut inner = lock_inner(&inner);
    let current = matches!(
        &inner.state,
        SessionState::Connected { client_id: current, .. } if current == client_id
    );
    if current {
        inner.set_state(SessionState::Idle);
        inner.stop_tx = None;
        inner.poll_handle = None;
    }
}

fn channel_of(message: &Value) -> Option<&str> {
    message.get("channel").and_then(Value::as_str)
}

fn join_errors(errors: &[crate::schema::ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Bayeux replies may omit the id of the request they answer; fill it in
fn correlate(reply: &Value, request_id: &str) -> Value {
    let mut reply = reply.clone();
    if let Some(fields) = reply.as_object_mut() {
        fields
            .entry("id")
            .or_insert_with(|| Value::String(request_id.to_string()));
    }
    reply
}
