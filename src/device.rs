use crate::command::Command;
use crate::config::{ServerConfig, SessionOptions};
use crate::error::{LmsError, Result};
use crate::events::{DeviceEvent, EventReceiver};
use crate::notification::{NotificationListener, Topic};
use crate::request::RequestClient;
use crate::schema::ChannelEvent;
use crate::session::{SessionState, SubscriptionSession};
use crate::status::PlayerStatus;
use crate::types::{DeviceIdentity, Player};
use futures_util::future::try_join_all;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Span;

const EVENT_CAPACITY: usize = 100;

/// Command to publish, optionally again whenever a topic is reported
#[derive(Debug, Clone, PartialEq)]
pub struct TopicCommand {
    /// Notification that triggers a re-publish; `None` publishes once
    pub topic: Option<Topic>,
    pub command: Command,
}

impl TopicCommand {
    /// Publish `command` once
    pub fn once(command: Command) -> Self {
        Self {
            topic: None,
            command,
        }
    }

    /// Publish `command` now and every time `topic` is reported
    pub fn on(topic: Topic, command: Command) -> Self {
        Self {
            topic: Some(topic),
            command,
        }
    }
}

/// Everything needed to talk to one player
///
/// Owns the JSON-RPC client, the CometD session and (once topics are
/// registered) the notification socket for a device, and merges what they
/// report into one stream of validated [`DeviceEvent`]s.
///
/// # Example
///
/// ```no_run
/// use squeezebox_lms::{
///     Command, DeviceIdentity, DeviceSession, RequestClient, ServerConfig, SessionOptions,
///     Tag, Topic, TopicCommand,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::new("192.168.1.50");
///     let options = SessionOptions::default();
///     let server = RequestClient::new(&config, &options, tracing::Span::none())?;
///
///     let players = server.players().await?;
///     let player = &players.result.players_loop[0];
///     let identity = DeviceIdentity::from_player(player, &config.host, config.ports.http);
///
///     let device = DeviceSession::new(identity, config, options)?;
///     let mut events = device.connect().await?;
///     device
///         .subscribe_topics(vec![TopicCommand::on(
///             Topic::PlaylistNewsong,
///             Command::status_subscription(0, [Tag::Volume, Tag::PlayerState]),
///         )])
///         .await?;
///
///     while let Ok(event) = events.recv().await {
///         println!("{:?}", event);
///     }
///     Ok(())
/// }
/// ```
pub struct DeviceSession {
    identity: DeviceIdentity,
    config: ServerConfig,
    options: SessionOptions,
    requests: RequestClient,
    subscription: Arc<SubscriptionSession>,
    notifications: tokio::sync::Mutex<Option<Arc<NotificationListener>>>,
    events_tx: Mutex<Option<broadcast::Sender<DeviceEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    triggers: Mutex<Vec<JoinHandle<()>>>,
    span: Span,
}

impl DeviceSession {
    /// Create a session for `identity` on the server at `config`
    ///
    /// Nothing is connected yet; see [`connect`](Self::connect).
    pub fn new(identity: DeviceIdentity, config: ServerConfig, options: SessionOptions) -> Result<Self> {
        let span = tracing::info_span!("device", id = %identity.id, name = %identity.name);
        let requests = RequestClient::new(
            &config,
            &options,
            tracing::debug_span!(parent: &span, "jsonrpc"),
        )?;
        let subscription = SubscriptionSession::over_http(
            identity.id.clone(),
            &config,
            options,
            tracing::debug_span!(parent: &span, "cometd"),
        )?;
        Ok(Self::from_parts(identity, config, options, requests, subscription, span))
    }

    /// Create a session for a player listed by the server at `config`
    pub fn for_player(player: &Player, config: ServerConfig, options: SessionOptions) -> Result<Self> {
        let identity = DeviceIdentity::from_player(player, &config.host, config.ports.http);
        Self::new(identity, config, options)
    }

    /// Assemble a session from already built transports
    pub fn from_parts(
        identity: DeviceIdentity,
        config: ServerConfig,
        options: SessionOptions,
        requests: RequestClient,
        subscription: SubscriptionSession,
        span: Span,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity,
            config,
            options,
            requests,
            subscription: Arc::new(subscription),
            notifications: tokio::sync::Mutex::new(None),
            events_tx: Mutex::new(Some(events_tx)),
            dispatcher: Mutex::new(None),
            triggers: Mutex::new(Vec::new()),
            span,
        }
    }

    /// Player this session talks to
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// JSON-RPC client for server-wide queries such as `players` or `favorites`
    pub fn requests(&self) -> &RequestClient {
        &self.requests
    }

    /// Lifecycle state of the CometD session
    pub fn state(&self) -> SessionState {
        self.subscription.state()
    }

    /// Send a one-shot JSON-RPC request for this player
    pub async fn send(&self, command: &Command) -> Result<Value> {
        self.requests.request(&self.identity.id, command).await
    }

    /// Fetch and normalize the player's current status
    pub async fn status(&self) -> Result<PlayerStatus> {
        let response = self.requests.player_status(&self.identity.id).await?;
        PlayerStatus::from_raw(&response.result)
    }

    /// Publish a command over the CometD session
    pub async fn publish(&self, command: &Command) -> Result<()> {
        self.subscription.publish(command).await
    }

    /// Another receiver for this device's events
    ///
    /// After [`disconnect`](Self::disconnect) the receiver reports
    /// [`LmsError::ConnectionClosed`] straight away.
    pub fn events(&self) -> EventReceiver {
        match lock(&self.events_tx).as_ref() {
            Some(tx) => EventReceiver::new(tx.subscribe()),
            None => EventReceiver::new(broadcast::channel(1).1),
        }
    }

    /// Start receiving events and perform the CometD handshake
    ///
    /// The returned receiver sees the subscribe confirmation. Validated status
    /// payloads are normalized first; any that break the status invariants are
    /// logged and dropped. If the server later drops the session the receiver
    /// gets [`DeviceEvent::SessionLost`].
    pub async fn connect(&self) -> Result<EventReceiver> {
        let events_tx = lock(&self.events_tx)
            .as_ref()
            .cloned()
            .ok_or(LmsError::SessionClosed)?;
        let receiver = EventReceiver::new(events_tx.subscribe());

        {
            let mut dispatcher = lock(&self.dispatcher);
            if dispatcher.is_none() {
                *dispatcher = Some(tokio::spawn(dispatch(
                    self.subscription.events(),
                    self.subscription.state_changes(),
                    events_tx,
                    self.span.clone(),
                )));
            }
        }

        self.subscription.connect().await?;
        tracing::info!(parent: &self.span, "Device connected");
        Ok(receiver)
    }

    /// Publish each command now and re-publish topic commands on every matching notification
    ///
    /// Requires [`connect`](Self::connect) to have succeeded. The notification
    /// socket is opened the first time a topic is registered, and topics are
    /// registered before anything is published so no notification in between
    /// is missed. If the socket cannot be opened nothing is published.
    pub async fn subscribe_topics(&self, entries: Vec<TopicCommand>) -> Result<()> {
        if self.subscription.client_id().is_none() {
            return Err(match self.subscription.state() {
                SessionState::Closed => LmsError::SessionClosed,
                _ => LmsError::NotConnected,
            });
        }

        let triggered: Vec<(Topic, Command)> = entries
            .iter()
            .filter_map(|entry| entry.topic.map(|topic| (topic, entry.command.clone())))
            .collect();
        if !triggered.is_empty() {
            let listener = self.notification_listener().await?;
            let rx = listener.subscribe(triggered.iter().map(|(topic, _)| *topic));
            let handle = tokio::spawn(republish(
                rx,
                triggered,
                self.subscription.clone(),
                self.span.clone(),
            ));
            lock(&self.triggers).push(handle);
        }

        try_join_all(
            entries
                .iter()
                .map(|entry| self.subscription.publish(&entry.command)),
        )
        .await?;
        Ok(())
    }

    /// End the CometD session, close the notification socket and stop background tasks
    ///
    /// Safe to call more than once. The session cannot be connected again.
    pub async fn disconnect(&self) {
        self.subscription.unsubscribe().await;

        if let Some(listener) = self.notifications.lock().await.take() {
            listener.disconnect().await;
        }

        let tasks: Vec<JoinHandle<()>> = lock(&self.triggers).drain(..).collect();
        for task in tasks {
            task.abort();
        }
        if let Some(dispatcher) = lock(&self.dispatcher).take() {
            dispatcher.abort();
        }

        if lock(&self.events_tx).take().is_some() {
            tracing::info!(parent: &self.span, "Device disconnected");
        }
    }

    async fn notification_listener(&self) -> Result<Arc<NotificationListener>> {
        let mut notifications = self.notifications.lock().await;
        if let Some(listener) = notifications.as_ref() {
            return Ok(listener.clone());
        }

        let listener = Arc::new(
            NotificationListener::connect(
                &self.config.host,
                self.config.ports.cli,
                self.options,
                tracing::debug_span!(parent: &self.span, "notifications"),
            )
            .await?,
        );
        *notifications = Some(listener.clone());
        Ok(listener)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        for task in lock(&self.triggers).drain(..) {
            task.abort();
        }
        if let Some(dispatcher) = lock(&self.dispatcher).take() {
            dispatcher.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turn a validated channel event into a device event
fn to_device_event(event: ChannelEvent, span: &Span) -> Option<DeviceEvent> {
    match event {
        ChannelEvent::Status(status) => match PlayerStatus::from_raw(&status.data) {
            Ok(normalized) => Some(DeviceEvent::Status(normalized)),
            Err(e) => {
                tracing::warn!(parent: span, error = %e, "Dropping status update");
                None
            }
        },
        ChannelEvent::Favorites(favorites) => Some(DeviceEvent::Favorites(favorites)),
        ChannelEvent::Subscription(subscription) => Some(DeviceEvent::Subscription(subscription)),
    }
}

/// Forward session events as device events until the session goes away
///
/// Also watches the session state and reports a connected session falling
/// back to idle or handshaking as [`DeviceEvent::SessionLost`].
async fn dispatch(
    mut channel_rx: broadcast::Receiver<ChannelEvent>,
    mut state_rx: broadcast::Receiver<SessionState>,
    events_tx: broadcast::Sender<DeviceEvent>,
    span: Span,
) {
    let mut connected = false;
    let mut watching_state = true;

    loop {
        tokio::select! {
            received = channel_rx.recv() => match received {
                Ok(event) => {
                    if let Some(event) = to_device_event(event, &span) {
                        let _ = events_tx.send(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(parent: &span, "Event dispatch lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            state = state_rx.recv(), if watching_state => match state {
                Ok(SessionState::Connected { .. }) => connected = true,
                Ok(SessionState::Idle | SessionState::Handshaking) if connected => {
                    connected = false;
                    tracing::warn!(parent: &span, "Lost the CometD session");
                    let _ = events_tx.send(DeviceEvent::SessionLost);
                }
                Ok(_) => connected = false,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(parent: &span, "Missed {} session state changes", n);
                }
                Err(broadcast::error::RecvError::Closed) => watching_state = false,
            },
        }
    }
}

async fn republish(
    mut topics: tokio::sync::mpsc::UnboundedReceiver<Topic>,
    triggered: Vec<(Topic, Command)>,
    subscription: Arc<SubscriptionSession>,
    span: Span,
) {
    while let Some(topic) = topics.recv().await {
        tracing::debug!(parent: &span, %topic, "Notification received");
        for (_, command) in triggered.iter().filter(|(t, _)| *t == topic) {
            let subscription = subscription.clone();
            let command = command.clone();
            let span = span.clone();
            // Each publish runs on its own so a slow one never holds up the rest.
            tokio::spawn(async move {
                if let Err(e) = subscription.publish(&command).await {
                    tracing::warn!(parent: &span, error = %e, "Re-publish failed");
                }
            });
        }
    }
}
