use crate::config::SessionOptions;
use crate::error::Result;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::Span;

const LISTEN_COMMAND: &[u8] = b"listen 1\n";
const STOP_GRACE: Duration = Duration::from_millis(500);
/// Longer lines drop the connection and start a reconnect
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Server notification a registration can wait for
///
/// Matched by plain substring containment anywhere in a notification line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    FavoritesChanged,
    RescanDone,
    LibraryChanged,
    UnknownIr,
    Prefset,
    Alarm,
    PlaylistNewsong,
    PlaylistStop,
    PlaylistPause,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::FavoritesChanged,
        Topic::RescanDone,
        Topic::LibraryChanged,
        Topic::UnknownIr,
        Topic::Prefset,
        Topic::Alarm,
        Topic::PlaylistNewsong,
        Topic::PlaylistStop,
        Topic::PlaylistPause,
    ];

    /// Literal text the topic matches
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::FavoritesChanged => "favorites changed",
            Topic::RescanDone => "rescan done",
            Topic::LibraryChanged => "library changed",
            Topic::UnknownIr => "unknownir",
            Topic::Prefset => "prefset",
            Topic::Alarm => "alarm",
            Topic::PlaylistNewsong => "playlist newsong",
            Topic::PlaylistStop => "playlist stop",
            Topic::PlaylistPause => "playlist pause",
        }
    }

    /// Whether `line` mentions this topic anywhere
    pub fn matches(self, line: &str) -> bool {
        line.contains(self.as_str())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Registration {
    topics: Vec<Topic>,
    tx: mpsc::UnboundedSender<Topic>,
}

type Registrations = Arc<Mutex<Vec<Registration>>>;

/// Line-oriented notification socket on the server's CLI port
///
/// Sends `listen 1` on connect and turns every line the server writes into
/// topic notifications for the registrations that asked for them. A lost
/// connection is re-established in the background with backoff until
/// [`disconnect`](Self::disconnect) is called.
///
/// # Example
///
/// ```no_run
/// use squeezebox_lms::{NotificationListener, SessionOptions, Topic};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let listener = NotificationListener::connect(
///         "192.168.1.20",
///         9090,
///         SessionOptions::default(),
///         tracing::Span::none(),
///     )
///     .await?;
///
///     let mut topics = listener.subscribe([Topic::PlaylistNewsong]);
///     while let Some(topic) = topics.recv().await {
///         println!("{}", topic);
///     }
///     Ok(())
/// }
/// ```
pub struct NotificationListener {
    address: String,
    registrations: Registrations,
    stop_tx: Mutex<Option<broadcast::Sender<()>>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl NotificationListener {
    /// Open the socket and start listening
    ///
    /// Only the first connection attempt is reported to the caller; later
    /// reconnects happen in the background.
    pub async fn connect(
        host: &str,
        port: u16,
        options: SessionOptions,
        span: Span,
    ) -> Result<Self> {
        let address = format!("{}:{}", host, port);
        let stream = open(&address).await?;
        tracing::info!(parent: &span, %address, "Listening for server notifications");

        let registrations: Registrations = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(
            stream,
            address.clone(),
            registrations.clone(),
            options,
            span.clone(),
            stop_rx,
        ));

        Ok(Self {
            address,
            registrations,
            stop_tx: Mutex::new(Some(stop_tx)),
            task_handle: Mutex::new(Some(handle)),
            span,
        })
    }

    /// `host:port` the listener talks to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Register interest in `topics`
    ///
    /// Registrations are only ever added. Each matching line yields one
    /// notification per topic, however often the topic text repeats.
    pub fn subscribe(&self, topics: impl IntoIterator<Item = Topic>) -> mpsc::UnboundedReceiver<Topic> {
        let mut unique = Vec::new();
        for topic in topics {
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(parent: &self.span, topics = ?unique, "Adding notification registration");
        lock(&self.registrations).push(Registration { topics: unique, tx });
        rx
    }

    /// False once [`disconnect`](Self::disconnect) has been called
    pub fn is_running(&self) -> bool {
        lock(&self.stop_tx).is_some()
    }

    /// Close the socket and stop reconnecting; safe to call more than once
    pub async fn disconnect(&self) {
        let stop_tx = lock(&self.stop_tx).take();
        let handle = lock(&self.task_handle).take();

        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = handle {
            // Give it a moment to stop gracefully
            let _ = tokio::time::timeout(STOP_GRACE, handle).await;
            tracing::info!(parent: &self.span, address = %self.address, "Notification socket closed");
        }
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task_handle).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn open(address: &str) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(address).await?;
    stream.write_all(LISTEN_COMMAND).await?;
    Ok(stream)
}

enum ReadEnd {
    Stopped,
    Lost(String),
}

/// Read lines until stopped, reconnecting whenever the socket drops
async fn run(
    stream: TcpStream,
    address: String,
    registrations: Registrations,
    options: SessionOptions,
    span: Span,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut stream = Some(stream);
    let mut backoff = Duration::ZERO;

    loop {
        let current = match stream.take() {
            Some(current) => current,
            None => {
                backoff = options.backoff.next(backoff);
                tracing::info!(parent: &span, "Reconnecting to notification socket in {:?}", backoff);
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = sleep(backoff) => {}
                }

                let opened = tokio::select! {
                    _ = stop_rx.recv() => break,
                    opened = open(&address) => opened,
                };
                match opened {
                    Ok(current) => {
                        tracing::info!(parent: &span, %address, "Notification socket reconnected");
                        backoff = Duration::ZERO;
                        current
                    }
                    Err(e) => {
                        tracing::warn!(parent: &span, error = %e, "Notification socket reconnect failed");
                        continue;
                    }
                }
            }
        };

        match read_lines(current, &registrations, &span, &mut stop_rx).await {
            ReadEnd::Stopped => break,
            ReadEnd::Lost(reason) => {
                tracing::warn!(parent: &span, %reason, "Notification socket lost");
            }
        }
    }

    tracing::debug!(parent: &span, "Notification listener stopped");
}

async fn read_lines(
    stream: TcpStream,
    registrations: &Registrations,
    span: &Span,
    stop_rx: &mut broadcast::Receiver<()>,
) -> ReadEnd {
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        let line = tokio::select! {
            _ = stop_rx.recv() => return ReadEnd::Stopped,
            line = lines.next() => line,
        };

        match line {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                tracing::trace!(parent: span, %line, "Notification");
                deliver(&line, registrations);
            }
            None => return ReadEnd::Lost("closed by server".to_string()),
            Some(Err(e)) => return ReadEnd::Lost(e.to_string()),
        }
    }
}

fn deliver(line: &str, registrations: &Registrations) {
    let mut registrations = lock(registrations);
    // Receivers that were dropped can never be notified again.
    registrations.retain(|registration| !registration.tx.is_closed());

    for registration in registrations.iter() {
        for topic in &registration.topics {
            if topic.matches(line) {
                let _ = registration.tx.send(*topic);
            }
        }
    }
}
