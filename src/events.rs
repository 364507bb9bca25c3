use crate::error::{LmsError, Result};
use crate::schema::{FavoritesEvent, SubscriptionEvent};
use crate::status::PlayerStatus;
use tokio::sync::broadcast;

/// Validated event from a device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Normalized player status
    Status(PlayerStatus),

    /// Favorites listing pushed by the server
    Favorites(FavoritesEvent),

    /// Subscribe confirmation or publish acknowledgement
    Subscription(SubscriptionEvent),

    /// The server dropped the CometD session
    ///
    /// Pushes stop until the session is back. While
    /// [`DeviceSession::state`](crate::DeviceSession::state) reads
    /// `Handshaking` it is being restored and a fresh
    /// [`Subscription`](Self::Subscription) confirmation follows; `Idle` means
    /// `connect` has to be called again.
    SessionLost,
}

/// Receiver for device events
///
/// A receiver that falls behind loses the oldest events and reports how many
/// with [`LmsError::ChannelError`]; the next call carries on from the oldest
/// event still queued.
pub struct EventReceiver {
    rx: broadcast::Receiver<DeviceEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<DeviceEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with [`LmsError::ConnectionClosed`] once the device session is gone.
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => LmsError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => lagged(n),
        })
    }

    /// Receive an event without waiting; `None` if nothing is queued
    pub fn try_recv(&mut self) -> Result<Option<DeviceEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(LmsError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(lagged(n)),
        }
    }

    /// Wait for the next player status, skipping other events
    ///
    /// A lost session is not skipped: it fails with
    /// [`LmsError::NotConnected`], since no status arrives until the session
    /// is back.
    pub async fn recv_status(&mut self) -> Result<PlayerStatus> {
        loop {
            match self.recv().await? {
                DeviceEvent::Status(status) => return Ok(status),
                DeviceEvent::SessionLost => return Err(LmsError::NotConnected),
                DeviceEvent::Favorites(_) | DeviceEvent::Subscription(_) => {}
            }
        }
    }
}

fn lagged(missed: u64) -> LmsError {
    LmsError::ChannelError(format!("Lagged by {} messages", missed))
}
