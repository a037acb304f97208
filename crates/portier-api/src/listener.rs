//! Passive event listener with automatic rebinding.
//!
//! Controllers push a status datagram to their configured listener address
//! every time they log an event. This module binds that local UDP endpoint,
//! decodes each datagram through an [`EventDecoder`] and fans the results
//! out on a [`tokio::sync::broadcast`] channel. If the socket fails it is
//! rebound on the same address with exponential backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use portier_api::listener::{ListenerHandle, RebindConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let handle = ListenerHandle::bind(
//!     "0.0.0.0:60001".parse()?,
//!     decoder,
//!     RebindConfig::default(),
//!     cancel.clone(),
//! )
//! .await?;
//! let mut rx = handle.subscribe();
//!
//! while let Ok(status) = rx.recv().await {
//!     println!("{}: relays {:04b}", status.controller, status.relays);
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::types::Status;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Controller datagrams are 64 bytes; anything larger is not ours.
const MAX_DATAGRAM: usize = 1024;

// ── EventDecoder ─────────────────────────────────────────────────────

/// Decodes a raw pushed-event datagram.
///
/// Implemented by the wire codec; the listener only moves bytes.
pub trait EventDecoder: Send + Sync {
    fn decode(&self, datagram: &[u8]) -> Result<Status, Error>;
}

// ── RebindConfig ─────────────────────────────────────────────────────

/// Exponential backoff configuration for socket rebinding.
#[derive(Debug, Clone)]
pub struct RebindConfig {
    /// Delay before the first rebind attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum consecutive rebind attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for RebindConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── ListenerHandle ───────────────────────────────────────────────────

/// Handle to a running listener task.
pub struct ListenerHandle {
    event_rx: broadcast::Receiver<Arc<Status>>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl ListenerHandle {
    /// Bind `addr` and spawn the receive loop.
    ///
    /// The initial bind is done before returning so that configuration
    /// mistakes (port in use, bad address) surface to the caller. Later
    /// socket failures are handled by rebinding in the background.
    pub async fn bind(
        addr: SocketAddr,
        decoder: Arc<dyn EventDecoder>,
        rebind: RebindConfig,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        tracing::info!(%local_addr, "event listener bound");

        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            listen_loop(socket, local_addr, decoder, event_tx, rebind, task_cancel).await;
        });

        Ok(Self {
            event_rx,
            local_addr,
            cancel,
        })
    }

    /// Get a new receiver for decoded datagrams.
    ///
    /// A receiver that falls behind gets
    /// [`broadcast::error::RecvError::Lagged`] and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Status>> {
        self.event_rx.resubscribe()
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the background task to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background receive loop ──────────────────────────────────────────

/// Main loop: read → on error, backoff → rebind → read.
async fn listen_loop(
    socket: UdpSocket,
    addr: SocketAddr,
    decoder: Arc<dyn EventDecoder>,
    event_tx: broadcast::Sender<Arc<Status>>,
    rebind: RebindConfig,
    cancel: CancellationToken,
) {
    let mut socket = Some(socket);
    let mut attempt: u32 = 0;

    loop {
        let current = match socket.take() {
            Some(s) => s,
            None => match UdpSocket::bind(addr).await {
                Ok(s) => {
                    tracing::info!(%addr, "event listener rebound");
                    attempt = 0;
                    s
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "event listener rebind failed");
                    if let Some(max) = rebind.max_retries {
                        if attempt >= max {
                            tracing::error!(max_retries = max, "giving up on event listener");
                            break;
                        }
                    }

                    let delay = calculate_backoff(attempt, &rebind);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                    continue;
                }
            },
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = read_datagrams(&current, decoder.as_ref(), &event_tx) => {
                // read_datagrams only returns on a socket error
                if let Err(e) = result {
                    tracing::warn!(error = %e, "event listener socket failed, rebinding");
                }
            }
        }
    }

    tracing::debug!("event listener exiting");
}

/// Receive until the socket errors.
async fn read_datagrams(
    socket: &UdpSocket,
    decoder: &dyn EventDecoder,
    event_tx: &broadcast::Sender<Arc<Status>>,
) -> Result<(), Error> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let Some(datagram) = buf.get(..len) else {
            continue;
        };
        decode_and_broadcast(datagram, peer, decoder, event_tx);
    }
}

fn decode_and_broadcast(
    datagram: &[u8],
    peer: SocketAddr,
    decoder: &dyn EventDecoder,
    event_tx: &broadcast::Sender<Arc<Status>>,
) {
    match decoder.decode(datagram) {
        Ok(status) => {
            tracing::trace!(%peer, controller = status.controller, "event datagram");
            // No subscribers is not an error
            let _ = event_tx.send(Arc::new(status));
        }
        Err(e) => {
            tracing::debug!(%peer, error = %e, len = datagram.len(), "undecodable datagram");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// `delay = min(initial * 2^attempt, max)`
fn calculate_backoff(attempt: u32, config: &RebindConfig) -> Duration {
    config
        .initial_delay
        .checked_mul(2u32.saturating_pow(attempt))
        .map_or(config.max_delay, |d| d.min(config.max_delay))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FirstByte;

    impl EventDecoder for FirstByte {
        fn decode(&self, datagram: &[u8]) -> Result<Status, Error> {
            let Some(&id) = datagram.first() else {
                return Err(Error::Decode {
                    message: "empty datagram".into(),
                });
            };
            Ok(Status {
                controller: u32::from(id),
                system_datetime: None,
                doors_open: [false; 4],
                buttons: [false; 4],
                relays: 0,
                inputs: 0,
                system_error: 0,
                event: None,
            })
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 100], 60000))
    }

    #[test]
    fn default_rebind_config() {
        let config = RebindConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let config = RebindConfig::default();
        assert_eq!(calculate_backoff(0, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff(4, &config), Duration::from_secs(16));
        assert_eq!(calculate_backoff(5, &config), Duration::from_secs(30));
        assert_eq!(calculate_backoff(40, &config), Duration::from_secs(30));
    }

    #[test]
    fn decoded_datagram_is_broadcast() {
        let (tx, mut rx) = broadcast::channel(16);
        decode_and_broadcast(&[7, 0, 0], peer(), &FirstByte, &tx);

        let status = rx.try_recv().expect("one status");
        assert_eq!(status.controller, 7);
    }

    #[test]
    fn undecodable_datagram_is_dropped() {
        let (tx, mut rx) = broadcast::channel::<Arc<Status>>(16);
        decode_and_broadcast(&[], peer(), &FirstByte, &tx);
        assert!(rx.try_recv().is_err());
    }
}
