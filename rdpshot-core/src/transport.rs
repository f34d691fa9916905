//! TCP implementation of [`ProtocolClient`] over the framed update stream.
//!
//! Each session gets one pump task that owns the socket: it forwards
//! decoded frames as [`SessionEvent`]s and turns a close request into a
//! `Close` frame.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::error::CaptureError;
use crate::protocol::{ConnectRequest, ProtocolClient, SessionControl, SessionEvent, SessionLink};
use crate::wire::{UpdateCodec, WireMessage};

/// How long a `Close` frame may take to reach the socket.
const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Connects to update-stream servers over TCP.
#[derive(Debug, Clone)]
pub struct TcpProtocolClient {
    connect_timeout: Duration,
}

impl TcpProtocolClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for TcpProtocolClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ProtocolClient for TcpProtocolClient {
    async fn connect(&self, request: ConnectRequest) -> Result<SessionLink, CaptureError> {
        let addr = request.target.socket_addr_string();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| CaptureError::ConnectTimeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, UpdateCodec);
        framed
            .send(WireMessage::Hello {
                width: request.width,
                height: request.height,
            })
            .await?;

        let (events_tx, link) = SessionLink::channel();
        let control = link.control.clone();
        tokio::spawn(pump(framed, events_tx, control));

        Ok(link)
    }
}

/// Send `Close`, giving up if the peer stops reading.
async fn send_close(framed: &mut Framed<TcpStream, UpdateCodec>) -> Result<(), CaptureError> {
    match tokio::time::timeout(CLOSE_SEND_TIMEOUT, framed.send(WireMessage::Close)).await {
        Ok(sent) => sent,
        Err(_) => Err(CaptureError::Connection(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "close not sent in time",
        ))),
    }
}

/// Shuttle frames between the socket and the session until it ends.
///
/// Returns early, dropping the socket, once the session side has dropped
/// its link.
async fn pump(
    mut framed: Framed<TcpStream, UpdateCodec>,
    events: mpsc::Sender<SessionEvent>,
    control: SessionControl,
) {
    let mut close_sent = false;

    let terminal = loop {
        let next = tokio::select! {
            frame = framed.next() => frame,
            _ = events.closed() => {
                debug!("session gone, dropping connection");
                return;
            }
            _ = control.closed(), if !close_sent => {
                close_sent = true;
                if let Err(e) = send_close(&mut framed).await {
                    debug!("could not send close: {e}");
                    break SessionEvent::Closed;
                }
                continue;
            }
        };

        let event = match next {
            Some(Ok(WireMessage::Ready)) => SessionEvent::Ready,
            Some(Ok(WireMessage::Update(update))) => SessionEvent::Update(update),
            Some(Ok(WireMessage::Close)) => {
                if !close_sent {
                    // Acknowledge a server-initiated close.
                    let _ = send_close(&mut framed).await;
                }
                break SessionEvent::Closed;
            }
            Some(Ok(WireMessage::Hello { .. })) => {
                warn!("server sent Hello, ignoring");
                continue;
            }
            Some(Err(e)) => {
                if close_sent {
                    break SessionEvent::Closed;
                }
                break SessionEvent::Lost(e.to_string());
            }
            None => {
                if close_sent {
                    break SessionEvent::Closed;
                }
                break SessionEvent::Lost("connection closed by peer".into());
            }
        };

        if events.send(event).await.is_err() {
            // The session driver is gone; nobody is listening.
            return;
        }
    };

    let _ = events.send(terminal).await;
}
