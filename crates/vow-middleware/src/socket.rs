//! Pub/sub over Unix-domain or TCP sockets.
//!
//! Frames travel newline-delimited.  A [`Publisher`] listens and fans every
//! frame out to all connected peers; [`dial`] connects in the background,
//! keeps reconnecting while the returned [`Subscription`] is alive, and
//! forwards inbound frames into it.  The topic filter is applied by the
//! subscription, so the wire carries every frame the publisher emits.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vow_types::VowError;

use crate::bus::{Frame, FrameSink, MessageBus, Subscription};

/// Delay between connection attempts of a dialing subscriber.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Frame delimiter on the socket.
const FRAME_DELIMITER: u8 = b'\n';

/// A socket address in URL form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `ipc://<path>` – Unix-domain socket at `path`.
    Ipc(PathBuf),
    /// `tcp://<host>:<port>`.
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = VowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(VowError::Config(format!("endpoint '{s}' has no socket path")));
            }
            Ok(Endpoint::Ipc(PathBuf::from(path)))
        } else if let Some(addr) = s.strip_prefix("tcp://") {
            if !addr.contains(':') {
                return Err(VowError::Config(format!("endpoint '{s}' has no port")));
            }
            Ok(Endpoint::Tcp(addr.to_string()))
        } else {
            Err(VowError::Config(format!(
                "unsupported endpoint '{s}': expected ipc:// or tcp://"
            )))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Listening side of a socket pub/sub pair.
///
/// The accept loop runs on the Tokio runtime until the publisher is dropped.
pub struct Publisher {
    endpoint: Endpoint,
    bus: MessageBus,
    accept_task: JoinHandle<()>,
}

impl Publisher {
    /// Bind `endpoint` and start accepting subscribers.
    ///
    /// For `tcp://` endpoints bound to port `0` the reported
    /// [`endpoint`][Self::endpoint] carries the port actually assigned.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::Channel`] if the socket cannot be bound.
    pub async fn listen(endpoint: Endpoint) -> Result<Self, VowError> {
        let bus = MessageBus::default();
        let (endpoint, accept_task) = match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|e| VowError::Channel(format!("bind error on tcp://{addr}: {e}")))?;
                let bound = listener
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or(addr);
                let task = tokio::spawn(accept_tcp(listener, bus.clone()));
                (Endpoint::Tcp(bound), task)
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                prepare_socket_path(&path)?;
                let listener = tokio::net::UnixListener::bind(&path).map_err(|e| {
                    VowError::Channel(format!("bind error on ipc://{}: {e}", path.display()))
                })?;
                let task = tokio::spawn(accept_unix(listener, bus.clone()));
                (Endpoint::Ipc(path), task)
            }
            #[cfg(not(unix))]
            Endpoint::Ipc(path) => {
                return Err(VowError::Channel(format!(
                    "ipc://{} requires Unix-domain sockets",
                    path.display()
                )));
            }
        };
        info!(endpoint = %endpoint, "publisher listening");
        Ok(Self {
            endpoint,
            bus,
            accept_task,
        })
    }

    /// Encode `payload` under `topic` and send it to every connected peer.
    ///
    /// Returns the number of peers the frame was queued for; `Ok(0)` when no
    /// one is connected.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::Decode`] if the payload cannot be serialised.
    pub fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<usize, VowError> {
        self.bus.publish(topic, payload)
    }

    /// The endpoint this publisher is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl FrameSink for Publisher {
    fn send_frame(&self, frame: Frame) -> usize {
        self.bus.publish_frame(frame)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_tcp(listener: TcpListener, bus: MessageBus) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "subscriber connected");
                tokio::spawn(forward_frames(stream, bus.subscribe(""), peer.to_string()));
            }
            Err(e) => error!(error = %e, "tcp accept error"),
        }
    }
}

#[cfg(unix)]
async fn accept_unix(listener: tokio::net::UnixListener, bus: MessageBus) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                debug!("subscriber connected over ipc");
                tokio::spawn(forward_frames(stream, bus.subscribe(""), "ipc".to_string()));
            }
            Err(e) => error!(error = %e, "ipc accept error"),
        }
    }
}

/// Remove a stale socket file and make sure the parent directory exists.
#[cfg(unix)]
fn prepare_socket_path(path: &std::path::Path) -> Result<(), VowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            VowError::Channel(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| {
            VowError::Channel(format!("cannot remove stale socket {}: {e}", path.display()))
        })?;
    }
    Ok(())
}

async fn forward_frames<S>(mut stream: S, mut frames: Subscription, peer: String)
where
    S: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let sent = async {
            stream.write_all(&frame).await?;
            stream.write_all(&[FRAME_DELIMITER]).await?;
            stream.flush().await
        };
        if let Err(e) = sent.await {
            debug!(peer = %peer, error = %e, "subscriber disconnected");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Dial `endpoint` without blocking and return a subscription for `topic`.
///
/// Connection attempts continue in the background every
/// [`RECONNECT_DELAY`] until a publisher answers, and again after every
/// disconnect, for as long as the subscription lives.  Must be called from
/// within a Tokio runtime.
pub fn dial(endpoint: Endpoint, topic: impl Into<String>) -> Subscription {
    let bus = MessageBus::default();
    let subscription = bus.subscribe(topic);
    tokio::spawn(read_frames_forever(endpoint, bus));
    subscription
}

async fn read_frames_forever(endpoint: Endpoint, bus: MessageBus) {
    while bus.receiver_count() > 0 {
        match connect(&endpoint).await {
            Ok(stream) => {
                info!(endpoint = %endpoint, "subscriber connected");
                match read_frames(stream, &bus).await {
                    Ok(()) => debug!(endpoint = %endpoint, "publisher closed the connection"),
                    Err(e) => warn!(endpoint = %endpoint, error = %e, "subscriber read error"),
                }
            }
            Err(e) => debug!(endpoint = %endpoint, error = %e, "publisher not reachable yet"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
    debug!(endpoint = %endpoint, "subscription dropped; stop dialing");
}

async fn connect(endpoint: &Endpoint) -> std::io::Result<Box<dyn AsyncRead + Unpin + Send>> {
    match endpoint {
        Endpoint::Tcp(addr) => Ok(Box::new(TcpStream::connect(addr).await?)),
        #[cfg(unix)]
        Endpoint::Ipc(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        Endpoint::Ipc(_) => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "ipc endpoints require Unix-domain sockets",
        )),
    }
}

async fn read_frames<R>(stream: R, bus: &MessageBus) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stream).split(FRAME_DELIMITER);
    while let Some(segment) = segments.next_segment().await? {
        if segment.is_empty() {
            continue;
        }
        bus.publish_frame(Frame::from(segment));
        if bus.receiver_count() == 0 {
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire;
    use serde_json::{Value, json};

    #[test]
    fn parse_ipc_endpoint() {
        let ep: Endpoint = "ipc:///tmp/RAAI/control_panel.ipc".parse().unwrap();
        assert_eq!(ep, Endpoint::Ipc(PathBuf::from("/tmp/RAAI/control_panel.ipc")));
        assert_eq!(ep.to_string(), "ipc:///tmp/RAAI/control_panel.ipc");
    }

    #[test]
    fn parse_tcp_endpoint() {
        let ep: Endpoint = "tcp://127.0.0.1:5555".parse().unwrap();
        assert_eq!(ep, Endpoint::Tcp("127.0.0.1:5555".to_string()));
    }

    #[test]
    fn reject_unknown_scheme_and_incomplete_addresses() {
        assert!(matches!("udp://1.2.3.4:1".parse::<Endpoint>(), Err(VowError::Config(_))));
        assert!("ipc://".parse::<Endpoint>().is_err());
        assert!("tcp://localhost".parse::<Endpoint>().is_err());
    }

    /// Publish repeatedly until the background dialer has connected and the
    /// first matching frame arrives.
    async fn first_frame(publisher: &Publisher, sub: &mut Subscription) -> Frame {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                publisher
                    .publish("driver_input", &json!({"throttle": 42}))
                    .expect("publish");
                if let Some(frame) = sub.try_recv() {
                    return frame;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("subscriber never received a frame")
    }

    #[tokio::test]
    async fn tcp_publisher_reaches_dialed_subscriber() {
        let publisher = Publisher::listen("tcp://127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        assert!(!publisher.endpoint().to_string().ends_with(":0"));

        let mut sub = dial(publisher.endpoint().clone(), "driver_input");
        let frame = first_frame(&publisher, &mut sub).await;
        let value: Value = wire::decode_payload(&frame).unwrap();
        assert_eq!(value["throttle"], json!(42));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ipc_publisher_reaches_dialed_subscriber() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join("writer.ipc");
        let publisher = Publisher::listen(Endpoint::Ipc(path.clone()))
            .await
            .expect("bind");

        let mut sub = dial(Endpoint::Ipc(path), "driver_input");
        let frame = first_frame(&publisher, &mut sub).await;
        assert!(frame.starts_with(b"driver_input "));
    }

    #[tokio::test]
    async fn dialed_subscription_filters_other_topics() {
        let publisher = Publisher::listen("tcp://127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let mut config_sub = dial(publisher.endpoint().clone(), "config");
        let mut driver_sub = dial(publisher.endpoint().clone(), "driver_input");

        // Every frame on the wire is a driver_input frame; whatever reached
        // the config subscription so far must have been filtered.
        first_frame(&publisher, &mut driver_sub).await;
        assert!(config_sub.try_recv().is_none());
    }
}
