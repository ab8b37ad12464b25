//! In-process, topic-prefix-filtered publish/subscribe bus.
//!
//! Uses [`tokio::sync::broadcast`] under the hood so that every subscriber
//! sees every frame without any single subscriber blocking the others.
//! Filtering happens on the receiving side: a [`Subscription`] only yields
//! frames whose bytes start with its topic prefix, the same rule the socket
//! transport applies.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;
use vow_types::VowError;

use crate::wire;

/// Default channel capacity (number of buffered frames before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// One encoded `<topic> <json>` message.
pub type Frame = Arc<[u8]>;

/// Anything that can take an encoded frame and deliver it to subscribers.
///
/// Implemented by [`MessageBus`] and [`crate::socket::Publisher`] so callers
/// can hold either behind one `Box<dyn FrameSink>`.
pub trait FrameSink: Send {
    /// Deliver `frame`; returns how many subscribers it was queued for.
    fn send_frame(&self, frame: Frame) -> usize;
}

/// Shared message bus. Clone it cheaply – all clones share the same
/// underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct MessageBus {
    sender: broadcast::Sender<Frame>,
}

impl MessageBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Encode `payload` under `topic` and publish it.
    ///
    /// Returns the number of subscriptions that were handed the frame.
    /// `Ok(0)` means nobody is listening, which is a normal condition.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::Decode`] if the payload cannot be serialised.
    pub fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<usize, VowError> {
        let frame = wire::encode_frame(topic, payload)?;
        Ok(self.publish_frame(Frame::from(frame)))
    }

    /// Publish an already-encoded frame as-is.
    pub fn publish_frame(&self, frame: Frame) -> usize {
        self.sender.send(frame).unwrap_or(0)
    }

    /// Subscribe to every frame starting with `topic`.  An empty topic
    /// matches everything.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        Subscription {
            topic: topic.into(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl FrameSink for MessageBus {
    fn send_frame(&self, frame: Frame) -> usize {
        self.publish_frame(frame)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A receiver bound to one topic prefix.
///
/// Obtained from [`MessageBus::subscribe`] or [`crate::socket::dial`].
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Frame>,
}

impl Subscription {
    /// Wait for the next frame matching this subscription's topic.
    ///
    /// Returns `None` once the publishing side has shut down.  Cancel-safe:
    /// dropping the future before it completes loses no frame.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) if frame.starts_with(self.topic.as_bytes()) => return Some(frame),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "Subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Frame> {
        loop {
            match self.receiver.try_recv() {
                Ok(frame) if frame.starts_with(self.topic.as_bytes()) => return Some(frame),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "Subscription lagged");
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }

    /// The topic prefix this subscription filters on.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
