//! `vow-middleware` – The Message Gateway
//!
//! Moves topic-prefixed JSON frames between the control panel, the
//! driver-input reader and the output writer without caring about what the
//! payload means.
//!
//! # Modules
//!
//! - [`wire`] – `<topic> <json>` framing helpers.
//! - [`bus`] – in-process, topic-prefix-filtered publish/subscribe bus built
//!   on Tokio broadcast channels, plus the [`Subscription`] handle shared by
//!   every transport.
//! - [`socket`] – the same pub/sub model carried over Unix-domain (`ipc://`)
//!   or TCP (`tcp://`) sockets.

pub mod bus;
pub mod socket;
pub mod wire;

pub use bus::{Frame, FrameSink, MessageBus, Subscription};
pub use socket::{Endpoint, Publisher, dial};
