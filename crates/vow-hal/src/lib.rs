//! `vow-hal` – Hardware Abstraction Layer
//!
//! Everything that touches a serial port lives here so the dispatch loop
//! only ever talks to traits.
//!
//! # Modules
//!
//! - [`serial`] – [`SerialLink`][serial::SerialLink]: the "send bytes / read
//!   available bytes" capability, backed by the `serialport` crate.
//! - [`ppm`] – [`PpmEncoder`][ppm::PpmEncoder]: channel-indexed percentage and
//!   raw pulse commands for a serial PPM encoder, with per-channel state.
//! - [`encoder`] – [`OutputEncoder`][encoder::OutputEncoder] and the
//!   [`PikoderEncoder`][encoder::PikoderEncoder] that maps driver input onto
//!   PPM channels and drains the encoder's acknowledgements after every
//!   write.
//! - [`sim`] – in-process doubles for CI without hardware attached.

pub mod encoder;
pub mod ppm;
pub mod serial;
pub mod sim;

pub use encoder::{OutputEncoder, PikoderEncoder};
pub use ppm::{ChannelValue, PpmEncoder};
pub use serial::{SerialLink, SerialPortLink};
