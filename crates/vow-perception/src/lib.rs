//! `vow-perception` – head orientation input.
//!
//! # Modules
//!
//! - [`orientation`] – [`OrientationReader`][orientation::OrientationReader]:
//!   incremental newline-delimited JSON parser for head-tracker telemetry,
//!   with yaw normalisation and a resettable zero reference.
//! - [`head_tracker`] – [`HeadTracker`][head_tracker::HeadTracker]: feeds the
//!   reader from a serial link.

pub mod head_tracker;
pub mod orientation;

pub use head_tracker::HeadTracker;
pub use orientation::{NeutralizedYaw, OrientationReader, ReaderState};
