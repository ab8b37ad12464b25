//! `vow-runtime` – the vehicle output writer's control core.
//!
//! # Modules
//!
//! - [`scaling`] – [`compute_output`][scaling::compute_output]: applies the
//!   operator's [`ThrottleConfig`][vow_types::ThrottleConfig] limits to the
//!   latest [`DriverInput`][vow_types::DriverInput].
//! - [`output_writer`] – [`VehicleOutputWriter`][output_writer::VehicleOutputWriter]:
//!   the fusion and dispatch loop.  Each call to `run()` waits for the control
//!   panel or the driver-input reader, stores whatever arrived, scales it and
//!   hands the result to the attached encoder.
//! - [`devices`] – typed acquisition of the Pikoder encoder and the head
//!   tracker, plus the head-tracker monitor thread.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod devices;
pub mod output_writer;
pub mod scaling;
pub mod telemetry;

pub use devices::{HeadTrackerMonitor, acquire_encoder, acquire_head_tracker};
pub use output_writer::{Source, VehicleOutputWriter};
pub use scaling::compute_output;
pub use telemetry::{TracerProviderGuard, init_tracing};
