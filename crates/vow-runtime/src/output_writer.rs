//! [`VehicleOutputWriter`] – the fusion and dispatch loop.
//!
//! Each call to [`VehicleOutputWriter::run`] is one cycle:
//!
//! 1. **Receive** – wait until the control panel or the driver-input reader
//!    has a frame, then take one frame from every other source that is
//!    already ready.
//! 2. **Store** – decode each frame and replace the matching snapshot
//!    wholesale.
//! 3. **Scale** – [`compute_output`] from the latest snapshots.
//! 4. **Dispatch** – hand the result to the encoder, if one is attached, then
//!    publish it on the output sink, if one is attached.
//!
//! There is no internal timer; the caller owns the cadence.  A frame that
//! fails to decode or lacks a field fails the whole cycle: the snapshot it
//! would have replaced is kept and nothing is dispatched.  The caller logs
//! the error and calls `run()` again.
//!
//! # Example
//!
//! ```rust
//! use vow_hal::sim::SimEncoder;
//! use vow_middleware::MessageBus;
//! use vow_runtime::VehicleOutputWriter;
//! use vow_types::ThrottleConfig;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let panel = MessageBus::default();
//!     let driver = MessageBus::default();
//!     let encoder = SimEncoder::new("sim");
//!     let mut writer = VehicleOutputWriter::new(
//!         panel.subscribe("config"),
//!         driver.subscribe("driver_input"),
//!         ThrottleConfig::default(),
//!     )
//!     .with_encoder(Box::new(encoder.clone()));
//!
//!     let input = serde_json::json!({
//!         "throttle": 50, "brake": 0, "clutch": 0, "steering": -20
//!     });
//!     driver.publish("driver_input", &input).unwrap();
//!
//!     let output = writer.run().await.unwrap();
//!     assert!((output.throttle - 7.5).abs() < 1e-9);
//!     assert_eq!(encoder.calls().len(), 1);
//! });
//! ```

use serde_json::Value;
use tracing::{debug, info, warn};
use vow_hal::OutputEncoder;
use vow_middleware::{Frame, FrameSink, Subscription, wire};
use vow_types::{DriverInput, ThrottleConfig, VehicleOutput, VowError};

use crate::scaling::compute_output;

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// The inbound channels the loop multiplexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Operator limits, topic `config`.
    ControlPanel,
    /// Pedal and wheel snapshot, topic `driver_input`.
    DriverInput,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::ControlPanel, Source::DriverInput];

    pub fn name(self) -> &'static str {
        match self {
            Source::ControlPanel => "control_panel",
            Source::DriverInput => "driver_input",
        }
    }
}

struct Inbound {
    subscription: Subscription,
    open: bool,
}

impl Inbound {
    fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            open: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VehicleOutputWriter
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the latest control-panel and driver-input snapshots and turns them
/// into encoder commands.
pub struct VehicleOutputWriter {
    panel_inbound: Inbound,
    driver_inbound: Inbound,
    encoder: Option<Box<dyn OutputEncoder>>,
    output_sink: Option<(Box<dyn FrameSink>, String)>,
    throttle_config: ThrottleConfig,
    driver_input: DriverInput,
    last_output: Option<VehicleOutput>,
}

impl VehicleOutputWriter {
    /// Build a writer with no encoder and no output sink.  The driver input
    /// starts at all zeros.
    pub fn new(
        control_panel: Subscription,
        driver_input: Subscription,
        throttle_config: ThrottleConfig,
    ) -> Self {
        Self {
            panel_inbound: Inbound::new(control_panel),
            driver_inbound: Inbound::new(driver_input),
            encoder: None,
            output_sink: None,
            throttle_config,
            driver_input: DriverInput::default(),
            last_output: None,
        }
    }

    /// Attach the device that receives every dispatched output.
    pub fn with_encoder(mut self, encoder: Box<dyn OutputEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Publish every dispatched output on `sink` under `topic`.
    pub fn with_output_sink(mut self, sink: Box<dyn FrameSink>, topic: impl Into<String>) -> Self {
        self.output_sink = Some((sink, topic.into()));
        self
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn throttle_config(&self) -> &ThrottleConfig {
        &self.throttle_config
    }

    pub fn driver_input(&self) -> &DriverInput {
        &self.driver_input
    }

    /// Output of the last cycle that got as far as scaling.
    pub fn last_output(&self) -> Option<&VehicleOutput> {
        self.last_output.as_ref()
    }

    /// Run one receive → store → scale → dispatch cycle.
    ///
    /// Cancel-safe while waiting for input: dropping the future before a
    /// frame arrives loses nothing.
    ///
    /// # Errors
    ///
    /// - [`VowError::MissingField`] / [`VowError::Decode`] – a received frame
    ///   was unusable; nothing was dispatched.
    /// - [`VowError::HardwareFault`] – the encoder rejected the command.
    /// - [`VowError::Channel`] – the only ready source had just closed.
    /// - [`VowError::BusClosed`] – every source is closed; further calls
    ///   return the same error immediately.
    pub async fn run(&mut self) -> Result<VehicleOutput, VowError> {
        let (first, frame) = self.wait_for_ready_source().await?;

        let mut ready = vec![(first, frame)];
        for source in Source::ALL.into_iter().filter(|s| *s != first) {
            let inbound = self.inbound_mut(source);
            if !inbound.open {
                continue;
            }
            if let Some(frame) = inbound.subscription.try_recv() {
                ready.push((source, Some(frame)));
            }
        }

        let mut received = 0usize;
        let mut failure = None;
        for (source, frame) in ready {
            let Some(frame) = frame else {
                warn!(source = source.name(), "subscription closed");
                self.inbound_mut(source).open = false;
                continue;
            };
            match self.store(source, &frame) {
                Ok(()) => received += 1,
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if received == 0 {
            return Err(VowError::Channel(format!(
                "{} subscription closed",
                first.name()
            )));
        }

        let output = compute_output(&self.driver_input, &self.throttle_config);
        self.last_output = Some(output);
        self.dispatch(&output)?;
        self.publish(&output);
        Ok(output)
    }

    /// Send throttle 0, brake 0 and steering 0 to the encoder, if attached.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::HardwareFault`] if the encoder rejects the command.
    pub fn neutralize_outputs(&mut self) -> Result<(), VowError> {
        match self.encoder.as_mut() {
            Some(encoder) => {
                info!(encoder = encoder.id(), "sending neutral command");
                encoder.update_driver_input(0.0, 0.0, 0.0)
            }
            None => Ok(()),
        }
    }

    // ── Internal helpers ────────────────────────────────────────────────────

    async fn wait_for_ready_source(&mut self) -> Result<(Source, Option<Frame>), VowError> {
        let panel_open = self.panel_inbound.open;
        let driver_open = self.driver_inbound.open;
        tokio::select! {
            frame = self.panel_inbound.subscription.recv(), if panel_open => {
                Ok((Source::ControlPanel, frame))
            }
            frame = self.driver_inbound.subscription.recv(), if driver_open => {
                Ok((Source::DriverInput, frame))
            }
            else => Err(VowError::BusClosed),
        }
    }

    fn inbound_mut(&mut self, source: Source) -> &mut Inbound {
        match source {
            Source::ControlPanel => &mut self.panel_inbound,
            Source::DriverInput => &mut self.driver_inbound,
        }
    }

    fn store(&mut self, source: Source, frame: &[u8]) -> Result<(), VowError> {
        let value: Value = wire::decode_payload(frame)?;
        match source {
            Source::ControlPanel => {
                self.throttle_config = ThrottleConfig::from_value(&value)?;
                info!(config = ?self.throttle_config, "throttle config updated");
            }
            Source::DriverInput => {
                self.driver_input = DriverInput::from_value(&value)?;
                debug!(input = ?self.driver_input, "driver input received");
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, output: &VehicleOutput) -> Result<(), VowError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        encoder.update_driver_input(output.throttle, output.brake, output.steering)
    }

    fn publish(&self, output: &VehicleOutput) {
        let Some((sink, topic)) = &self.output_sink else {
            return;
        };
        match wire::encode_frame(topic, output) {
            Ok(frame) => {
                let peers = sink.send_frame(Frame::from(frame));
                debug!(topic = %topic, peers, "vehicle output published");
            }
            Err(e) => warn!(error = %e, "cannot encode vehicle output"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vow_hal::PikoderEncoder;
    use vow_hal::sim::{EncoderCall, SimEncoder, SimSerialLink};
    use vow_middleware::MessageBus;

    const EPS: f64 = 1e-9;

    struct Rig {
        panel: MessageBus,
        driver: MessageBus,
        encoder: SimEncoder,
        writer: VehicleOutputWriter,
    }

    fn rig() -> Rig {
        let panel = MessageBus::default();
        let driver = MessageBus::default();
        let encoder = SimEncoder::new("sim");
        let writer = VehicleOutputWriter::new(
            panel.subscribe("config"),
            driver.subscribe("driver_input"),
            ThrottleConfig::default(),
        )
        .with_encoder(Box::new(encoder.clone()));
        Rig {
            panel,
            driver,
            encoder,
            writer,
        }
    }

    fn driver_message(throttle: f64, brake: f64, clutch: f64, steering: f64) -> Value {
        json!({"throttle": throttle, "brake": brake, "clutch": clutch, "steering": steering})
    }

    #[tokio::test]
    async fn dispatches_scaled_driver_input() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig();
        rig.driver
            .publish("driver_input", &driver_message(50.0, 0.0, 0.0, -20.0))?;

        let output = rig.writer.run().await?;
        assert!((output.throttle - 7.5).abs() < EPS);
        assert!(output.brake.abs() < EPS);
        assert!((output.steering + 20.0).abs() < EPS);
        assert_eq!(
            rig.encoder.calls(),
            vec![EncoderCall::DriverInput {
                throttle: 7.5,
                brake: 0.0,
                steering: -20.0,
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn end_to_end_commands_reach_the_pikoder() -> Result<(), Box<dyn std::error::Error>> {
        let driver = MessageBus::default();
        let panel = MessageBus::default();
        let link = SimSerialLink::new("pikoder").acknowledge_writes(b'\n');
        let mut writer = VehicleOutputWriter::new(
            panel.subscribe("config"),
            driver.subscribe("driver_input"),
            ThrottleConfig::default(),
        )
        .with_encoder(Box::new(PikoderEncoder::new("pikoder", link.clone())));

        driver.publish("driver_input", &driver_message(50.0, 0.0, 0.0, -20.0))?;
        writer.run().await?;

        // Steering -20 is negated to +20 %; throttle 7.5 % rounds to 1538 µs.
        assert_eq!(
            link.written(),
            vec![b"2P1600\r".to_vec(), b"1P1538\r".to_vec()]
        );
        assert_eq!(link.pending_inbound(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn both_ready_sources_are_taken_in_one_cycle() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig();
        rig.panel.publish(
            "config",
            &json!({
                "max_throttle": 100, "max_brake": 100, "max_clutch": 100,
                "max_steering": 50, "steering_offset": 2.0
            }),
        )?;
        rig.driver
            .publish("driver_input", &driver_message(40.0, 0.0, 0.0, 10.0))?;

        let output = rig.writer.run().await?;
        assert!((output.throttle - 40.0).abs() < EPS);
        assert!((output.steering - 7.0).abs() < EPS);
        assert_eq!(rig.encoder.calls().len(), 1);
        assert!((rig.writer.throttle_config().max_steering - 50.0).abs() < EPS);
        Ok(())
    }

    #[tokio::test]
    async fn config_replaces_previous_limits_wholesale() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig();
        rig.panel.publish(
            "config",
            &json!({
                "max_throttle": 80, "max_brake": 20, "max_clutch": 10,
                "max_steering": 90, "steering_offset": -1.0,
                "head_tracking_status": true
            }),
        )?;
        rig.writer.run().await?;

        assert_eq!(
            *rig.writer.throttle_config(),
            ThrottleConfig {
                max_throttle: 80.0,
                max_brake: 20.0,
                max_clutch: 10.0,
                max_steering: 90.0,
                steering_offset: -1.0,
            }
        );
        // Driver input is still the all-zero initial snapshot.
        let output = rig.writer.last_output().copied().ok_or("no output")?;
        assert!((output.steering + 1.0).abs() < EPS);
        Ok(())
    }

    #[tokio::test]
    async fn clutch_dominating_brake_is_dispatched_as_brake() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig();
        rig.driver
            .publish("driver_input", &driver_message(0.0, 10.0, 60.0, 0.0))?;

        let output = rig.writer.run().await?;
        // Default max_clutch is 50 %.
        assert!((output.brake - 30.0).abs() < EPS);
        Ok(())
    }

    #[tokio::test]
    async fn missing_field_fails_the_cycle_and_keeps_the_snapshot()
    -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig();
        rig.driver
            .publish("driver_input", &json!({"throttle": 30, "steering": 5}))?;

        match rig.writer.run().await {
            Err(VowError::MissingField { message, field }) => {
                assert_eq!(message, "driver_input");
                assert_eq!(field, "brake");
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
        assert!(rig.encoder.calls().is_empty());
        assert_eq!(*rig.writer.driver_input(), DriverInput::default());

        // The next good message recovers.
        rig.driver
            .publish("driver_input", &driver_message(30.0, 0.0, 0.0, 5.0))?;
        rig.writer.run().await?;
        assert_eq!(rig.encoder.calls().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let mut rig = rig();
        rig.driver
            .publish_frame(Frame::from(b"driver_input {not json".to_vec()));

        assert!(matches!(rig.writer.run().await, Err(VowError::Decode(_))));
        assert!(rig.encoder.calls().is_empty());
    }

    #[tokio::test]
    async fn runs_without_an_encoder() -> Result<(), Box<dyn std::error::Error>> {
        let panel = MessageBus::default();
        let driver = MessageBus::default();
        let mut writer = VehicleOutputWriter::new(
            panel.subscribe("config"),
            driver.subscribe("driver_input"),
            ThrottleConfig::default(),
        );
        assert!(!writer.has_encoder());
        assert!(writer.neutralize_outputs().is_ok());

        driver.publish("driver_input", &driver_message(100.0, 0.0, 0.0, 0.0))?;
        let output = writer.run().await?;
        assert!((output.throttle - 15.0).abs() < EPS);
        Ok(())
    }

    #[tokio::test]
    async fn dispatched_output_is_published() -> Result<(), Box<dyn std::error::Error>> {
        let out_bus = MessageBus::default();
        let mut out_sub = out_bus.subscribe("vehicle_output");
        let rig = rig();
        let mut writer = rig
            .writer
            .with_output_sink(Box::new(out_bus.clone()), "vehicle_output");

        rig.driver
            .publish("driver_input", &driver_message(20.0, 0.0, 0.0, 0.0))?;
        let output = writer.run().await?;

        let frame = out_sub.try_recv().ok_or("nothing published")?;
        let published: VehicleOutput = wire::decode_payload(&frame)?;
        assert_eq!(published, output);
        Ok(())
    }

    #[tokio::test]
    async fn encoder_failure_surfaces_after_storing_input() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig();
        rig.encoder.fail_updates(true);
        rig.driver
            .publish("driver_input", &driver_message(10.0, 0.0, 0.0, 0.0))?;

        assert!(matches!(
            rig.writer.run().await,
            Err(VowError::HardwareFault { .. })
        ));
        assert!((rig.writer.driver_input().throttle - 10.0).abs() < EPS);
        Ok(())
    }

    #[tokio::test]
    async fn one_closed_source_does_not_stop_the_other() -> Result<(), Box<dyn std::error::Error>> {
        let Rig {
            panel,
            driver,
            encoder,
            mut writer,
        } = rig();
        drop(panel);
        driver.publish("driver_input", &driver_message(10.0, 0.0, 0.0, 0.0))?;

        writer.run().await?;
        assert_eq!(encoder.calls().len(), 1);

        driver.publish("driver_input", &driver_message(20.0, 0.0, 0.0, 0.0))?;
        let output = writer.run().await?;
        assert!((output.throttle - 3.0).abs() < EPS);
        Ok(())
    }

    #[tokio::test]
    async fn closed_bus_ends_with_bus_closed() {
        let Rig {
            panel,
            driver,
            encoder,
            mut writer,
        } = rig();
        drop(panel);
        drop(driver);

        assert!(matches!(writer.run().await, Err(VowError::Channel(_))));
        assert!(matches!(writer.run().await, Err(VowError::Channel(_))));
        assert!(matches!(writer.run().await, Err(VowError::BusClosed)));
        assert!(matches!(writer.run().await, Err(VowError::BusClosed)));
        assert!(encoder.calls().is_empty());
    }

    #[tokio::test]
    async fn neutralize_sends_zero_command() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig();
        rig.writer.neutralize_outputs()?;
        assert_eq!(
            rig.encoder.calls(),
            vec![EncoderCall::DriverInput {
                throttle: 0.0,
                brake: 0.0,
                steering: 0.0,
            }]
        );
        Ok(())
    }
}
