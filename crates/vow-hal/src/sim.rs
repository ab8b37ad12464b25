//! In-process simulation doubles for CI without hardware attached.
//!
//! Both doubles are cheap handles around shared state: clone one, move the
//! clone into the code under test, and inspect the original afterwards.
//!
//! # Example
//!
//! ```rust
//! use vow_hal::encoder::{OutputEncoder, PikoderEncoder};
//! use vow_hal::sim::SimSerialLink;
//!
//! let link = SimSerialLink::new("pikoder").acknowledge_writes(b'\n');
//! let mut encoder = PikoderEncoder::new("pikoder", link.clone());
//!
//! encoder.update_driver_input(10.0, 0.0, 0.0).expect("sim write must succeed");
//! assert_eq!(link.written().len(), 2);
//! assert_eq!(link.pending_inbound(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vow_types::VowError;

use crate::encoder::OutputEncoder;
use crate::serial::SerialLink;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated serial link
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct LinkState {
    written: Vec<Vec<u8>>,
    inbound: VecDeque<u8>,
    ack_byte: Option<u8>,
    fail_writes: bool,
}

/// A [`SerialLink`] that records every write and serves injected bytes.
#[derive(Clone)]
pub struct SimSerialLink {
    name: String,
    state: Arc<Mutex<LinkState>>,
}

impl SimSerialLink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    /// Answer every successful write with `ack`, like the Pikoder does.
    pub fn acknowledge_writes(self, ack: u8) -> Self {
        lock(&self.state).ack_byte = Some(ack);
        self
    }

    /// Make subsequent writes fail (`true`) or succeed again (`false`).
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Queue bytes for the code under test to read.
    pub fn inject_inbound(&self, data: &[u8]) {
        lock(&self.state).inbound.extend(data);
    }

    /// Every successful write, one entry per call.
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    /// Number of inbound bytes not yet read.
    pub fn pending_inbound(&self) -> usize {
        lock(&self.state).inbound.len()
    }
}

impl SerialLink for SimSerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), VowError> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(VowError::HardwareFault {
                component: self.name.clone(),
                details: "simulated write failure".to_string(),
            });
        }
        state.written.push(data.to_vec());
        if let Some(ack) = state.ack_byte {
            state.inbound.push_back(ack);
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<usize, VowError> {
        Ok(lock(&self.state).inbound.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, VowError> {
        let mut state = lock(&self.state);
        let n = state.inbound.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated output encoder
// ────────────────────────────────────────────────────────────────────────────

/// One call recorded by [`SimEncoder`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncoderCall {
    DriverInput {
        throttle: f64,
        brake: f64,
        steering: f64,
    },
    HeadTracker {
        yaw_angle: f64,
    },
}

#[derive(Default)]
struct EncoderState {
    calls: Vec<EncoderCall>,
    fail: bool,
}

/// An [`OutputEncoder`] that records calls instead of driving hardware.
#[derive(Clone)]
pub struct SimEncoder {
    id: String,
    state: Arc<Mutex<EncoderState>>,
}

impl SimEncoder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::default(),
        }
    }

    /// Make subsequent updates fail with a hardware fault.
    pub fn fail_updates(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    /// Every successful call, in order.
    pub fn calls(&self) -> Vec<EncoderCall> {
        lock(&self.state).calls.clone()
    }

    fn record(&self, call: EncoderCall) -> Result<(), VowError> {
        let mut state = lock(&self.state);
        if state.fail {
            return Err(VowError::HardwareFault {
                component: self.id.clone(),
                details: "simulated encoder failure".to_string(),
            });
        }
        state.calls.push(call);
        Ok(())
    }
}

impl OutputEncoder for SimEncoder {
    fn id(&self) -> &str {
        &self.id
    }

    fn update_driver_input(
        &mut self,
        throttle_percent: f64,
        brake_percent: f64,
        steering_percent: f64,
    ) -> Result<(), VowError> {
        self.record(EncoderCall::DriverInput {
            throttle: throttle_percent,
            brake: brake_percent,
            steering: steering_percent,
        })
    }

    fn update_head_tracker_input(&mut self, yaw_angle: f64) -> Result<(), VowError> {
        self.record(EncoderCall::HeadTracker { yaw_angle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_link_serves_injected_bytes_in_order() {
        let mut link = SimSerialLink::new("tracker");
        link.inject_inbound(b"abc");
        assert_eq!(link.bytes_to_read().unwrap(), 3);

        let mut buf = [0u8; 2];
        assert_eq!(link.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(link.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(link.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn sim_link_acknowledges_writes() {
        let mut link = SimSerialLink::new("pikoder").acknowledge_writes(0x06);
        link.write_all(b"1P1500\r").unwrap();
        link.write_all(b"2P1500\r").unwrap();
        assert_eq!(link.pending_inbound(), 2);
        assert_eq!(link.written().len(), 2);
    }

    #[test]
    fn sim_encoder_records_calls_and_can_fail() {
        let handle = SimEncoder::new("sim");
        let mut encoder = handle.clone();
        encoder.update_driver_input(1.0, 2.0, 3.0).unwrap();
        encoder.update_head_tracker_input(4.0).unwrap();

        handle.fail_updates(true);
        assert!(encoder.update_driver_input(0.0, 0.0, 0.0).is_err());

        assert_eq!(
            handle.calls(),
            vec![
                EncoderCall::DriverInput {
                    throttle: 1.0,
                    brake: 2.0,
                    steering: 3.0,
                },
                EncoderCall::HeadTracker { yaw_angle: 4.0 },
            ]
        );
    }
}
