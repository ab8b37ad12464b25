//! Output encoder trait and the Pikoder PPM implementation.
//!
//! The dispatch loop only ever talks to [`OutputEncoder`], so the encoder can
//! be swapped for a simulation double without touching the scaling logic.
//!
//! # Channel layout
//!
//! | Channel | Signal |
//! |---|---|
//! | 1 | Combined throttle (positive) / brake (negative) |
//! | 2 | Steering, negated |
//! | 3 | Head-tracker yaw, raw pulse width |
//!
//! # Acknowledgement drain
//!
//! The Pikoder answers every command with an acknowledgement byte.  Nobody
//! consumes them, and once the host-side input buffer fills up the link
//! stalls without an error.  [`PikoderEncoder`] therefore reads and discards
//! everything waiting on the link after every command it writes, whether or
//! not the write itself succeeded.

use std::time::Duration;

use tracing::{debug, trace};
use vow_types::VowError;

use crate::ppm::{ChannelValue, PPM_BAUD_RATE, PpmEncoder};
use crate::serial::{SerialLink, SerialPortLink};

/// Combined throttle/brake channel.
pub const PEDAL_CHANNEL: u8 = 1;
/// Steering channel.
pub const STEERING_CHANNEL: u8 = 2;
/// Head-tracker yaw channel.
pub const HEAD_TRACKER_CHANNEL: u8 = 3;

/// Yaw deflection (degrees) that moves the head-tracker channel by 1000 µs.
pub const HEAD_TRACKER_FULL_SCALE_DEG: f64 = 45.0;

/// Read timeout for the encoder link; only buffered bytes are ever read.
const ENCODER_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// A device that turns scaled driver input into vehicle actuation.
pub trait OutputEncoder: Send {
    /// Stable identifier, e.g. the serial device name.
    fn id(&self) -> &str;

    /// Apply one cycle of scaled driver input (percentages).
    ///
    /// # Errors
    ///
    /// Returns [`VowError::HardwareFault`] if the device rejects a command.
    fn update_driver_input(
        &mut self,
        throttle_percent: f64,
        brake_percent: f64,
        steering_percent: f64,
    ) -> Result<(), VowError>;

    /// Apply a neutralized head yaw angle in degrees.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::HardwareFault`] if the device rejects a command.
    fn update_head_tracker_input(&mut self, yaw_angle: f64) -> Result<(), VowError>;
}

/// Value for the combined pedal channel: the larger of throttle and brake
/// wins, brake is sent negated, and both at zero means neutral.
pub fn combined_pedal_percentage(throttle_percent: f64, brake_percent: f64) -> f64 {
    if throttle_percent == 0.0 && brake_percent == 0.0 {
        0.0
    } else if throttle_percent > brake_percent {
        throttle_percent
    } else {
        -brake_percent
    }
}

/// Raw pulse width for a neutralized yaw angle, truncated toward zero.
pub fn head_tracker_pulse(yaw_angle: f64) -> i32 {
    (1500.0 - 1000.0 * (yaw_angle / HEAD_TRACKER_FULL_SCALE_DEG)) as i32
}

/// Pikoder USB-to-PPM encoder.
pub struct PikoderEncoder<L> {
    id: String,
    ppm: PpmEncoder<L>,
}

impl PikoderEncoder<SerialPortLink> {
    /// Open the encoder on serial device `path` at the Pikoder baud rate.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::DeviceUnavailable`] if the port cannot be opened.
    pub fn open(path: &str) -> Result<Self, VowError> {
        let link = SerialPortLink::open(path, PPM_BAUD_RATE, ENCODER_READ_TIMEOUT)?;
        Ok(Self::new(path, link))
    }
}

impl<L: SerialLink> PikoderEncoder<L> {
    pub fn new(id: impl Into<String>, link: L) -> Self {
        Self {
            id: id.into(),
            ppm: PpmEncoder::new(link),
        }
    }

    /// Last value written to `channel`.
    pub fn channel(&self, channel: u8) -> Option<ChannelValue> {
        self.ppm.channel(channel)
    }

    fn set_percentage(&mut self, channel: u8, percentage: f64) -> Result<(), VowError> {
        let written = self.ppm.set_channel_percentage_bounded(channel, percentage);
        let drained = self.drain_input();
        written.and(drained)
    }

    fn set_raw(&mut self, channel: u8, pulse_us: i32) -> Result<(), VowError> {
        let written = self.ppm.set_channel_raw_unbounded(channel, pulse_us);
        let drained = self.drain_input();
        written.and(drained)
    }

    /// Read and discard every byte currently waiting on the link.
    fn drain_input(&mut self) -> Result<(), VowError> {
        let link = self.ppm.link_mut();
        let pending = link.bytes_to_read()?;
        if pending == 0 {
            return Ok(());
        }
        let mut buffer = vec![0u8; pending];
        let mut discarded = 0;
        while discarded < pending {
            let n = link.read(&mut buffer[discarded..])?;
            if n == 0 {
                break;
            }
            discarded += n;
        }
        trace!(encoder = %self.id, discarded, "drained encoder acknowledgements");
        Ok(())
    }
}

impl<L: SerialLink> OutputEncoder for PikoderEncoder<L> {
    fn id(&self) -> &str {
        &self.id
    }

    fn update_driver_input(
        &mut self,
        throttle_percent: f64,
        brake_percent: f64,
        steering_percent: f64,
    ) -> Result<(), VowError> {
        self.set_percentage(STEERING_CHANNEL, -steering_percent)?;
        let pedal = combined_pedal_percentage(throttle_percent, brake_percent);
        self.set_percentage(PEDAL_CHANNEL, pedal)?;
        debug!(encoder = %self.id, pedal, steering = -steering_percent, "driver input written");
        Ok(())
    }

    fn update_head_tracker_input(&mut self, yaw_angle: f64) -> Result<(), VowError> {
        let pulse = head_tracker_pulse(yaw_angle);
        self.set_raw(HEAD_TRACKER_CHANNEL, pulse)?;
        debug!(encoder = %self.id, yaw_angle, pulse, "head tracker yaw written");
        Ok(())
    }
}
