//! Serial PPM encoder protocol.
//!
//! Each command sets the pulse width of one PPM channel and is sent as ASCII
//! text:
//!
//! ```text
//! <channel>P<pulse_us>\r
//! ```
//!
//! Percentages map linearly around the neutral pulse: `-100 %` → 1000 µs,
//! `0 %` → 1500 µs, `+100 %` → 2000 µs.

use std::collections::BTreeMap;

use tracing::trace;
use vow_types::VowError;

use crate::serial::SerialLink;

/// Baud rate the encoder's USB-serial interface is fixed to.
pub const PPM_BAUD_RATE: u32 = 9600;

/// Pulse width for a centred channel (µs).
pub const NEUTRAL_PULSE_US: i32 = 1500;

/// Pulse-width change per percent of deflection (µs).
pub const PULSE_US_PER_PERCENT: f64 = 5.0;

/// Largest deflection accepted by [`PpmEncoder::set_channel_percentage_bounded`].
pub const MAX_PERCENTAGE: f64 = 100.0;

/// Last value written to a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelValue {
    /// Deflection in percent, after bounding.
    Percentage(f64),
    /// Raw pulse width in µs, as written.
    Raw(i32),
}

/// Convert a percentage deflection to a pulse width, rounded to the nearest
/// microsecond.
pub fn percentage_to_pulse(percentage: f64) -> i32 {
    (f64::from(NEUTRAL_PULSE_US) + percentage * PULSE_US_PER_PERCENT).round() as i32
}

/// Encode one channel command.
pub fn encode_command(channel: u8, pulse_us: i32) -> Vec<u8> {
    format!("{channel}P{pulse_us}\r").into_bytes()
}

/// Channel-indexed command writer on top of a [`SerialLink`].
///
/// Remembers the last value written to every channel; a failed write leaves
/// the channel's previous value in place.
pub struct PpmEncoder<L> {
    link: L,
    channels: BTreeMap<u8, ChannelValue>,
}

impl<L: SerialLink> PpmEncoder<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            channels: BTreeMap::new(),
        }
    }

    /// Set `channel` to `percentage`, clamped to `[-100, 100]`.
    ///
    /// # Errors
    ///
    /// Propagates the link's [`VowError::HardwareFault`].
    pub fn set_channel_percentage_bounded(
        &mut self,
        channel: u8,
        percentage: f64,
    ) -> Result<(), VowError> {
        let bounded = percentage.clamp(-MAX_PERCENTAGE, MAX_PERCENTAGE);
        self.write_pulse(channel, percentage_to_pulse(bounded))?;
        self.channels.insert(channel, ChannelValue::Percentage(bounded));
        Ok(())
    }

    /// Set `channel` to a raw pulse width without any range check.
    ///
    /// # Errors
    ///
    /// Propagates the link's [`VowError::HardwareFault`].
    pub fn set_channel_raw_unbounded(&mut self, channel: u8, pulse_us: i32) -> Result<(), VowError> {
        self.write_pulse(channel, pulse_us)?;
        self.channels.insert(channel, ChannelValue::Raw(pulse_us));
        Ok(())
    }

    /// Last value successfully written to `channel`.
    pub fn channel(&self, channel: u8) -> Option<ChannelValue> {
        self.channels.get(&channel).copied()
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn write_pulse(&mut self, channel: u8, pulse_us: i32) -> Result<(), VowError> {
        trace!(channel, pulse_us, "ppm command");
        self.link.write_all(&encode_command(channel, pulse_us))
    }
}
