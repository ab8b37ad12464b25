//! Serial head-tracker driver.

use std::time::Duration;

use vow_hal::serial::{SerialLink, SerialPortLink};
use vow_types::VowError;

use crate::orientation::OrientationReader;

/// Baud rate of the head tracker's serial interface.
pub const HEAD_TRACKER_BAUD_RATE: u32 = 115_200;

const HEAD_TRACKER_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Pulls whatever bytes the tracker has sent and feeds them to an
/// [`OrientationReader`].
pub struct HeadTracker<L> {
    link: L,
    reader: OrientationReader,
}

impl HeadTracker<SerialPortLink> {
    /// Open the tracker on serial device `path`.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::DeviceUnavailable`] if the port cannot be opened.
    pub fn open(path: &str) -> Result<Self, VowError> {
        let link = SerialPortLink::open(path, HEAD_TRACKER_BAUD_RATE, HEAD_TRACKER_READ_TIMEOUT)?;
        Ok(Self::new(link))
    }
}

impl<L: SerialLink> HeadTracker<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            reader: OrientationReader::new(),
        }
    }

    /// Read every byte currently waiting and feed it to the reader without
    /// blocking.  Returns `true` if a new reading was parsed.
    ///
    /// # Errors
    ///
    /// Propagates link failures.  Malformed lines are not errors; they are
    /// dropped by the reader.
    pub fn poll(&mut self) -> Result<bool, VowError> {
        let pending = self.link.bytes_to_read()?;
        if pending == 0 {
            return Ok(false);
        }
        let mut chunk = vec![0u8; pending];
        let n = self.link.read(&mut chunk)?;
        Ok(self.reader.feed(&chunk[..n]))
    }

    pub fn reader(&self) -> &OrientationReader {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut OrientationReader {
        &mut self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vow_hal::sim::SimSerialLink;

    #[test]
    fn poll_without_input_reports_nothing() {
        let mut tracker = HeadTracker::new(SimSerialLink::new("tracker"));
        assert!(!tracker.poll().unwrap());
    }

    #[test]
    fn poll_parses_line_split_across_reads() {
        let link = SimSerialLink::new("tracker");
        let mut tracker = HeadTracker::new(link.clone());

        link.inject_inbound(br#"{"angleYaw": 2"#);
        assert!(!tracker.poll().unwrap());
        link.inject_inbound(b"00.0, \"angleRoll\": 1}\n");
        assert!(tracker.poll().unwrap());

        assert!((tracker.reader().get_yaw_angle().unwrap() + 160.0).abs() < 1e-9);
        assert_eq!(link.pending_inbound(), 0);
    }

    #[test]
    fn neutralized_yaw_through_the_driver() {
        let link = SimSerialLink::new("tracker");
        let mut tracker = HeadTracker::new(link.clone());

        link.inject_inbound(b"{\"angleYaw\": 350}\n");
        tracker.poll().unwrap();
        assert!(tracker.reader_mut().read_neutralized_yaw_angle().unwrap().abs() < 1e-9);

        link.inject_inbound(b"{\"angleYaw\": 5}\n");
        tracker.poll().unwrap();
        // -10 → 5 is a 15 degree turn.
        let yaw = tracker.reader_mut().read_neutralized_yaw_angle().unwrap();
        assert!((yaw - 15.0).abs() < 1e-9);
    }
}
