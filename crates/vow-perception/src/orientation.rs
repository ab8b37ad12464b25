//! Incremental head-tracker telemetry parser.
//!
//! The tracker streams one flat JSON object per line, e.g.
//!
//! ```text
//! {"angleYaw": 271.3, "anglePitch": 2.1, "angleRoll": -0.4}\n
//! ```
//!
//! Bytes arrive in arbitrary chunks.  [`OrientationReader::feed`] accumulates
//! them and, whenever a chunk ends a line, decodes the accumulated line.  A
//! line that is not valid UTF-8 or not a valid reading is dropped together
//! with the buffer, so a corrupt line never leaks into the next one.
//!
//! # Example
//!
//! ```rust
//! use vow_perception::orientation::OrientationReader;
//!
//! let mut reader = OrientationReader::new();
//! assert!(!reader.feed(br#"{"angleYaw": 3"#));
//! assert!(reader.feed(b"70}\n"));
//! assert!((reader.get_yaw_angle().unwrap() - 10.0).abs() < 1e-9);
//! ```

use tracing::{debug, warn};
use vow_types::{OrientationReading, VowError};

/// Upper bound on an unterminated line before it is thrown away.
const MAX_LINE_BYTES: usize = 4096;

const LINE_TERMINATOR: u8 = b'\n';

/// Where the reader is in its line cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Nothing buffered; the last line (if any) was discarded.
    Idle,
    /// Part of a line is buffered.
    Accumulating,
    /// The last line parsed; its reading is available.
    Ready,
}

/// Zero reference for yaw, captured on the first read after a reset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NeutralizedYaw {
    initial_yaw_angle: f64,
    initial_yaw_angle_set: bool,
}

impl NeutralizedYaw {
    /// Return `yaw` relative to the anchor, capturing `yaw` as the anchor
    /// first if none is set.
    pub fn neutralize(&mut self, yaw: f64) -> f64 {
        if !self.initial_yaw_angle_set {
            self.initial_yaw_angle = yaw;
            self.initial_yaw_angle_set = true;
        }
        yaw - self.initial_yaw_angle
    }

    /// Forget the anchor; the next [`neutralize`][Self::neutralize] re-anchors.
    pub fn reset(&mut self) {
        self.initial_yaw_angle_set = false;
    }

    pub fn is_set(&self) -> bool {
        self.initial_yaw_angle_set
    }
}

/// Map a `[0, 360)` yaw onto `(-180, 180]`.
pub fn normalize_yaw(angle_yaw: f64) -> f64 {
    if angle_yaw > 180.0 {
        angle_yaw - 360.0
    } else {
        angle_yaw
    }
}

/// Line-buffered parser for head-tracker telemetry.
#[derive(Debug)]
pub struct OrientationReader {
    buffer: Vec<u8>,
    state: ReaderState,
    last_reading: Option<OrientationReading>,
    neutral: NeutralizedYaw,
}

impl OrientationReader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: ReaderState::Idle,
            last_reading: None,
            neutral: NeutralizedYaw::default(),
        }
    }

    /// Feed newly received bytes.
    ///
    /// `chunk` is processed line by line; only a line terminator inside
    /// `chunk` triggers a decode.  Returns `true` if any line in `chunk`
    /// produced a new reading, `false` if none did.
    ///
    /// The return value covers the whole chunk while [`state`][Self::state]
    /// reflects only its last line, so a chunk whose good line is followed by
    /// a malformed one returns `true` and leaves the reader
    /// [`Idle`][ReaderState::Idle] with the good reading stored.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        let mut parsed = false;
        for segment in chunk.split_inclusive(|b| *b == LINE_TERMINATOR) {
            parsed |= self.feed_segment(segment);
        }
        parsed
    }

    fn feed_segment(&mut self, segment: &[u8]) -> bool {
        if segment.is_empty() {
            return false;
        }
        self.buffer.extend_from_slice(segment);
        self.state = ReaderState::Accumulating;

        if segment.last() != Some(&LINE_TERMINATOR) {
            if self.buffer.len() > MAX_LINE_BYTES {
                warn!(bytes = self.buffer.len(), "head tracker line too long; discarding");
                self.discard();
            }
            return false;
        }

        let decoded = Self::decode_line(&self.buffer);
        self.buffer.clear();
        match decoded {
            Ok(reading) => {
                debug!(angle_yaw = reading.angle_yaw, "head tracker reading");
                self.last_reading = Some(reading);
                self.state = ReaderState::Ready;
                true
            }
            Err(e) => {
                warn!(error = %e, "discarding malformed head tracker line");
                self.state = ReaderState::Idle;
                false
            }
        }
    }

    fn decode_line(line: &[u8]) -> Result<OrientationReading, VowError> {
        let text = std::str::from_utf8(line)
            .map_err(|e| VowError::Decode(format!("head tracker line is not UTF-8: {e}")))?;
        serde_json::from_str(text)
            .map_err(|e| VowError::Decode(format!("invalid head tracker JSON: {e}")))
    }

    fn discard(&mut self) {
        self.buffer.clear();
        self.state = ReaderState::Idle;
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The most recent successfully parsed reading.
    pub fn last_reading(&self) -> Option<&OrientationReading> {
        self.last_reading.as_ref()
    }

    /// Yaw of the last reading, normalised to `(-180, 180]`.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::NoReading`] before the first successful parse.
    pub fn get_yaw_angle(&self) -> Result<f64, VowError> {
        self.last_reading
            .as_ref()
            .map(|r| normalize_yaw(r.angle_yaw))
            .ok_or(VowError::NoReading)
    }

    /// Yaw relative to the zero reference.  The first call after creation or
    /// [`reset_initial_yaw_angle`][Self::reset_initial_yaw_angle] captures
    /// the current yaw as the reference and returns `0`.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::NoReading`] before the first successful parse; the
    /// reference is left untouched in that case.
    pub fn read_neutralized_yaw_angle(&mut self) -> Result<f64, VowError> {
        let yaw = self.get_yaw_angle()?;
        Ok(self.neutral.neutralize(yaw))
    }

    /// Re-anchor the zero reference on the next read.
    pub fn reset_initial_yaw_angle(&mut self) {
        self.neutral.reset();
    }
}

impl Default for OrientationReader {
    fn default() -> Self {
        Self::new()
    }
}
