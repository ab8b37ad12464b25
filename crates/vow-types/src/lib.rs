use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Snapshot of the driver's pedal and wheel positions as published by the
/// driver-input reader.
///
/// Every field is a signed percentage in `[-100, 100]`.  Range checking is the
/// publisher's responsibility; values are passed through as received.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriverInput {
    pub throttle: f64,
    pub brake: f64,
    pub clutch: f64,
    pub steering: f64,
}

impl DriverInput {
    /// Extract a full snapshot from a decoded `driver_input` message.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::MissingField`] when any of the four keys is absent
    /// and [`VowError::Decode`] when a key is present but not numeric.
    pub fn from_value(value: &Value) -> Result<Self, VowError> {
        const MESSAGE: &str = "driver_input";
        Ok(Self {
            throttle: require_f64(value, MESSAGE, "throttle")?,
            brake: require_f64(value, MESSAGE, "brake")?,
            clutch: require_f64(value, MESSAGE, "clutch")?,
            steering: require_f64(value, MESSAGE, "steering")?,
        })
    }
}

/// Operator-set scaling limits pushed by the control panel.
///
/// The `max_*` fields are percent-of-percent ceilings; `steering_offset` is
/// an additive trim applied after scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub max_throttle: f64,
    pub max_brake: f64,
    pub max_clutch: f64,
    pub max_steering: f64,
    pub steering_offset: f64,
}

impl ThrottleConfig {
    /// Extract a full configuration from a decoded control-panel `config`
    /// message.  Keys other than the five limits are ignored.
    ///
    /// # Errors
    ///
    /// Same contract as [`DriverInput::from_value`].
    pub fn from_value(value: &Value) -> Result<Self, VowError> {
        const MESSAGE: &str = "throttle_config";
        Ok(Self {
            max_throttle: require_f64(value, MESSAGE, "max_throttle")?,
            max_brake: require_f64(value, MESSAGE, "max_brake")?,
            max_clutch: require_f64(value, MESSAGE, "max_clutch")?,
            max_steering: require_f64(value, MESSAGE, "max_steering")?,
            steering_offset: require_f64(value, MESSAGE, "steering_offset")?,
        })
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_throttle: 15.0,
            max_brake: 50.0,
            max_clutch: 50.0,
            max_steering: 100.0,
            steering_offset: 0.0,
        }
    }
}

/// Scaled values handed to the output encoder for one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleOutput {
    pub throttle: f64,
    pub brake: f64,
    pub steering: f64,
}

/// One line of head-tracker telemetry.
///
/// Only `angleYaw` is interpreted; every other sensor field is kept verbatim
/// in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationReading {
    /// Yaw in degrees, nominally `[0, 360)`.
    #[serde(rename = "angleYaw")]
    pub angle_yaw: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Global error type spanning device failures, malformed messages and
/// transport problems.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum VowError {
    #[error("Device unavailable: {device}: {details}")]
    DeviceUnavailable { device: String, details: String },

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Missing field `{field}` in {message} message")]
    MissingField { message: String, field: String },

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("No orientation reading received yet")]
    NoReading,

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("All subscriptions are closed")]
    BusClosed,

    #[error("Config Error: {0}")]
    Config(String),
}

fn require_f64(value: &Value, message: &str, field: &str) -> Result<f64, VowError> {
    let raw = value.get(field).ok_or_else(|| VowError::MissingField {
        message: message.to_string(),
        field: field.to_string(),
    })?;
    raw.as_f64()
        .ok_or_else(|| VowError::Decode(format!("{message}.{field} is not a number: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn driver_input_from_complete_message() {
        let value = json!({"throttle": 50, "brake": 0.0, "clutch": 1.5, "steering": -20});
        let input = DriverInput::from_value(&value).unwrap();
        assert_eq!(
            input,
            DriverInput {
                throttle: 50.0,
                brake: 0.0,
                clutch: 1.5,
                steering: -20.0,
            }
        );
    }

    #[test]
    fn driver_input_missing_clutch_is_missing_field() {
        let value = json!({"throttle": 50, "brake": 0, "steering": 0});
        match DriverInput::from_value(&value) {
            Err(VowError::MissingField { message, field }) => {
                assert_eq!(message, "driver_input");
                assert_eq!(field, "clutch");
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_field_is_decode_error() {
        let value = json!({"throttle": "fast", "brake": 0, "clutch": 0, "steering": 0});
        assert!(matches!(
            DriverInput::from_value(&value),
            Err(VowError::Decode(_))
        ));
    }

    #[test]
    fn non_object_message_reports_first_missing_field() {
        let value = json!([1, 2, 3]);
        assert!(matches!(
            ThrottleConfig::from_value(&value),
            Err(VowError::MissingField { field, .. }) if field == "max_throttle"
        ));
    }

    #[test]
    fn throttle_config_ignores_unrelated_keys() {
        let value = json!({
            "max_throttle": 20,
            "max_brake": 40,
            "max_clutch": 30,
            "max_steering": 90,
            "steering_offset": -2.5,
            "head_tracking_status": true
        });
        let config = ThrottleConfig::from_value(&value).unwrap();
        assert!((config.max_throttle - 20.0).abs() < 1e-9);
        assert!((config.steering_offset + 2.5).abs() < 1e-9);
    }

    #[test]
    fn orientation_reading_keeps_opaque_fields() {
        let reading: OrientationReading =
            serde_json::from_str(r#"{"angleYaw": 271.5, "anglePitch": 3.0, "status": "ok"}"#)
                .unwrap();
        assert!((reading.angle_yaw - 271.5).abs() < 1e-9);
        assert_eq!(reading.extra.get("status"), Some(&json!("ok")));
        assert_eq!(reading.extra.len(), 2);
    }

    #[test]
    fn vow_error_display() {
        let err = VowError::MissingField {
            message: "driver_input".to_string(),
            field: "brake".to_string(),
        };
        assert!(err.to_string().contains("`brake`"));

        let err2 = VowError::DeviceUnavailable {
            device: "pikoder".to_string(),
            details: "no such file".to_string(),
        };
        assert!(err2.to_string().contains("pikoder"));
    }
}
