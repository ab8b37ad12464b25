//! Driver input scaling.

use vow_types::{DriverInput, ThrottleConfig, VehicleOutput};

/// Scale `input` by the limits in `config`.
///
/// Clutch stands in for brake whenever it is pressed further than the brake
/// pedal; the two are never summed.
pub fn compute_output(input: &DriverInput, config: &ThrottleConfig) -> VehicleOutput {
    let throttle = input.throttle * (config.max_throttle / 100.0);
    let brake = if input.clutch > input.brake {
        input.clutch * (config.max_clutch / 100.0)
    } else {
        input.brake * (config.max_brake / 100.0)
    };
    let steering = input.steering * (config.max_steering / 100.0) + config.steering_offset;
    VehicleOutput {
        throttle,
        brake,
        steering,
    }
}
