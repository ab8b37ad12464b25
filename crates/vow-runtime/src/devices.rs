//! Serial device acquisition and the head-tracker monitor.
//!
//! Opening a device yields either a working driver or a typed
//! [`VowError`]; the caller decides whether a missing device is fatal or
//! just disables that capability for the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use vow_hal::{OutputEncoder, PikoderEncoder, SerialLink, SerialPortLink};
use vow_perception::HeadTracker;
use vow_types::VowError;

/// Default interval between head-tracker polls.
pub const HEAD_TRACKER_POLL_PERIOD: Duration = Duration::from_millis(10);

/// Open the Pikoder PPM encoder on `path`.
///
/// # Errors
///
/// Returns [`VowError::DeviceUnavailable`] if the port cannot be opened.
pub fn acquire_encoder(path: &str) -> Result<Box<dyn OutputEncoder>, VowError> {
    let encoder = PikoderEncoder::open(path)?;
    info!(device = path, "ppm encoder attached");
    Ok(Box::new(encoder))
}

/// Open the head tracker on `path`.
///
/// # Errors
///
/// Returns [`VowError::DeviceUnavailable`] if the port cannot be opened.
pub fn acquire_head_tracker(path: &str) -> Result<HeadTracker<SerialPortLink>, VowError> {
    let tracker = HeadTracker::open(path)?;
    info!(device = path, "head tracker attached");
    Ok(tracker)
}

// ─────────────────────────────────────────────────────────────────────────────
// Head-tracker monitor
// ─────────────────────────────────────────────────────────────────────────────

/// Polls a [`HeadTracker`] on a dedicated thread and logs the neutralized yaw.
///
/// Serial reads block, so the monitor stays off the async runtime.  The
/// thread stops when the monitor is stopped or dropped, or when the link
/// fails.
pub struct HeadTrackerMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HeadTrackerMonitor {
    /// Start polling `tracker` every `period`.
    ///
    /// # Errors
    ///
    /// Returns [`VowError::HardwareFault`] if the thread cannot be spawned.
    pub fn spawn<L>(tracker: HeadTracker<L>, period: Duration) -> Result<Self, VowError>
    where
        L: SerialLink + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("head-tracker".to_string())
            .spawn(move || monitor_loop(tracker, period, &flag))
            .map_err(|e| VowError::HardwareFault {
                component: "head-tracker".to_string(),
                details: format!("cannot spawn monitor thread: {e}"),
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// `false` once the polling thread has exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop polling and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("head tracker monitor thread panicked");
            }
        }
    }
}

impl Drop for HeadTrackerMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn monitor_loop<L: SerialLink>(mut tracker: HeadTracker<L>, period: Duration, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        match tracker.poll() {
            Ok(true) => match tracker.reader_mut().read_neutralized_yaw_angle() {
                Ok(yaw) => debug!(neutralized_yaw = yaw, "head tracker yaw"),
                Err(e) => debug!(error = %e, "no head tracker yaw yet"),
            },
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "head tracker read failed; monitor stopped");
                return;
            }
        }
        std::thread::sleep(period);
    }
}
