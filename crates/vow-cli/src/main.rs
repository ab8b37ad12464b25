//! `vehicle-output-writer` – turns driver input into PPM actuation.
//!
//! 1. Loads `driver_output_config.json`, writing the default template when it
//!    is absent.
//! 2. Opens the Pikoder encoder and, when head tracking is enabled, the head
//!    tracker.  A missing device disables its capability unless
//!    `strict_devices` is set.
//! 3. Listens for output subscribers, dials the control panel and the
//!    driver-input reader, and runs the dispatch loop until **Ctrl-C**.
//! 4. Sends a neutral command to the encoder before exiting.
//!
//! Exit codes: `0` normal shutdown, `1` configuration or startup failure,
//! `2` encoder unavailable in strict mode.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use config::Config;
use vow_hal::OutputEncoder;
use vow_middleware::{Endpoint, Publisher, dial};
use vow_runtime::devices::HEAD_TRACKER_POLL_PERIOD;
use vow_runtime::{
    HeadTrackerMonitor, VehicleOutputWriter, acquire_encoder, acquire_head_tracker, init_tracing,
};
use vow_types::VowError;

const EXIT_STARTUP_FAILURE: u8 = 1;
const EXIT_DEVICE_UNAVAILABLE: u8 = 2;

fn main() -> ExitCode {
    let _tracing = init_tracing("vehicle-output-writer");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let path = config::config_path();
    let cfg = match config::load_or_create(&path) {
        Ok((cfg, created)) => {
            let note = if created { " (default template written)" } else { "" };
            println!(
                "  Config loaded from {}{}",
                path.display().to_string().bold(),
                note
            );
            cfg
        }
        Err(e) => {
            error!(error = %e, path = %path.display(), "cannot load configuration");
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    // ── Devices ───────────────────────────────────────────────────────────
    let Devices {
        encoder,
        head_monitor,
    } = match acquire_devices(&cfg) {
        Ok(devices) => devices,
        Err(code) => return ExitCode::from(code),
    };

    print_device_summary(&cfg, encoder.is_some(), head_monitor.is_some());

    // ── Dispatch loop ─────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start async runtime");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    let code = runtime.block_on(serve(cfg, encoder));

    if let Some(monitor) = head_monitor {
        monitor.stop();
    }
    code
}

/// Hardware opened at startup. `None` means the capability is disabled.
struct Devices {
    encoder: Option<Box<dyn OutputEncoder>>,
    head_monitor: Option<HeadTrackerMonitor>,
}

/// Open the encoder and, when enabled, the head tracker.
///
/// A missing encoder is fatal only with `strict_devices`, in which case the
/// process exit code is returned. A missing head tracker is never fatal.
fn acquire_devices(cfg: &Config) -> Result<Devices, u8> {
    let encoder = match acquire_encoder(&cfg.pikoder_serial) {
        Ok(encoder) => Some(encoder),
        Err(e) if cfg.strict_devices => {
            error!(error = %e, "ppm encoder required in strict mode");
            println!("{}: {}", "Encoder unavailable".red(), e);
            return Err(EXIT_DEVICE_UNAVAILABLE);
        }
        Err(e) => {
            warn!(error = %e, "ppm encoder unavailable or on wrong port; output disabled");
            None
        }
    };

    let head_monitor = if cfg.head_tracking_status {
        match acquire_head_tracker(&cfg.head_tracker_serial)
            .and_then(|tracker| HeadTrackerMonitor::spawn(tracker, HEAD_TRACKER_POLL_PERIOD))
        {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                warn!(error = %e, "head tracker unavailable or on wrong port; head tracking disabled");
                None
            }
        }
    } else {
        None
    };

    Ok(Devices {
        encoder,
        head_monitor,
    })
}

/// Run the dispatch loop until Ctrl-C, then neutralise the outputs.
async fn serve(cfg: Config, encoder: Option<Box<dyn OutputEncoder>>) -> ExitCode {
    let shutdown = Arc::new(Notify::new());
    let notifier = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        notifier.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let mut writer = match build_writer(&cfg, encoder).await {
        Ok(writer) => writer,
        Err(e) => {
            error!(error = %e, "cannot set up pub/sub endpoints");
            println!("{}: {}", "Startup error".red(), e);
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };
    info!("vehicle output writer running");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("shutdown requested");
                break;
            }
            result = writer.run() => match result {
                Ok(output) => debug!(?output, "cycle dispatched"),
                Err(VowError::BusClosed) => {
                    warn!("all subscriptions closed; stopping");
                    break;
                }
                Err(e) => warn!(error = %e, "cycle skipped"),
            },
        }
    }

    if let Err(e) = writer.neutralize_outputs() {
        error!(error = %e, "failed to neutralise encoder outputs");
    }
    println!("{}", "  ✓ Outputs neutralised. Exiting.".green());
    ExitCode::SUCCESS
}

async fn build_writer(
    cfg: &Config,
    encoder: Option<Box<dyn OutputEncoder>>,
) -> Result<VehicleOutputWriter, VowError> {
    let subscribers = &cfg.pubsub.subscribers;
    let panel_endpoint: Endpoint = subscribers.control_panel_subscriber.address.parse()?;
    let driver_endpoint: Endpoint = subscribers.driver_input_subscriber.address.parse()?;
    let output_endpoint: Endpoint = cfg.pubsub.publishers.output_writer_publisher.address.parse()?;

    let publisher = Publisher::listen(output_endpoint).await?;

    let mut writer = VehicleOutputWriter::new(
        dial(panel_endpoint, cfg.control_panel_topic()),
        dial(driver_endpoint, cfg.driver_input_topic()),
        cfg.throttle_config,
    )
    .with_output_sink(Box::new(publisher), cfg.vehicle_output_topic());
    if let Some(encoder) = encoder {
        writer = writer.with_encoder(encoder);
    }
    Ok(writer)
}

// ─────────────────────────────────────────────────────────────────────────────
// Console output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        Vehicle Output Writer         ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!("  {} {}", "version".dimmed(), env!("CARGO_PKG_VERSION").bold());
    println!();
}

fn print_device_summary(cfg: &Config, encoder_attached: bool, head_tracking: bool) {
    let status = |attached: bool| {
        if attached {
            "attached".green()
        } else {
            "disabled".yellow()
        }
    };
    println!(
        "  PPM encoder   {} {}",
        cfg.pikoder_serial.bold(),
        status(encoder_attached)
    );
    if cfg.head_tracking_status {
        println!(
            "  Head tracker  {} {}",
            cfg.head_tracker_serial.bold(),
            status(head_tracking)
        );
    }
    println!(
        "  Throttle      max {}% / brake {}% / clutch {}% / steering {}% / offset {}",
        cfg.throttle_config.max_throttle,
        cfg.throttle_config.max_brake,
        cfg.throttle_config.max_clutch,
        cfg.throttle_config.max_steering,
        cfg.throttle_config.steering_offset
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_PORT: &str = "/dev/vow-no-such-port";

    fn config_with_missing_devices(strict: bool, head_tracking: bool) -> Config {
        Config {
            pikoder_serial: MISSING_PORT.into(),
            head_tracker_serial: MISSING_PORT.into(),
            head_tracking_status: head_tracking,
            strict_devices: strict,
            ..Config::default()
        }
    }

    #[test]
    fn strict_mode_fails_when_encoder_is_missing() {
        let cfg = config_with_missing_devices(true, false);
        assert!(matches!(
            acquire_devices(&cfg),
            Err(EXIT_DEVICE_UNAVAILABLE)
        ));
    }

    #[test]
    fn lenient_mode_disables_missing_encoder() {
        let cfg = config_with_missing_devices(false, false);
        let devices = acquire_devices(&cfg).unwrap();
        assert!(devices.encoder.is_none());
        assert!(devices.head_monitor.is_none());
    }

    #[test]
    fn missing_head_tracker_is_not_fatal() {
        let cfg = config_with_missing_devices(false, true);
        let devices = acquire_devices(&cfg).unwrap();
        assert!(devices.encoder.is_none());
        assert!(devices.head_monitor.is_none());
    }

    #[test]
    fn strict_mode_still_fails_with_head_tracking_enabled() {
        let cfg = config_with_missing_devices(true, true);
        assert!(matches!(
            acquire_devices(&cfg),
            Err(EXIT_DEVICE_UNAVAILABLE)
        ));
    }
}
