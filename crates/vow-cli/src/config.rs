//! Process configuration – reads/writes `driver_output_config.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use vow_types::{ThrottleConfig, VowError};

/// Config file used when `VOW_CONFIG_PATH` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "driver_output_config.json";

const DEFAULT_PANEL_TOPIC: &str = "config";
const DEFAULT_DRIVER_INPUT_TOPIC: &str = "driver_input";
const DEFAULT_OUTPUT_TOPIC: &str = "vehicle_output";

/// One socket address plus its named topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// `ipc://<path>` or `tcp://<host>:<port>`.
    pub address: String,
    #[serde(default)]
    pub topics: BTreeMap<String, String>,
}

impl EndpointConfig {
    fn new(address: &str, topic_key: &str, topic: &str) -> Self {
        Self {
            address: address.to_string(),
            topics: BTreeMap::from([(topic_key.to_string(), topic.to_string())]),
        }
    }

    fn topic_or(&self, key: &str, default: &str) -> String {
        self.topics
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfigs {
    pub output_writer_publisher: EndpointConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberConfigs {
    pub control_panel_subscriber: EndpointConfig,
    pub driver_input_subscriber: EndpointConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubConfig {
    pub publishers: PublisherConfigs,
    pub subscribers: SubscriberConfigs,
}

/// Everything the writer needs at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub pubsub: PubSubConfig,

    /// Serial device of the Pikoder PPM encoder.
    pub pikoder_serial: String,

    /// Serial device of the head tracker.
    pub head_tracker_serial: String,

    /// Limits used until the control panel sends its own.
    #[serde(default)]
    pub throttle_config: ThrottleConfig,

    /// Poll the head tracker and log its yaw.
    #[serde(default)]
    pub head_tracking_status: bool,

    /// Refuse to start without the encoder.
    #[serde(default)]
    pub strict_devices: bool,
}

impl Config {
    pub fn control_panel_topic(&self) -> String {
        self.pubsub
            .subscribers
            .control_panel_subscriber
            .topic_or("panel_config", DEFAULT_PANEL_TOPIC)
    }

    pub fn driver_input_topic(&self) -> String {
        self.pubsub
            .subscribers
            .driver_input_subscriber
            .topic_or("driver_input", DEFAULT_DRIVER_INPUT_TOPIC)
    }

    pub fn vehicle_output_topic(&self) -> String {
        self.pubsub
            .publishers
            .output_writer_publisher
            .topic_or("vehicle_output", DEFAULT_OUTPUT_TOPIC)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pubsub: PubSubConfig {
                publishers: PublisherConfigs {
                    output_writer_publisher: EndpointConfig::new(
                        "ipc:///tmp/RAAI/vehicle_output_writer.ipc",
                        "vehicle_output",
                        DEFAULT_OUTPUT_TOPIC,
                    ),
                },
                subscribers: SubscriberConfigs {
                    control_panel_subscriber: EndpointConfig::new(
                        "ipc:///tmp/RAAI/control_panel.ipc",
                        "panel_config",
                        DEFAULT_PANEL_TOPIC,
                    ),
                    driver_input_subscriber: EndpointConfig::new(
                        "ipc:///tmp/RAAI/driver_input_reader.ipc",
                        "driver_input",
                        DEFAULT_DRIVER_INPUT_TOPIC,
                    ),
                },
            },
            pikoder_serial: "/dev/ttyUSB0".to_string(),
            head_tracker_serial: "/dev/ttyACM0".to_string(),
            throttle_config: ThrottleConfig::default(),
            head_tracking_status: false,
            strict_devices: false,
        }
    }
}

/// `VOW_CONFIG_PATH`, or [`DEFAULT_CONFIG_PATH`] in the working directory.
pub fn config_path() -> PathBuf {
    std::env::var("VOW_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, VowError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| VowError::Config(format!("cannot read {}: {e}", path.display())))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| VowError::Config(format!("cannot parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Write `cfg` to `path` as pretty JSON, creating parent directories.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), VowError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            VowError::Config(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let raw = serde_json::to_string_pretty(cfg)
        .map_err(|e| VowError::Config(format!("cannot serialise config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| VowError::Config(format!("cannot write {}: {e}", path.display())))
}

/// Load `path`, writing the default template there first if it is missing,
/// then apply environment overrides.
///
/// The flag is `true` when the template had to be created.
pub fn load_or_create(path: &Path) -> Result<(Config, bool), VowError> {
    let (mut cfg, created) = match load_from(path)? {
        Some(cfg) => (cfg, false),
        None => {
            warn!(path = %path.display(), "config file missing; writing default template");
            let cfg = Config::default();
            save_to(&cfg, path)?;
            (cfg, true)
        }
    };
    apply_env_overrides(&mut cfg);
    Ok((cfg, created))
}

/// Apply `VOW_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `VOW_PIKODER_SERIAL` | `pikoder_serial` |
/// | `VOW_HEAD_TRACKER_SERIAL` | `head_tracker_serial` |
/// | `VOW_STRICT_DEVICES` | `strict_devices` (`1`/`true`/`0`/`false`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// Apply overrides using `lookup` in place of the process environment.
fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("VOW_PIKODER_SERIAL") {
        cfg.pikoder_serial = v;
    }
    if let Some(v) = lookup("VOW_HEAD_TRACKER_SERIAL") {
        cfg.head_tracker_serial = v;
    }
    if let Some(strict) = lookup("VOW_STRICT_DEVICES").as_deref().and_then(parse_flag) {
        cfg.strict_devices = strict;
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
