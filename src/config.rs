use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::AnalyzerSettings;
use crate::ingest::SensorConfig;
use crate::scan::{scan_interval, ScanSettings, MAX_SCAN_INTERVAL};
use crate::transport::MqttSettings;
use crate::viz::VizSettings;

const DEFAULT_SHELF_ID: &str = "shelf_A1";
const DEFAULT_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_SENSOR_URL: &str = "stub://shelf_cam";
const DEFAULT_SENSOR_WIDTH: u32 = 640;
const DEFAULT_SENSOR_HEIGHT: u32 = 480;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_SWEEP_SECS: u64 = 30;
const DEFAULT_MAX_POINTS: usize = 10_000;
const DEFAULT_DB_PATH: &str = "shelf_scans.db";
const DEFAULT_MQTT_BROKER: &str = "mqtts://localhost:8883";
const DEFAULT_MQTT_TOPIC: &str = "shelf/scan";
const DEFAULT_MQTT_CLIENT_ID: &str = "shelfd";
const DEFAULT_OVERLAY_PATH: &str = "shelf_overlay.png";
const DEFAULT_OVERLAY_MAX_WIDTH: u32 = 1280;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Deserialize, Default)]
struct ShelfdConfigFile {
    shelf_id: Option<String>,
    interval_secs: Option<f64>,
    sensor: Option<SensorConfigFile>,
    model: Option<ModelConfigFile>,
    cache: Option<CacheConfigFile>,
    storage: Option<StorageConfigFile>,
    mqtt: Option<MqttConfigFile>,
    visualization: Option<VisualizationConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    warmup_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<ModelBackendKind>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CacheConfigFile {
    ttl_secs: Option<u64>,
    sweep_secs: Option<u64>,
    max_points: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    enabled: Option<bool>,
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    enabled: Option<bool>,
    broker_addr: Option<String>,
    username: Option<String>,
    password: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    ca_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct VisualizationConfigFile {
    enabled: Option<bool>,
    output_path: Option<PathBuf>,
    max_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

/// Which scene model the processors use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackendKind {
    #[default]
    Stub,
    Http,
}

impl FromStr for ModelBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "http" => Ok(Self::Http),
            other => Err(anyhow!(
                "unknown model backend '{}': expected 'stub' or 'http'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: ModelBackendKind,
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub enabled: bool,
    pub db_path: String,
}

#[derive(Debug, Clone)]
pub struct MqttSinkSettings {
    pub enabled: bool,
    pub publisher: MqttSettings,
}

#[derive(Debug, Clone)]
pub struct VisualizationSettings {
    pub enabled: bool,
    pub output_path: PathBuf,
    pub max_width: u32,
}

#[derive(Debug, Clone)]
pub struct ShelfdConfig {
    pub shelf_id: String,
    pub interval_secs: f64,
    pub sensor: SensorConfig,
    pub model: ModelSettings,
    pub cache: AnalyzerSettings,
    pub storage: StorageSettings,
    pub mqtt: MqttSinkSettings,
    pub visualization: VisualizationSettings,
    pub api_addr: String,
}

impl Default for ShelfdConfig {
    fn default() -> Self {
        Self::from_file(ShelfdConfigFile::default())
    }
}

impl ShelfdConfig {
    /// Defaults, then the file named by `SHELF_CONFIG`, then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SHELF_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ShelfdConfigFile) -> Self {
        let sensor_file = file.sensor.unwrap_or_default();
        let model_file = file.model.unwrap_or_default();
        let cache_file = file.cache.unwrap_or_default();
        let storage_file = file.storage.unwrap_or_default();
        let mqtt_file = file.mqtt.unwrap_or_default();
        let viz_file = file.visualization.unwrap_or_default();

        Self {
            shelf_id: file
                .shelf_id
                .unwrap_or_else(|| DEFAULT_SHELF_ID.to_string()),
            interval_secs: file.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
            sensor: SensorConfig {
                url: sensor_file
                    .url
                    .unwrap_or_else(|| DEFAULT_SENSOR_URL.to_string()),
                width: sensor_file.width.unwrap_or(DEFAULT_SENSOR_WIDTH),
                height: sensor_file.height.unwrap_or(DEFAULT_SENSOR_HEIGHT),
                warmup: Duration::from_millis(sensor_file.warmup_ms.unwrap_or(0)),
            },
            model: ModelSettings {
                backend: model_file.backend.unwrap_or_default(),
                endpoint: model_file.endpoint,
                timeout: Duration::from_secs(
                    model_file.timeout_secs.unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS),
                ),
            },
            cache: AnalyzerSettings {
                ttl: Duration::from_secs(cache_file.ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
                sweep_interval: Duration::from_secs(
                    cache_file.sweep_secs.unwrap_or(DEFAULT_SWEEP_SECS),
                ),
                max_points: cache_file.max_points.unwrap_or(DEFAULT_MAX_POINTS),
            },
            storage: StorageSettings {
                enabled: storage_file.enabled.unwrap_or(true),
                db_path: storage_file
                    .db_path
                    .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            },
            mqtt: MqttSinkSettings {
                enabled: mqtt_file.enabled.unwrap_or(false),
                publisher: MqttSettings {
                    broker_addr: mqtt_file
                        .broker_addr
                        .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
                    username: mqtt_file.username,
                    password: mqtt_file.password,
                    topic: mqtt_file
                        .topic
                        .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                    client_id: mqtt_file
                        .client_id
                        .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                    ca_path: mqtt_file.ca_path,
                    client_cert_path: mqtt_file.client_cert_path,
                    client_key_path: mqtt_file.client_key_path,
                    ..MqttSettings::default()
                },
            },
            visualization: VisualizationSettings {
                enabled: viz_file.enabled.unwrap_or(true),
                output_path: viz_file
                    .output_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OVERLAY_PATH)),
                max_width: viz_file.max_width.unwrap_or(DEFAULT_OVERLAY_MAX_WIDTH),
            },
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(shelf_id) = env_nonempty("SHELF_ID") {
            self.shelf_id = shelf_id;
        }
        if let Some(interval) = env_nonempty("SHELF_INTERVAL_SECS") {
            self.interval_secs = interval
                .parse()
                .map_err(|_| anyhow!("SHELF_INTERVAL_SECS must be a number of seconds"))?;
        }
        if let Some(url) = env_nonempty("SHELF_SENSOR_URL") {
            self.sensor.url = url;
        }
        if let Some(path) = env_nonempty("SHELF_DB_PATH") {
            self.storage.db_path = path;
        }
        if let Some(addr) = env_nonempty("SHELF_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(ttl) = env_nonempty("SHELF_CACHE_TTL_SECS") {
            let seconds: u64 = ttl.parse().map_err(|_| {
                anyhow!("SHELF_CACHE_TTL_SECS must be an integer number of seconds")
            })?;
            self.cache.ttl = Duration::from_secs(seconds);
        }
        if let Some(broker) = env_nonempty("MQTT_BROKER_URL") {
            self.mqtt.publisher.broker_addr = broker;
        }
        if let Some(user) = env_nonempty("MQTT_USERNAME") {
            self.mqtt.publisher.username = Some(user);
        }
        if let Some(password) = env_nonempty("MQTT_PASSWORD") {
            self.mqtt.publisher.password = Some(password);
        }
        if let Some(topic) = env_nonempty("MQTT_TOPIC") {
            self.mqtt.publisher.topic = topic;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.shelf_id = self.shelf_id.trim().to_string();
        if self.shelf_id.is_empty() {
            return Err(anyhow!("shelf_id must not be empty"));
        }
        if scan_interval(self.interval_secs).is_none() {
            return Err(anyhow!(
                "interval_secs must be greater than zero and at most {}",
                MAX_SCAN_INTERVAL.as_secs()
            ));
        }
        if self.cache.ttl.is_zero() {
            return Err(anyhow!("cache ttl must be greater than zero"));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(anyhow!("cache sweep interval must be greater than zero"));
        }
        if self.cache.max_points == 0 {
            return Err(anyhow!("cache max_points must be greater than zero"));
        }
        if self.sensor.width == 0 || self.sensor.height == 0 {
            return Err(anyhow!("sensor width and height must be non-zero"));
        }
        if self.model.backend == ModelBackendKind::Http && self.model.endpoint.is_none() {
            return Err(anyhow!("model backend 'http' requires model.endpoint"));
        }
        if self.mqtt.publisher.topic.trim().is_empty() {
            return Err(anyhow!("mqtt topic must not be empty"));
        }
        Ok(())
    }

    /// Validated scan interval; the default when `interval_secs` was changed
    /// to something out of range after loading.
    pub fn interval(&self) -> Duration {
        scan_interval(self.interval_secs)
            .or_else(|| scan_interval(DEFAULT_INTERVAL_SECS))
            .unwrap_or(MAX_SCAN_INTERVAL)
    }

    /// Processor settings for this configuration at the given interval.
    pub fn scan_settings(&self, interval: Duration) -> ScanSettings {
        ScanSettings {
            interval,
            analyzer: self.cache,
            visualization: VizSettings {
                max_width: self.visualization.max_width,
                ..VizSettings::default()
            },
            capture: crate::ingest::CaptureSettings {
                warmup: self.sensor.warmup,
                ..crate::ingest::CaptureSettings::default()
            },
            ..ScanSettings::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<ShelfdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
