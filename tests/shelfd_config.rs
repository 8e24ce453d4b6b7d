use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use shelf_scanner::config::{ModelBackendKind, ShelfdConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SHELF_CONFIG",
        "SHELF_ID",
        "SHELF_INTERVAL_SECS",
        "SHELF_SENSOR_URL",
        "SHELF_DB_PATH",
        "SHELF_API_ADDR",
        "SHELF_CACHE_TTL_SECS",
        "MQTT_BROKER_URL",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
        "MQTT_TOPIC",
    ] {
        std::env::remove_var(key);
    }
}

fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    match ENV_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = lock_env();
    clear_env();

    let cfg = ShelfdConfig::load().expect("load defaults");
    assert_eq!(cfg.shelf_id, "shelf_A1");
    assert_eq!(cfg.interval(), Duration::from_secs(5));
    assert_eq!(cfg.sensor.url, "stub://shelf_cam");
    assert_eq!((cfg.sensor.width, cfg.sensor.height), (640, 480));
    assert_eq!(cfg.model.backend, ModelBackendKind::Stub);
    assert_eq!(cfg.cache.ttl, Duration::from_secs(60));
    assert_eq!(cfg.cache.sweep_interval, Duration::from_secs(30));
    assert_eq!(cfg.cache.max_points, 10_000);
    assert!(cfg.storage.enabled);
    assert_eq!(cfg.storage.db_path, "shelf_scans.db");
    assert!(!cfg.mqtt.enabled);
    assert_eq!(cfg.mqtt.publisher.broker_addr, "mqtts://localhost:8883");
    assert_eq!(cfg.mqtt.publisher.topic, "shelf/scan");
    assert!(cfg.visualization.enabled);
    assert_eq!(cfg.api_addr, "127.0.0.1:8000");
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = lock_env();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "shelf_id": "cold_room_3",
        "interval_secs": 2.5,
        "sensor": { "url": "stub://bay", "width": 320, "height": 240, "warmup_ms": 150 },
        "cache": { "ttl_secs": 120, "sweep_secs": 10, "max_points": 5000 },
        "storage": { "enabled": false, "db_path": "cold.db" },
        "mqtt": { "enabled": true, "broker_addr": "mqtt://broker:1883", "topic": "cold/scan" },
        "visualization": { "enabled": false, "max_width": 800 },
        "api": { "addr": "0.0.0.0:9000" }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SHELF_CONFIG", file.path());
    std::env::set_var("SHELF_ID", "cold_room_4");
    std::env::set_var("SHELF_CACHE_TTL_SECS", "90");
    std::env::set_var("MQTT_TOPIC", "override/topic");
    std::env::set_var("MQTT_USERNAME", "scanner");

    let cfg = ShelfdConfig::load().expect("load config");
    assert_eq!(cfg.shelf_id, "cold_room_4");
    assert_eq!(cfg.interval(), Duration::from_millis(2500));
    assert_eq!(cfg.sensor.url, "stub://bay");
    assert_eq!(cfg.sensor.warmup, Duration::from_millis(150));
    assert_eq!(cfg.cache.ttl, Duration::from_secs(90));
    assert_eq!(cfg.cache.sweep_interval, Duration::from_secs(10));
    assert_eq!(cfg.cache.max_points, 5000);
    assert!(!cfg.storage.enabled);
    assert_eq!(cfg.storage.db_path, "cold.db");
    assert!(cfg.mqtt.enabled);
    assert_eq!(cfg.mqtt.publisher.broker_addr, "mqtt://broker:1883");
    assert_eq!(cfg.mqtt.publisher.topic, "override/topic");
    assert_eq!(cfg.mqtt.publisher.username.as_deref(), Some("scanner"));
    assert!(!cfg.visualization.enabled);
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");

    let settings = cfg.scan_settings(cfg.interval());
    assert_eq!(settings.analyzer.max_points, 5000);
    assert_eq!(settings.visualization.max_width, 800);
    assert_eq!(settings.capture.warmup, Duration::from_millis(150));

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = lock_env();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        shelf_id = "B7"
        interval_secs = 1.0

        [model]
        backend = "http"
        endpoint = "http://127.0.0.1:9100/describe"

        [storage]
        db_path = "b7.db"
    "#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("SHELF_CONFIG", file.path());

    let cfg = ShelfdConfig::load().expect("load toml config");
    assert_eq!(cfg.shelf_id, "B7");
    assert_eq!(cfg.model.backend, ModelBackendKind::Http);
    assert_eq!(
        cfg.model.endpoint.as_deref(),
        Some("http://127.0.0.1:9100/describe")
    );
    assert_eq!(cfg.storage.db_path, "b7.db");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = lock_env();
    clear_env();

    std::env::set_var("SHELF_INTERVAL_SECS", "0");
    assert!(ShelfdConfig::load().is_err());
    std::env::set_var("SHELF_INTERVAL_SECS", "fast");
    assert!(ShelfdConfig::load().is_err());
    std::env::set_var("SHELF_INTERVAL_SECS", "1e20");
    assert!(ShelfdConfig::load().is_err());
    clear_env();

    std::env::set_var("SHELF_CACHE_TTL_SECS", "0");
    assert!(ShelfdConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "model": { "backend": "http" } }"#)
        .expect("write config");
    std::env::set_var("SHELF_CONFIG", file.path());
    let err = ShelfdConfig::load().unwrap_err();
    assert!(err.to_string().contains("model.endpoint"));
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "shelf_id": "   " }"#).expect("write config");
    std::env::set_var("SHELF_CONFIG", file.path());
    assert!(ShelfdConfig::load().is_err());

    clear_env();
}
