//! shelfd - shelf occupancy scanner daemon
//!
//! `shelfd api` serves the HTTP request surface; processors are created on
//! demand. `shelfd realtime` runs one continuous processor in the
//! foreground. Both stop every processor on Ctrl-C before exiting.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use shelf_scanner::api::{ApiConfig, ApiServer, ProcessorRegistry, ProcessorRequest};
use shelf_scanner::config::{ModelBackendKind, ShelfdConfig};
use shelf_scanner::detect::StubSceneModel;
use shelf_scanner::ingest::open_sensor;
use shelf_scanner::storage::{SqliteReportStore, StoreSink};
use shelf_scanner::transport::MqttPublisher;
use shelf_scanner::viz::FileDisplay;
use shelf_scanner::scan::{scan_interval, MAX_SCAN_INTERVAL};
use shelf_scanner::{ProcessorParts, ScanOrchestrator, SceneModel};

/// Overlays are rewritten at most this often.
const OVERLAY_MIN_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about = "Shelf occupancy scanner")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP request surface.
    Api {
        /// Listen address (overrides config and SHELF_API_ADDR).
        #[arg(long)]
        addr: Option<String>,
    },
    /// Scan one shelf continuously until Ctrl-C.
    Realtime {
        #[arg(long)]
        shelf_id: Option<String>,

        /// Seconds between scan starts.
        #[arg(long)]
        interval: Option<f64>,

        /// Do not persist reports.
        #[arg(long)]
        no_store: bool,

        /// Publish reports over MQTT.
        #[arg(long)]
        mqtt: bool,

        /// Do not render overlays.
        #[arg(long)]
        no_visualization: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut cfg = ShelfdConfig::load()?;

    match args.command {
        Command::Api { addr } => {
            if let Some(addr) = addr {
                cfg.api_addr = addr;
            }
            run_api(cfg)
        }
        Command::Realtime {
            shelf_id,
            interval,
            no_store,
            mqtt,
            no_visualization,
        } => {
            if let Some(shelf_id) = shelf_id {
                cfg.shelf_id = shelf_id;
            }
            if let Some(interval) = interval {
                if scan_interval(interval).is_none() {
                    return Err(anyhow!(
                        "--interval must be greater than zero and at most {} s",
                        MAX_SCAN_INTERVAL.as_secs()
                    ));
                }
                cfg.interval_secs = interval;
            }
            if no_store {
                cfg.storage.enabled = false;
            }
            if mqtt {
                cfg.mqtt.enabled = true;
            }
            if no_visualization {
                cfg.visualization.enabled = false;
            }
            run_realtime(cfg)
        }
    }
}

fn run_api(cfg: ShelfdConfig) -> Result<()> {
    let registry = Arc::new(ProcessorRegistry::new());
    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        default_shelf_id: cfg.shelf_id.clone(),
        scan_settings: cfg.scan_settings(cfg.interval()),
    };
    let factory_cfg = cfg.clone();
    let factory = Arc::new(move |request: &ProcessorRequest| build_parts(&factory_cfg, request));
    let api_handle = ApiServer::new(api_config, registry.clone(), factory).spawn()?;
    log::info!("shelfd api running on {}", api_handle.addr);

    wait_for_shutdown()?;
    log::info!("shutdown signal received, stopping processors...");
    registry.stop_all();
    api_handle.stop()?;
    Ok(())
}

fn run_realtime(cfg: ShelfdConfig) -> Result<()> {
    let request = ProcessorRequest {
        shelf_id: cfg.shelf_id.clone(),
        interval: cfg.interval(),
        save: cfg.storage.enabled,
        publish: cfg.mqtt.enabled,
        visualize: cfg.visualization.enabled,
    };
    let parts = build_parts(&cfg, &request)?;
    let processor = ScanOrchestrator::new(&cfg.shelf_id, parts, cfg.scan_settings(request.interval))?;
    processor.start()?;
    log::info!(
        "shelfd realtime scanning {} every {:.1}s",
        cfg.shelf_id,
        cfg.interval_secs
    );

    wait_for_shutdown()?;
    log::info!("shutdown signal received, stopping {}...", cfg.shelf_id);
    processor.stop();
    Ok(())
}

fn wait_for_shutdown() -> Result<()> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;
    let _ = rx.recv();
    Ok(())
}

fn build_parts(cfg: &ShelfdConfig, request: &ProcessorRequest) -> Result<ProcessorParts> {
    let sensor = open_sensor(&cfg.sensor)
        .with_context(|| format!("cannot open sensor {}", cfg.sensor.url))?;
    let mut parts = ProcessorParts::new(sensor, build_model(cfg)?);

    if request.save {
        if cfg.storage.enabled {
            let store = SqliteReportStore::open(&cfg.storage.db_path)
                .with_context(|| format!("cannot open database {}", cfg.storage.db_path))?;
            parts = parts.with_sink(Box::new(StoreSink::new(store)));
        } else {
            log::warn!("{}: storage requested but disabled in config", request.shelf_id);
        }
    }
    if request.publish {
        if cfg.mqtt.enabled {
            let publisher = MqttPublisher::new(cfg.mqtt.publisher.clone())?;
            parts = parts.with_sink(Box::new(publisher));
        } else {
            log::warn!("{}: MQTT requested but disabled in config", request.shelf_id);
        }
    }
    if request.visualize && cfg.visualization.enabled {
        let path = overlay_path(&cfg.visualization.output_path, &request.shelf_id);
        parts = parts.with_display(Box::new(FileDisplay::new(path, OVERLAY_MIN_INTERVAL)));
    }
    Ok(parts)
}

fn build_model(cfg: &ShelfdConfig) -> Result<Box<dyn SceneModel>> {
    match cfg.model.backend {
        ModelBackendKind::Stub => Ok(Box::new(StubSceneModel::new())),
        #[cfg(feature = "model-http")]
        ModelBackendKind::Http => {
            let endpoint = cfg
                .model
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow!("model backend 'http' requires model.endpoint"))?;
            Ok(Box::new(shelf_scanner::detect::HttpSceneModel::new(
                endpoint,
                cfg.model.timeout,
            )))
        }
        #[cfg(not(feature = "model-http"))]
        ModelBackendKind::Http => Err(anyhow!(
            "model backend 'http' requires the 'model-http' feature"
        )),
    }
}

/// `shelf_overlay.png` + `A1` -> `shelf_overlay_A1.png`.
fn overlay_path(base: &Path, shelf_id: &str) -> PathBuf {
    let safe_id: String = shelf_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "overlay".to_string());
    let ext = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    base.with_file_name(format!("{}_{}.{}", stem, safe_id, ext))
}
