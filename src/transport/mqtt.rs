//! Scan report publishing over MQTT.
//!
//! Each delivery opens its own connection, publishes at QoS 1, waits for the
//! broker's PUBACK and disconnects. No session is kept between scans.

use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Event, Incoming, MqttOptions};
use rumqttc::Outgoing;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};
use crate::error::SinkError;
use crate::scan::ScanReport;
use crate::sink::ReportSink;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    /// `mqtts://host:port`, `mqtt://host:port` or `host:port`.
    pub broker_addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub client_id: String,
    pub ca_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Upper bound on connect + publish + PUBACK.
    pub ack_timeout: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker_addr: "mqtts://localhost:8883".to_string(),
            username: None,
            password: None,
            topic: "shelf/scan".to_string(),
            client_id: "shelfd".to_string(),
            ca_path: None,
            client_cert_path: None,
            client_key_path: None,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

pub struct MqttPublisher {
    endpoint: MqttEndpoint,
    tls: TlsMaterials,
    settings: MqttSettings,
    published: u64,
}

impl MqttPublisher {
    /// Validate the broker address and load TLS material. Does not connect.
    pub fn new(settings: MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker_addr, false)
            .with_context(|| format!("invalid MQTT broker address '{}'", settings.broker_addr))?;
        let tls = TlsMaterials::load(
            settings.ca_path.as_deref(),
            settings.client_cert_path.as_deref(),
            settings.client_key_path.as_deref(),
        )?;
        // Surface a plain-endpoint/materials mismatch now, not on first scan.
        tls.build_transport(&endpoint)?;
        Ok(Self {
            endpoint,
            tls,
            settings,
            published: 0,
        })
    }

    pub fn endpoint(&self) -> &MqttEndpoint {
        &self.endpoint
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Publish `payload` at QoS 1 and block until acknowledged.
    pub fn publish(&mut self, payload: &[u8]) -> Result<(), SinkError> {
        let transport = self
            .tls
            .build_transport(&self.endpoint)
            .map_err(|e| SinkError::Config(format!("{:#}", e)))?;

        let mut options = MqttOptions::new(
            &self.settings.client_id,
            &self.endpoint.host,
            self.endpoint.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        if let Some(user) = &self.settings.username {
            options.set_credentials(user, self.settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(transport);

        let (client, mut connection) = Client::new(options, 10);
        client
            .publish(
                self.settings.topic.as_str(),
                QoS::AtLeastOnce,
                false,
                payload.to_vec(),
            )
            .map_err(|e| SinkError::Publish(e.to_string()))?;

        let deadline = Instant::now().checked_add(self.settings.ack_timeout);
        let mut acked = false;
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::PubAck(..))) if !acked => {
                    acked = true;
                    client
                        .disconnect()
                        .map_err(|e| SinkError::Publish(e.to_string()))?;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) if acked => {
                    log::debug!("mqtt: connection closed after ack: {}", e);
                    break;
                }
                Err(e) => return Err(SinkError::Publish(e.to_string())),
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
        }

        if !acked {
            return Err(SinkError::Publish(format!(
                "no PUBACK from {}:{} within {:?}",
                self.endpoint.host, self.endpoint.port, self.settings.ack_timeout
            )));
        }
        self.published += 1;
        Ok(())
    }
}

impl ReportSink for MqttPublisher {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn deliver(&mut self, report: &ScanReport) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(&report.to_record())?;
        self.publish(&payload)?;
        log::debug!(
            "mqtt: scan for {} published to {} (TLS: {})",
            report.shelf_id,
            self.settings.topic,
            self.endpoint.use_tls
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::TcpListener;

    #[test]
    fn rejects_bad_broker_address() {
        let settings = MqttSettings {
            broker_addr: "http://broker:80".to_string(),
            ..MqttSettings::default()
        };
        assert!(MqttPublisher::new(settings).is_err());
    }

    #[test]
    fn unreachable_broker_is_a_publish_error() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut publisher = MqttPublisher::new(MqttSettings {
            broker_addr: format!("mqtt://127.0.0.1:{}", port),
            ack_timeout: Duration::from_secs(2),
            ..MqttSettings::default()
        })
        .unwrap();
        assert!(!publisher.endpoint().use_tls);

        let report = ScanReport::build("A1", Utc::now(), 1.0, Vec::new());
        let err = publisher.deliver(&report).unwrap_err();
        assert!(matches!(err, SinkError::Publish(_)));
        assert_eq!(publisher.published(), 0);
    }
}
