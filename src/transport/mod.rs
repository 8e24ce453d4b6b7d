//! Report publishing to an MQTT broker.

mod mqtt;
mod tls;

pub use mqtt::{MqttPublisher, MqttSettings};
pub use tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};
