//! MQTT feed of parameter patches
//!
//! Connects to a broker and subscribes to a topic. Each message is a JSON
//! object holding a subset of preset fields, e.g. `{"scatter": 3.1}`. Patches
//! are forwarded to the main loop, which merges them into the live preset.

use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TOPIC: &str = "cloudscape/params";

/// Parse a payload into a patch object. Anything but a JSON object is rejected.
pub fn parse_patch(payload: &[u8]) -> Result<serde_json::Value, String> {
    let text = std::str::from_utf8(payload).map_err(|e| format!("payload is not UTF-8: {}", e))?;
    let value: serde_json::Value =
        serde_json::from_str(text.trim()).map_err(|e| format!("payload is not JSON: {}", e))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err("payload must be a JSON object".to_string())
    }
}

/// MQTT client that receives patches in a background thread
pub struct ParameterFeed {
    receiver: Receiver<serde_json::Value>,
    _thread: thread::JoinHandle<()>,
}

impl ParameterFeed {
    /// Connect to the broker and subscribe.
    /// Fails immediately if connection cannot be established.
    pub fn connect(host: &str, topic: &str) -> Result<Self, String> {
        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        let topic = if topic.is_empty() { DEFAULT_TOPIC } else { topic };

        let mut options = MqttOptions::new("cloudscape", host, DEFAULT_PORT);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut connection) = Client::new(options, 10);

        client
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| format!("Failed to subscribe to topic '{}': {}", topic, e))?;

        // Poll once so an unreachable broker fails here, not silently later
        match connection.iter().next() {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(format!(
                    "Failed to connect to MQTT broker at {}:{} - {}",
                    host, DEFAULT_PORT, e
                ));
            }
            None => {
                return Err(format!(
                    "Failed to connect to MQTT broker at {}:{} - connection closed",
                    host, DEFAULT_PORT
                ));
            }
        }

        let (sender, receiver) = mpsc::channel();
        let topic_owned = topic.to_string();

        let handle = thread::spawn(move || {
            Self::message_loop(connection, sender, &topic_owned);
        });

        log::info!("MQTT: connected to {}:{}, subscribed to '{}'", host, DEFAULT_PORT, topic);

        Ok(Self {
            receiver,
            _thread: handle,
        })
    }

    fn message_loop(
        mut connection: rumqttc::Connection,
        sender: Sender<serde_json::Value>,
        topic: &str,
    ) {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == topic => {
                    match parse_patch(&publish.payload) {
                        Ok(patch) => {
                            if sender.send(patch).is_err() {
                                // Main thread gone
                                break;
                            }
                        }
                        Err(e) => log::warn!("MQTT: ignoring message: {}", e),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // The connection retries on the next iteration
                    log::warn!("MQTT error: {}", e);
                    thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }

    /// Drain every patch that arrived since the last call, oldest first
    pub fn poll(&self) -> Vec<serde_json::Value> {
        self.receiver.try_iter().collect()
    }

    pub fn default_topic() -> &'static str {
        DEFAULT_TOPIC
    }
}
