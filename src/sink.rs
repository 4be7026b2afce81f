//! Event bus / CSV sink (spec.md §2 C7, §4.5, §6 "Filesystem").
//!
//! Every trigger edge is mirrored to two places: an append-only local CSV
//! file and an MQTT topic. Both are "non-blocking-preferred" per spec.md
//! §4.5: the CSV write is a short, uncontended file append under a mutex;
//! the MQTT publish is spawned onto the shared tokio runtime so a slow or
//! disconnected broker never stalls the unit thread that detected the edge
//! (which may be the audio capture analysis thread, subject to spec.md §5's
//! "must not block" constraint).

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use log::warn;
use rumqttc::{AsyncClient, MqttOptions, QoS};

use crate::error::SupervisorError;
use crate::model::TriggerEvent;

pub struct EventSink {
    csv: Mutex<csv::Writer<std::fs::File>>,
    mqtt: AsyncClient,
    rt: tokio::runtime::Handle,
    topic_prefix: String,
}

impl EventSink {
    /// Opens (creating parent directories as needed) the append-only CSV
    /// file at `csv_path` and connects an MQTT client used only for
    /// publishing trigger events (spec.md §6: `<host>/batrack/<unit>/<value>`).
    pub fn new(
        csv_path: &Path,
        host: &str,
        mqtt_host: &str,
        mqtt_port: u16,
        mqtt_keepalive: u16,
        rt: tokio::runtime::Handle,
    ) -> Result<Self, SupervisorError> {
        if let Some(parent) = csv_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SupervisorError::SinkUnavailable {
                reason: format!("creating data directory '{}': {}", parent.display(), e),
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(csv_path)
            .map_err(|e| SupervisorError::SinkUnavailable {
                reason: format!("opening csv file '{}': {}", csv_path.display(), e),
            })?;
        let csv = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        let mut opts = MqttOptions::new(format!("{}-batrack", host), mqtt_host, mqtt_port);
        opts.set_keep_alive(Duration::from_secs(mqtt_keepalive.max(1) as u64));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        rt.spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        warn!("event sink mqtt connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(EventSink {
            csv: Mutex::new(csv),
            mqtt: client,
            rt,
            topic_prefix: format!("{}/batrack", host),
        })
    }

    /// Appends `event` to the CSV sink and publishes it to MQTT
    /// (spec.md §3 `TriggerEvent`, §6).
    pub fn publish(&self, event: &TriggerEvent) {
        let payload_json = serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string());

        {
            let mut writer = self.csv.lock().unwrap_or_else(|e| e.into_inner());
            let result = writer
                .write_record([
                    event.wall_time.to_rfc3339(),
                    event.source_unit.clone(),
                    event.value.to_string(),
                    payload_json.clone(),
                ])
                .and_then(|_| writer.flush().map_err(csv::Error::from));
            if let Err(e) = result {
                warn!("csv sink write failed: {}", e);
            }
        }

        let topic = format!("{}/{}/{}", self.topic_prefix, event.source_unit, event.value);
        let client = self.mqtt.clone();
        self.rt.spawn(async move {
            if let Err(e) = client.publish(topic.clone(), QoS::AtMostOnce, false, payload_json).await {
                warn!("mqtt publish to '{}' failed: {}", topic, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload;
    use chrono::Local;
    use tempfile::tempdir;

    /// Exercises only the CSV half: constructing an `EventSink` with a real
    /// broker isn't available in unit tests, so this drives the CSV writer
    /// directly the way `publish` does, over a real file.
    #[test]
    fn csv_row_contains_wall_time_unit_value_and_json_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let file = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        let event = TriggerEvent {
            wall_time: Local::now(),
            source_unit: "AudioAnalysisUnit".to_string(),
            value: true,
            payload: payload! { "pings" => 1i64 },
        };
        let payload_json = serde_json::to_string(&event.payload).unwrap();
        writer
            .write_record([
                event.wall_time.to_rfc3339(),
                event.source_unit.clone(),
                event.value.to_string(),
                payload_json,
            ])
            .unwrap();
        writer.flush().unwrap();
        drop(writer);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("AudioAnalysisUnit"));
        assert!(contents.contains("true"));
        assert!(contents.contains("\"pings\":1"));
    }
}
