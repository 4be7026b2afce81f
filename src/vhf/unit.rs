//! The VHF analysis unit (spec.md §4.3): subscribes to
//! `+/radiotracking/matched/cbor`, feeds each matched signal through
//! [`super::bins::VhfEngine`], and self-releases its trigger via
//! `untrigger_ts` even if the message stream stalls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

use crate::config::VhfUnitConfig;
use crate::error::{SupervisorError, VhfError};
use crate::model::StatusMap;
use crate::payload;
use crate::unit::{AnalysisUnit, TriggerCallback, UnitCore};

use super::bins::VhfEngine;

fn now_epoch_s() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// State shared between [`VhfUnit`] and its background tokio task. Kept
/// `Arc`-wrapped and free of any borrow of `VhfUnit` itself, since
/// `AnalysisUnit::start(&self)` cannot hand the spawned `'static` task a
/// reference to `self`.
struct VhfShared {
    core: UnitCore,
    engine: Mutex<VhfEngine>,
    untrigger_at: Mutex<f64>,
}

pub struct VhfUnit {
    shared: Arc<VhfShared>,
    host: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_keepalive: u16,
    untrigger_duration_s: f64,
    rt: tokio::runtime::Handle,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl VhfUnit {
    pub fn new(
        cfg: &VhfUnitConfig,
        host: String,
        use_trigger: bool,
        mqtt_host: String,
        mqtt_port: u16,
        mqtt_keepalive: u16,
        rt: tokio::runtime::Handle,
        trigger_callback: TriggerCallback,
    ) -> Self {
        let engine = VhfEngine::new(
            &cfg.sig_freqs_mhz,
            cfg.freq_bw_hz as f64,
            cfg.sig_threshold_dbw,
            cfg.freq_active_window_s,
            cfg.freq_active_var,
            cfg.freq_active_count,
        );
        VhfUnit {
            shared: Arc::new(VhfShared {
                core: UnitCore::new("VHFAnalysisUnit", use_trigger, trigger_callback),
                engine: Mutex::new(engine),
                untrigger_at: Mutex::new(now_epoch_s()),
            }),
            host,
            mqtt_host,
            mqtt_port,
            mqtt_keepalive,
            untrigger_duration_s: cfg.untrigger_duration_s,
            rt,
            task: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    fn handle_publish(shared: &VhfShared, untrigger_duration_s: f64, payload_bytes: &[u8]) {
        let decoded: Result<(f64, f64, f64), _> = ciborium::de::from_reader(payload_bytes);
        let (ts, frequency_hz, avg_power_dbw) = match decoded {
            Ok(v) => v,
            Err(e) => {
                warn!("vhf: {}", VhfError::MalformedSignal { reason: e.to_string() });
                return;
            }
        };

        let accepted = {
            let mut engine = shared.engine.lock().unwrap_or_else(|e| e.into_inner());
            engine.ingest(ts, frequency_hz, avg_power_dbw)
        };

        if let Some(accepted) = accepted {
            let mut untrigger_at = shared.untrigger_at.lock().unwrap_or_else(|e| e.into_inner());
            *untrigger_at = now_epoch_s() + untrigger_duration_s;
            drop(untrigger_at);

            shared.core.set_trigger(
                true,
                payload! {
                    "frequency_hz" => accepted.frequency_hz,
                    "power_dbw" => accepted.power_dbw,
                    "count" => accepted.count,
                },
            );
        }
    }

    async fn run_loop(
        shared: Arc<VhfShared>,
        host: String,
        mqtt_host: String,
        mqtt_port: u16,
        mqtt_keepalive: u16,
        untrigger_duration_s: f64,
    ) {
        let mut opts = MqttOptions::new(format!("{}-batrack-vhf", host), mqtt_host.clone(), mqtt_port);
        opts.set_keep_alive(Duration::from_secs(mqtt_keepalive.max(1) as u64));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        const TOPIC: &str = "+/radiotracking/matched/cbor";
        if let Err(e) = client.subscribe(TOPIC, QoS::AtMostOnce).await {
            warn!("vhf mqtt subscribe to '{}' failed: {}", TOPIC, e);
        } else {
            info!("vhf subscribed to {}", TOPIC);
        }

        shared.core.set_alive(true);
        let mut untrigger_tick = tokio::time::interval(Duration::from_millis(200));

        while shared.core.running() {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            Self::handle_publish(&shared, untrigger_duration_s, &publish.payload);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(
                                "vhf: {}",
                                VhfError::BrokerConnectFailed {
                                    host: mqtt_host.clone(),
                                    port: mqtt_port,
                                    reason: e.to_string(),
                                }
                            );
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = untrigger_tick.tick() => {
                    let untrigger_at = *shared.untrigger_at.lock().unwrap_or_else(|e| e.into_inner());
                    if untrigger_at < now_epoch_s() && shared.core.trigger() {
                        shared.core.set_trigger(false, Default::default());
                    }
                }
            }
        }

        shared.core.set_alive(false);
        let _ = client.disconnect().await;
    }
}

impl AnalysisUnit for VhfUnit {
    fn name(&self) -> &'static str {
        self.shared.core.name()
    }

    fn use_trigger(&self) -> bool {
        self.shared.core.use_trigger()
    }

    fn start(&self) -> Result<(), SupervisorError> {
        self.shared.core.set_running(true);
        let shared = Arc::clone(&self.shared);
        let host = self.host.clone();
        let mqtt_host = self.mqtt_host.clone();
        let mqtt_port = self.mqtt_port;
        let mqtt_keepalive = self.mqtt_keepalive;
        let untrigger_duration_s = self.untrigger_duration_s;

        let handle = self.rt.spawn(Self::run_loop(
            shared,
            host,
            mqtt_host,
            mqtt_port,
            mqtt_keepalive,
            untrigger_duration_s,
        ));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        self.stop_recording();
        self.stopping.store(true, Ordering::SeqCst);
        self.shared.core.set_running(false);
        // The event loop's `poll()` can block well past the 200ms untrigger
        // tick if the broker is unreachable; abort rather than wait for a
        // cooperative exit that may never come within a bounded shutdown.
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.shared.core.set_alive(false);
    }

    fn start_recording(&self) {
        // The radiotracking service records continuously (spec.md §4.3).
    }

    fn stop_recording(&self) {
        // The radiotracking service records continuously (spec.md §4.3).
    }

    fn trigger(&self) -> bool {
        self.shared.core.trigger()
    }

    fn recording(&self) -> bool {
        self.shared.core.recording()
    }

    fn is_alive(&self) -> bool {
        self.shared.core.is_alive()
    }

    fn get_status(&self) -> StatusMap {
        self.shared.core.status()
    }
}
