//! src/notify.rs
//!
//! Fire-and-forget delivery of detection events. The tick loop only ever calls
//! [`Dispatcher::dispatch`], which hands the event to a worker thread over a bounded
//! channel and returns immediately. Sinks run on the worker; their failures are logged
//! and dropped.

use crossbeam_channel::{ bounded, Sender, TrySendError };
use serde::Serialize;
use std::{
    fs::OpenOptions,
    io::Write,
    path::{ Path, PathBuf },
    sync::Arc,
    thread::{ self, JoinHandle },
    time::Duration,
};

use crate::detector::DetectionEvent;
use crate::error::{ Error, Result };
use crate::logger::Logger;

pub const EVENT_NAME: &str = "sound_detected";
const QUEUE_DEPTH: usize = 32;

/// Wire shape of one event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventPayload {
    pub event: String,
    pub distance_or_confidence: f32,
    pub timestamp: String,
}

impl From<&DetectionEvent> for EventPayload {
    fn from(e: &DetectionEvent) -> Self {
        Self {
            event: EVENT_NAME.to_string(),
            distance_or_confidence: e.distance,
            timestamp: e.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

pub trait EventSink: Send {
    fn name(&self) -> &str;
    fn deliver(&mut self, payload: &EventPayload) -> Result<()>;
}

/// Appends `timestamp,event,distance` rows, writing the header into an empty file.
pub struct CsvHistory {
    path: PathBuf,
}

impl CsvHistory {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }
}

impl EventSink for CsvHistory {
    fn name(&self) -> &str {
        "history"
    }

    fn deliver(&mut self, payload: &EventPayload) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "timestamp,event,distance")?;
        }
        writeln!(
            file,
            "{},{},{:.4}",
            payload.timestamp,
            payload.event,
            payload.distance_or_confidence
        )?;
        file.flush()?;
        Ok(())
    }
}

/// POSTs the payload as JSON.
pub struct Webhook {
    url: String,
    client: reqwest::blocking::Client,
}

impl Webhook {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::DeliveryFailure(e.to_string()))?;
        Ok(Self { url: url.to_string(), client })
    }
}

impl EventSink for Webhook {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&mut self, payload: &EventPayload) -> Result<()> {
        let resp = self.client
            .post(&self.url)
            .json(payload)
            .send()
            .map_err(|e| Error::DeliveryFailure(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::DeliveryFailure(format!("{} answered {}", self.url, resp.status())));
        }
        Ok(())
    }
}

pub struct Dispatcher {
    tx: Option<Sender<EventPayload>>,
    worker: Option<JoinHandle<()>>,
    logger: Arc<Logger>,
}

impl Dispatcher {
    pub fn start(mut sinks: Vec<Box<dyn EventSink>>, logger: Arc<Logger>) -> Self {
        let (tx, rx) = bounded::<EventPayload>(QUEUE_DEPTH);
        let worker_logger = logger.clone();
        let worker = thread::spawn(move || {
            for payload in rx.iter() {
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.deliver(&payload) {
                        let _ = crate::log_warn!(
                            worker_logger,
                            "{} delivery of {} event failed: {}",
                            sink.name(),
                            payload.event,
                            e
                        );
                    }
                }
            }
        });
        Self { tx: Some(tx), worker: Some(worker), logger }
    }

    /// Queue an event. Never blocks; a full queue drops the event.
    pub fn dispatch(&self, event: &DetectionEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(EventPayload::from(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(p)) => {
                let _ = crate::log_warn!(self.logger, "event queue full, dropping event at {}", p.timestamp);
            }
            Err(TrySendError::Disconnected(_)) => {
                let _ = self.logger.error("event worker has stopped; event dropped");
            }
        }
    }

    /// Close the queue and wait for queued events to drain.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{ TimeZone, Utc };
    use std::sync::Mutex;

    fn event(ms: i64, d: f32) -> DetectionEvent {
        DetectionEvent { timestamp: Utc.timestamp_millis_opt(ms).unwrap(), distance: d }
    }

    struct Collect(Arc<Mutex<Vec<EventPayload>>>);
    impl EventSink for Collect {
        fn name(&self) -> &str {
            "collect"
        }
        fn deliver(&mut self, payload: &EventPayload) -> Result<()> {
            self.0.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct Broken;
    impl EventSink for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn deliver(&mut self, _: &EventPayload) -> Result<()> {
            Err(Error::DeliveryFailure("endpoint down".into()))
        }
    }

    #[test]
    fn payload_shape() {
        let p = EventPayload::from(&event(1_700_000_000_123, 0.125));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["event"], "sound_detected");
        assert_eq!(v["distance_or_confidence"], 0.125);
        assert_eq!(v["timestamp"], "2023-11-14T22:13:20.123Z");
        assert_eq!(v.as_object().unwrap().len(), 3);
    }

    #[test]
    fn failing_sink_does_not_stop_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn EventSink>> = vec![Box::new(Broken), Box::new(Collect(seen.clone()))];
        let mut d = Dispatcher::start(sinks, Arc::new(Logger::disabled()));
        d.dispatch(&event(0, 0.1));
        d.dispatch(&event(1000, 0.2));
        d.shutdown();
        let got = seen.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].distance_or_confidence, 0.2);
    }

    #[test]
    fn dispatch_after_shutdown_is_harmless() {
        let mut d = Dispatcher::start(Vec::new(), Arc::new(Logger::disabled()));
        d.shutdown();
        d.dispatch(&event(0, 0.1));
        d.shutdown();
    }

    #[test]
    fn csv_history_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Detection.csv");
        let mut sink = CsvHistory::new(&path);
        sink.deliver(&EventPayload::from(&event(0, 0.05))).unwrap();
        sink.deliver(&EventPayload::from(&event(2000, 0.1))).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,event,distance");
        assert_eq!(lines[1], "1970-01-01T00:00:00.000Z,sound_detected,0.0500");
    }
}
