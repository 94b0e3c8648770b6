use crossbeam_channel::{bounded, Sender, TrySendError};
use reqwest::blocking::Client;
use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;
use thiserror::Error;

const QUEUE_SIZE: usize = 500;
const COLLECTOR_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("could not build the collector client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("could not start the stats reporter thread: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Complete => write!(f, "complete"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// A connection outcome, keyed by the ship that made it and the target host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub outcome: Outcome,
    pub source: String,
    pub target: String,
}

impl Event {
    pub fn new(outcome: Outcome, source: &str, target: &str) -> Self {
        Event {
            outcome,
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    /// Path of the collector endpoint for this event
    pub fn path(&self) -> String {
        format!("/log/{}/{}:{}", self.outcome, self.source, self.target)
    }
}

/// Best-effort sink for connection outcomes. Reporting never fails from the caller's side.
pub trait Reporter: Send + Sync {
    fn report(&self, event: Event);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoReporter;

impl Reporter for NoReporter {
    fn report(&self, _: Event) {}
}

/// Sends events to the HTTP stats collector from a background thread, so that a slow collector
/// never delays a worker.
pub struct HttpReporter {
    tx: Sender<Event>,
}

impl HttpReporter {
    pub fn spawn(base_url: &str) -> Result<Self, ReporterError> {
        let client = Client::builder().timeout(COLLECTOR_TIMEOUT).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let (tx, rx) = bounded::<Event>(QUEUE_SIZE);
        thread::Builder::new()
            .name("stats-reporter".into())
            .spawn(move || {
                for event in rx {
                    let url = format!("{base_url}{}", event.path());
                    match client.get(&url).send() {
                        Ok(response) => {
                            let status = response.status();
                            // drain the body so the connection can be reused
                            let _ = response.bytes();
                            if !status.is_success() {
                                log::debug!("[client] collector answered {status} for {url}");
                            }
                        }
                        Err(e) => log::warn!(
                            "[client] failed to log a {} connection, err={e}",
                            event.outcome
                        ),
                    }
                }
            })?;
        Ok(HttpReporter { tx })
    }
}

impl Reporter for HttpReporter {
    fn report(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => (),
            Err(TrySendError::Full(event)) => {
                log::debug!("stats queue full, {event:?} dropped");
            }
            Err(TrySendError::Disconnected(_)) => log::warn!("stats reporter stopped"),
        }
    }
}
