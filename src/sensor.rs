use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// A sensor id containing this marker belongs to an agent that has not completed its own
/// registration.
pub const UNREGISTERED_MARKER: &str = "uuid-";

pub const DISCOVERY_ATTEMPTS: u32 = 12;
pub const DISCOVERY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("could not read a sensor id from {} after {attempts} attempts (check if the sensor is running), last error: {last_error}", .path.display())]
    NotFound {
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },
    #[error("sensor is not registered {0}")]
    Unregistered(String),
    #[error("could not obtain site configuration from {}: {source}", .path.display())]
    SiteConfig { path: PathBuf, source: io::Error },
    #[error("site configuration {} has no key=value line with a URL", .path.display())]
    MalformedSiteConfig { path: PathBuf },
}

/// How many times, and how often, the sensor id file is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for Discovery {
    fn default() -> Self {
        Discovery {
            attempts: DISCOVERY_ATTEMPTS,
            delay: DISCOVERY_DELAY,
        }
    }
}

/// The local sensor registration: its unique id and the inventory service it reports to.
/// Discovered once at startup and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    id: String,
    base_url: String,
}

impl SensorIdentity {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        SensorIdentity {
            id: id.into(),
            base_url: base_url.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn discover(
        sensor_id_path: &Path,
        site_config_path: &Path,
        discovery: &Discovery,
    ) -> Result<Self, SensorError> {
        let id = discover_id(sensor_id_path, discovery)?;
        log::info!("sensor is registered with uuid={id}");
        let base_url = read_site_url(site_config_path)?;
        Ok(SensorIdentity { id, base_url })
    }
}

/// Polls the sensor id file until it can be read.
pub fn discover_id(path: &Path, discovery: &Discovery) -> Result<String, SensorError> {
    let mut last_error = String::from("no attempt made");
    for attempt in 1..=discovery.attempts {
        match fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => {
                let id = content.trim().to_string();
                if id.contains(UNREGISTERED_MARKER) {
                    return Err(SensorError::Unregistered(id));
                }
                return Ok(id);
            }
            Ok(_) => last_error = String::from("empty sensor id file"),
            Err(e) => last_error = e.to_string(),
        }
        log::warn!(
            "attempt {attempt}, no sensor uuid (check if sensor is running) error={last_error}"
        );
        if attempt < discovery.attempts {
            thread::sleep(discovery.delay);
        }
    }
    Err(SensorError::NotFound {
        path: path.to_path_buf(),
        attempts: discovery.attempts,
        last_error,
    })
}

pub fn read_site_url(path: &Path) -> Result<String, SensorError> {
    let contents = fs::read_to_string(path).map_err(|source| SensorError::SiteConfig {
        path: path.to_path_buf(),
        source,
    })?;
    parse_site_url(&contents).ok_or_else(|| SensorError::MalformedSiteConfig {
        path: path.to_path_buf(),
    })
}

/// Value of the first `key=value` line, without surrounding whitespace and double quotes.
pub fn parse_site_url(contents: &str) -> Option<String> {
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().trim_matches('"').trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
