use crate::client::Mode;
use crate::target::{Target, TargetError};

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration files tried in order when no path is given on the command line.
pub const DEFAULT_PATHS: [&str; 2] = ["conf.yaml", "/etc/ship/conf.yaml"];

pub const DEFAULT_SENSOR_ID_PATH: &str = "/usr/local/tet/sensor_id";
pub const DEFAULT_SITE_CONFIG_PATH: &str = "/usr/local/tet/site.cfg";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("no configuration file found (tried {tried:?})")]
    NotFound { tried: Vec<PathBuf> },
    #[error("ill-formed YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("ill-formed JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ill-formed TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("server port 0 cannot be served")]
    ZeroPort,
}

/// A user-defined annotation, added to the lifecycle tags at startup.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Descriptor of the optional status page.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Ui {
    pub title: String,
    pub body: String,
    pub image: String,
    pub favicon: String,
}

#[derive(Deserialize, Debug)]
#[allow(unused)]
struct Package {
    name: String,
    version: String,
    release: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct RawConfig {
    clients: Vec<String>,
    servers: Vec<u16>,
    tags: Vec<Tag>,
    ui: Option<Ui>,
    packages: Vec<Package>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Toml,
}

impl Format {
    /// Guess the format from the file extension. YAML is the default.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            Some("toml") => Format::Toml,
            _ => Format::Yaml,
        }
    }
}

/// The validated traffic configuration. Immutable once loaded and shared read-only by every
/// worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub clients: Vec<Target>,
    pub servers: Vec<u16>,
    pub tags: Vec<Tag>,
    pub ui: Option<Ui>,
}

impl Config {
    pub fn parse(contents: &str, format: Format) -> Result<Self, ConfigError> {
        let raw: RawConfig = match format {
            Format::Yaml if contents.trim().is_empty() => RawConfig::default(),
            Format::Yaml => serde_yaml::from_str(contents)?,
            Format::Json => serde_json::from_str(contents)?,
            Format::Toml => toml::from_str(contents)?,
        };

        if !raw.packages.is_empty() {
            log::warn!(
                "{} packages are configured but package provisioning is not supported, ignored",
                raw.packages.len()
            );
        }

        let clients = raw
            .clients
            .iter()
            .map(|c| Target::parse(c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut servers: Vec<u16> = Vec::with_capacity(raw.servers.len());
        for port in raw.servers {
            if port == 0 {
                return Err(ConfigError::ZeroPort);
            }
            if servers.contains(&port) {
                log::warn!("Server port {port} is defined twice in the configuration file!");
                continue;
            }
            servers.push(port);
        }

        let ui = raw.ui.filter(|ui| ui != &Ui::default());

        Ok(Config {
            clients,
            servers,
            tags: raw.tags,
            ui,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Config::parse(&contents, Format::from_path(path))
    }

    /// Load the first readable file among `paths`. A file that exists but does not parse is an
    /// error: the next candidate is only tried when the file cannot be read.
    pub fn load_first(paths: &[PathBuf]) -> Result<(Self, PathBuf), ConfigError> {
        for path in paths {
            match Config::load(path) {
                Ok(config) => return Ok((config, path.clone())),
                Err(ConfigError::Io { path, source }) => {
                    log::warn!("error opening {}: {source}", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        Err(ConfigError::NotFound {
            tried: paths.to_vec(),
        })
    }
}

pub fn default_paths() -> Vec<PathBuf> {
    DEFAULT_PATHS.iter().map(PathBuf::from).collect()
}

/// How this process finds the inventory service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A local sensor agent is installed: its identity and the inventory URL are read from
    /// local files, and the sensor is deregistered at teardown.
    Sensor {
        sensor_id_path: PathBuf,
        site_config_path: PathBuf,
    },
    /// No sensor: the inventory URL is given and nothing is deregistered.
    External { url: String },
}

/// Optional capabilities of a run, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Features {
    pub scenario: String,
    pub ship: String,
    pub scope: String,
    /// Base URL of the stats collector, when stats reporting is enabled
    pub stats: Option<String>,
    pub registration: Registration,
    pub short_lived: bool,
    pub long_lived: bool,
    pub seed: Option<u64>,
}

impl Features {
    /// Default collector address for a scenario
    pub fn default_stats_url(scenario: &str) -> String {
        format!("http://svc-{scenario}-stats:8080")
    }

    pub fn modes(&self) -> Vec<Mode> {
        let mut modes = Vec::with_capacity(2);
        if self.short_lived {
            modes.push(Mode::Short);
        }
        if self.long_lived {
            modes.push(Mode::Long);
        }
        modes
    }
}
