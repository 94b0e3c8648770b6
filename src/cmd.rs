use ship::config::{
    Features, Registration, DEFAULT_SENSOR_ID_PATH, DEFAULT_SITE_CONFIG_PATH,
};
use ship::credentials;

use anyhow::bail;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, help = "Configuration file. By default, conf.yaml then /etc/ship/conf.yaml")]
    pub config: Option<PathBuf>,
    #[arg(long, default_value = credentials::DEFAULT_PATH, help = "API credentials file, used when BOTTLE_API_KEY and BOTTLE_API_SECRET are not set")]
    pub credentials: PathBuf,

    #[arg(long, env = "BOTTLE_SCENARIO", default_value = "", help = "Scenario this ship belongs to")]
    pub scenario: String,
    #[arg(long, env = "BOTTLE_SHIP", default_value = "", help = "Name of this ship")]
    pub ship: String,
    #[arg(long, env = "BOTTLE_SCOPE", default_value = "", help = "Inventory scope of the annotations")]
    pub scope: String,

    #[arg(long, env = "BOTTLE_STATS", default_value_t = false, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", help = "Report connection outcomes to the stats collector")]
    pub stats: bool,
    #[arg(long, env = "BOTTLE_STATS_URL", help = "Stats collector. By default, http://svc-<scenario>-stats:8080")]
    pub stats_url: Option<String>,

    #[arg(long, env = "BOTTLE_SENSOR", default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", help = "A sensor agent is installed locally")]
    pub sensor: bool,
    #[arg(long, env = "BOTTLE_URL", help = "Inventory service, required without a local sensor")]
    pub url: Option<String>,
    #[arg(long, default_value = DEFAULT_SENSOR_ID_PATH)]
    pub sensor_id_path: PathBuf,
    #[arg(long, default_value = DEFAULT_SITE_CONFIG_PATH)]
    pub site_config_path: PathBuf,

    #[arg(long, default_value_t = false, help = "Do not start the long-lived clients")]
    pub no_long_lived: bool,
    #[arg(long, default_value_t = false, help = "Do not start the short-lived clients")]
    pub no_short_lived: bool,

    #[arg(long, help = "Host name sent in the greetings. By default, the system host name")]
    pub hostname: Option<String>,
    #[arg(short, long, help = "Seed for random number generation")]
    pub seed: Option<u64>,
}

impl Args {
    pub fn features(&self) -> anyhow::Result<Features> {
        let registration = if self.sensor {
            Registration::Sensor {
                sensor_id_path: self.sensor_id_path.clone(),
                site_config_path: self.site_config_path.clone(),
            }
        } else {
            match self.url.as_deref().map(str::trim) {
                Some(url) if !url.is_empty() => Registration::External {
                    url: url.to_string(),
                },
                _ => bail!("BOTTLE_URL must be set when BOTTLE_SENSOR is false"),
            }
        };
        let stats = self.stats.then(|| {
            self.stats_url
                .clone()
                .unwrap_or_else(|| Features::default_stats_url(&self.scenario))
        });
        Ok(Features {
            scenario: self.scenario.clone(),
            ship: self.ship.clone(),
            scope: self.scope.clone(),
            stats,
            registration,
            short_lived: !self.no_short_lived,
            long_lived: !self.no_long_lived,
            seed: self.seed,
        })
    }
}
