use ship::client::{self, SystemResolver, Timings, WorkerContext};
use ship::config::{self, Config};
use ship::credentials::Credentials;
use ship::lifecycle::{self, AnnotationSettings, LifecycleController, LifecycleError};
use ship::netif::SystemAddresses;
use ship::report::{HttpReporter, NoReporter, Reporter};
use ship::sensor::Discovery;
use ship::server::Listener;
use ship::stats::{self, Stats, MONITORING_INTERVAL};
mod cmd;

use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

/// Listeners get a head start before the first outbound connection
const STARTUP_DELAY: Duration = Duration::from_secs(2);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cmd::Args::parse();
    if let Err(e) = run(args) {
        log::error!("{e:#}");
        process::exit(1);
    }
}

fn run(args: cmd::Args) -> anyhow::Result<()> {
    let features = args.features()?;

    let (config, path) = match &args.config {
        Some(path) => (Config::load(path)?, path.clone()),
        None => Config::load_first(&config::default_paths())?,
    };
    log::info!("configuration loaded from {}", path.display());
    log::debug!("Configuration: {config:?}");
    if let Some(ui) = &config.ui {
        log::info!("status page \"{}\" is configured but not served", ui.title);
    }

    let credentials = Credentials::load(&args.credentials)?;

    let hostname = match &args.hostname {
        Some(h) => h.clone(),
        None => hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string()),
    };
    log::info!("hostname: {hostname}");

    let stats = Arc::new(Stats::default());
    let reporter: Arc<dyn Reporter> = match &features.stats {
        Some(url) => {
            log::info!("stats reported to {url}");
            Arc::new(HttpReporter::spawn(url)?)
        }
        None => Arc::new(NoReporter),
    };

    let controller = Arc::new(LifecycleController::new(
        AnnotationSettings {
            scope: features.scope.clone(),
            scenario: features.scenario.clone(),
            ship: features.ship.clone(),
            tags: config.tags.clone(),
        },
        Box::new(SystemAddresses),
    ));
    lifecycle::register(
        &controller,
        &features.registration,
        &Discovery::default(),
        credentials,
    )?;
    lifecycle::install_signal_handler(Arc::clone(&controller))?;
    let annotated = match controller.activate() {
        Ok(annotated) => annotated,
        Err(LifecycleError::Interrupted) => {
            // the teardown thread ends the process, no traffic may start
            loop {
                thread::park();
            }
        }
        Err(e) => return Err(e.into()),
    };
    log::info!("{annotated} addresses annotated as active");

    // bind everything first so a busy port aborts the startup
    let mut listeners = Vec::with_capacity(config.servers.len());
    for port in &config.servers {
        listeners.push(Listener::bind(*port, Arc::clone(&stats))?);
    }
    for listener in listeners {
        let name = match listener.local_addr() {
            Ok(addr) => format!("server-{}", addr.port()),
            Err(_) => "server".to_string(),
        };
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                if let Err(e) = listener.serve() {
                    log::error!("[server] {e}");
                    process::exit(1);
                }
            })
            .context("could not start a server thread")?;
    }

    thread::sleep(STARTUP_DELAY);

    let modes = features.modes();
    if modes.is_empty() {
        log::warn!("both client variants are disabled");
    }
    let ctx = WorkerContext {
        source: features.ship.clone(),
        hostname,
        resolver: Arc::new(SystemResolver),
        reporter,
        stats: Arc::clone(&stats),
        timings: Timings::default(),
    };
    for (i, target) in config.clients.iter().enumerate() {
        log::info!("[client] starting workers for {target}");
        client::spawn(&ctx, target, i, &modes, features.seed)
            .with_context(|| format!("could not start the workers for {target}"))?;
    }

    thread::Builder::new()
        .name("monitoring".into())
        .spawn(move || stats::run(stats, MONITORING_INTERVAL))
        .context("could not start the monitoring thread")?;

    // the teardown thread ends the process
    loop {
        thread::park();
    }
}
