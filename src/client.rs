//! Client workers: each one loops forever on a target, resolving it, picking one of its
//! addresses, connecting and exchanging a greeting.
//!
//! Failures are never fatal: a worker logs, reports, waits a fixed backoff and starts over.

use crate::report::{Event, Outcome, Reporter};
use crate::stats::Stats;
use crate::target::Target;

use rand::Rng;
use rand_core::{RngCore, SeedableRng};
use rand_pcg::Pcg32;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const DNS_BACKOFF: Duration = Duration::from_secs(20);
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DIAL_BACKOFF: Duration = Duration::from_secs(20);
pub const SHORT_INTERVAL: Duration = Duration::from_secs(30);
pub const LONG_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one connection attempt. Only logged and counted, never kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Success,
    DnsFailure,
    DialFailure,
    ReadFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One greeting per connection, then close and wait
    Short,
    /// Keep the connection and greet periodically until it breaks
    Long,
}

impl Mode {
    fn label(&self) -> &'static str {
        match self {
            Mode::Short => "[client]",
            Mode::Long => "[long-client]",
        }
    }

    pub fn greeting(&self, hostname: &str) -> String {
        match self {
            Mode::Short => format!("hello from {hostname}\r\n"),
            Mode::Long => format!("long hello from {hostname}\r\n"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub dns_backoff: Duration,
    pub dial_timeout: Duration,
    pub dial_backoff: Duration,
    pub short_interval: Duration,
    pub long_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            dns_backoff: DNS_BACKOFF,
            dial_timeout: DIAL_TIMEOUT,
            dial_backoff: DIAL_BACKOFF,
            short_interval: SHORT_INTERVAL,
            long_interval: LONG_INTERVAL,
        }
    }
}

pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolution through the system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in (host, 0).to_socket_addrs()? {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        Ok(ips)
    }
}

/// Uniformly picks one backend
pub fn pick_backend(rng: &mut impl RngCore, backends: &[IpAddr]) -> Option<IpAddr> {
    if backends.is_empty() {
        return None;
    }
    Some(backends[rng.gen_range(0..backends.len())])
}

/// What every worker shares: read-only settings and thread-safe sinks.
#[derive(Clone)]
pub struct WorkerContext {
    /// Name of this ship, used as the source of stats events
    pub source: String,
    pub hostname: String,
    pub resolver: Arc<dyn Resolver>,
    pub reporter: Arc<dyn Reporter>,
    pub stats: Arc<Stats>,
    pub timings: Timings,
}

pub struct Worker<G: RngCore = Pcg32> {
    ctx: WorkerContext,
    target: Target,
    mode: Mode,
    rng: G,
}

impl<G: RngCore> Worker<G> {
    pub fn new(ctx: WorkerContext, target: Target, mode: Mode, rng: G) -> Self {
        Worker {
            ctx,
            target,
            mode,
            rng,
        }
    }

    /// Resolves the target, picks a backend and connects to it.
    pub fn connect(&mut self) -> Result<TcpStream, AttemptResult> {
        let label = self.mode.label();
        let host = &self.target.host;

        let backends = match self.ctx.resolver.resolve(host) {
            Ok(backends) => backends,
            Err(e) => {
                log::warn!("{label} DNS lookup error for {host}, err={e}");
                return Err(AttemptResult::DnsFailure);
            }
        };
        let Some(backend) = pick_backend(&mut self.rng, &backends) else {
            log::warn!("{label} DNS lookup for {host} returned no address");
            return Err(AttemptResult::DnsFailure);
        };
        let address = SocketAddr::new(backend, self.target.port);
        log::info!(
            "{label} service {host} resolved to {} hosts, picked {backend}",
            backends.len()
        );

        let n = self.ctx.stats.connection_attempted();
        log::info!("{label} connect {n} to {address}");
        match TcpStream::connect_timeout(&address, self.ctx.timings.dial_timeout) {
            Ok(stream) => {
                if let (Ok(peer), Ok(local)) = (stream.peer_addr(), stream.local_addr()) {
                    log::info!("{label} connected to {peer} on {local}");
                }
                self.ctx
                    .reporter
                    .report(Event::new(Outcome::Complete, &self.ctx.source, host));
                Ok(stream)
            }
            Err(e) => {
                log::warn!("{label} connect error, err={e}");
                self.ctx
                    .reporter
                    .report(Event::new(Outcome::Failed, &self.ctx.source, host));
                Err(AttemptResult::DialFailure)
            }
        }
    }

    /// One iteration of the loop, without the pause that follows it. In long mode, this returns
    /// only once the connection breaks.
    pub fn attempt(&mut self) -> AttemptResult {
        let stream = match self.connect() {
            Ok(stream) => stream,
            Err(result) => return result,
        };
        match self.mode {
            Mode::Short => self.short_session(stream),
            Mode::Long => self.long_session(stream),
        }
    }

    fn short_session(&self, stream: TcpStream) -> AttemptResult {
        let label = self.mode.label();
        let mut reader = BufReader::new(stream);
        let result = match exchange(&mut reader, &self.mode.greeting(&self.ctx.hostname)) {
            Ok(_) => AttemptResult::Success,
            Err(e) => {
                log::warn!("{label} read error, err={e}");
                AttemptResult::ReadFailure
            }
        };
        let stream = reader.into_inner();
        if let (Ok(peer), Ok(local)) = (stream.peer_addr(), stream.local_addr()) {
            log::info!("{label} closed connection to {peer} on {local}");
        }
        result
    }

    fn long_session(&self, stream: TcpStream) -> AttemptResult {
        let label = self.mode.label();
        let greeting = self.mode.greeting(&self.ctx.hostname);
        let peer = stream.peer_addr().ok();
        let mut reader = BufReader::new(stream);
        let mut exchanges: u64 = 0;
        loop {
            if let Err(e) = exchange(&mut reader, &greeting) {
                log::warn!(
                    "{label} connection to {} lost after {exchanges} exchanges, err={e}",
                    peer.map(|p| p.to_string()).unwrap_or_default()
                );
                return AttemptResult::ReadFailure;
            }
            exchanges += 1;
            thread::sleep(self.ctx.timings.long_interval);
        }
    }

    /// How long to wait before the next iteration
    pub fn pause_after(&self, result: AttemptResult) -> Duration {
        let timings = &self.ctx.timings;
        match (result, self.mode) {
            (AttemptResult::DnsFailure, _) => timings.dns_backoff,
            (AttemptResult::DialFailure, _) => timings.dial_backoff,
            (_, Mode::Short) => timings.short_interval,
            // a broken long-lived connection reconnects after the dial backoff
            (_, Mode::Long) => timings.dial_backoff,
        }
    }

    /// Loops forever.
    pub fn run(mut self) {
        loop {
            let result = self.attempt();
            log::debug!("{} {} attempt: {result:?}", self.mode.label(), self.target);
            self.ctx.stats.record(result);
            thread::sleep(self.pause_after(result));
        }
    }
}

/// Writes a greeting line and reads one line back, whatever its bytes. End of stream is an error.
fn exchange(reader: &mut BufReader<TcpStream>, greeting: &str) -> io::Result<Vec<u8>> {
    reader.get_mut().write_all(greeting.as_bytes())?;
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        ));
    }
    Ok(line)
}

/// Seed of the worker running `mode` on the target at `target_index` in the configuration.
/// Distinct for every worker of a run.
pub fn worker_seed(seed: u64, target_index: usize, mode: Mode) -> u64 {
    let slot = match mode {
        Mode::Short => 0,
        Mode::Long => 1,
    };
    seed.wrapping_add(((target_index as u64) << 1) | slot)
}

/// Starts one worker thread per mode for this target. Workers get their own random generator,
/// derived from `seed` and the target position when given.
pub fn spawn(
    ctx: &WorkerContext,
    target: &Target,
    target_index: usize,
    modes: &[Mode],
    seed: Option<u64>,
) -> io::Result<Vec<thread::JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(modes.len());
    for mode in modes {
        let rng = match seed {
            Some(s) => Pcg32::seed_from_u64(worker_seed(s, target_index, *mode)),
            None => Pcg32::seed_from_u64(rand::random()),
        };
        let worker = Worker::new(ctx.clone(), target.clone(), *mode, rng);
        let name = match mode {
            Mode::Short => format!("client-short-{target}"),
            Mode::Long => format!("client-long-{target}"),
        };
        handles.push(thread::Builder::new().name(name).spawn(move || worker.run())?);
    }
    Ok(handles)
}
