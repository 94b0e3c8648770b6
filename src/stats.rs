use crate::client::AttemptResult;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const MONITORING_INTERVAL: Duration = Duration::from_secs(60);

/// Traffic counters shared by every worker
#[derive(Debug)]
pub struct Stats {
    pub start_time: Instant,
    pub attempts: AtomicU64,
    pub completed: AtomicU64,
    pub dns_failures: AtomicU64,
    pub dial_failures: AtomicU64,
    pub read_failures: AtomicU64,
    pub accepted: AtomicU64,
    pub echoed_bytes: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            start_time: Instant::now(),
            attempts: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            dns_failures: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            echoed_bytes: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub uptime: Duration,
    pub attempts: u64,
    pub completed: u64,
    pub dns_failures: u64,
    pub dial_failures: u64,
    pub read_failures: u64,
    pub accepted: u64,
    pub echoed_bytes: u64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "up {}s: {} connection attempts ({} completed, {} dns failures, {} dial failures, {} read failures), {} accepted connections, {} bytes echoed",
            self.uptime.as_secs(),
            self.attempts,
            self.completed,
            self.dns_failures,
            self.dial_failures,
            self.read_failures,
            self.accepted,
            self.echoed_bytes
        )
    }
}

impl Stats {
    /// Returns the number of this attempt, starting at 1
    pub fn connection_attempted(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the number of this accepted connection, starting at 1
    pub fn connection_accepted(&self) -> u64 {
        self.accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn bytes_echoed(&self, n: usize) {
        self.echoed_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record(&self, result: AttemptResult) {
        let counter = match result {
            AttemptResult::Success => &self.completed,
            AttemptResult::DnsFailure => &self.dns_failures,
            AttemptResult::DialFailure => &self.dial_failures,
            AttemptResult::ReadFailure => &self.read_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> Summary {
        Summary {
            uptime: self.start_time.elapsed(),
            attempts: self.attempts.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            dns_failures: self.dns_failures.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            echoed_bytes: self.echoed_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Logs the counters periodically. Never returns.
pub fn run(stats: Arc<Stats>, interval: Duration) {
    loop {
        thread::sleep(interval);
        log::info!("{}", stats.summary());
    }
}
