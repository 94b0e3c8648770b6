//! Synthetic TCP traffic generation between the hosts of a test network.
//! Each process dials its configured targets, echoes what its own listeners receive, and
//! announces its lifecycle to the network inventory service.

/// Traffic description and runtime capabilities
pub mod config;
/// `host:port` targets
pub mod target;

/// Outbound connection workers
pub mod client;
/// Inbound echo listeners
pub mod server;

/// Connection counters
pub mod stats;
/// Connection outcomes sent to the stats collector
pub mod report;

/// Inventory API credentials
pub mod credentials;
/// Inventory REST client
pub mod inventory;
/// Lifecycle tags of the local addresses
pub mod annotation;
/// Local sensor agent identity
pub mod sensor;
/// Local network addresses
pub mod netif;

/// Registration, activation and teardown
pub mod lifecycle;
