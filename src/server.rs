use crate::stats::Stats;

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

pub const READ_BUFFER_SIZE: usize = 1024;
/// Every echoed chunk is prefixed with this marker
pub const ECHO_PREFIX: &[u8] = b"server says: ";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen error on {addr}, err={source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("accept error on port {port}, err={source}")]
    Accept { port: u16, source: io::Error },
}

/// A bound echo listener
pub struct Listener {
    listener: TcpListener,
    port: u16,
    stats: Arc<Stats>,
}

impl Listener {
    /// Binds on every interface, IPv6 and IPv4 when the host supports dual-stack sockets, IPv4
    /// only otherwise.
    pub fn bind(port: u16, stats: Arc<Stats>) -> Result<Self, ServerError> {
        let any_v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
        match Listener::bind_addr(any_v6, Arc::clone(&stats)) {
            Ok(listener) => Ok(listener),
            Err(ServerError::Bind { source, .. }) if source.kind() != io::ErrorKind::AddrInUse => {
                log::debug!("[server] no IPv6 listener on {port}, err={source}");
                Listener::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), stats)
            }
            Err(e) => Err(e),
        }
    }

    pub fn bind_addr(addr: SocketAddr, stats: Arc<Stats>) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(addr.port());
        log::info!("[server] serving on {port}");
        Ok(Listener {
            listener,
            port,
            stats,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, one handler thread each. Only returns when accepting fails,
    /// as the listener is then considered broken.
    pub fn serve(self) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = self.listener.accept().map_err(|source| ServerError::Accept {
                port: self.port,
                source,
            })?;
            let n = self.stats.connection_accepted();
            log::info!(
                "[server] connection {n} accepted from {peer} to port {}",
                self.port
            );
            let stats = Arc::clone(&self.stats);
            let spawned = thread::Builder::new()
                .name(format!("conn-{}-{n}", self.port))
                .spawn(move || handle_connection(stream, &stats));
            if let Err(e) = spawned {
                log::error!("[server] could not start a handler for connection {n}, err={e}");
            }
        }
    }
}

/// Echoes every chunk back, prefixed, until the peer closes or an error occurs.
pub fn handle_connection(mut stream: TcpStream, stats: &Stats) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut reply = Vec::with_capacity(ECHO_PREFIX.len() + READ_BUFFER_SIZE);
    loop {
        let read = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("handle connection error, err={e}");
                break;
            }
        };
        reply.clear();
        reply.extend_from_slice(ECHO_PREFIX);
        reply.extend_from_slice(&buf[..read]);
        if let Err(e) = stream.write_all(&reply) {
            log::warn!("handle connection error, err={e}");
            break;
        }
        stats.bytes_echoed(read);
    }
}
