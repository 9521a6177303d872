//! Port Forwarder
//!
//! One forwarder per configured port mapping. Binds the local endpoint,
//! accepts connections forever, and hands each accepted connection to its
//! own relay session against the fixed remote endpoint.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info, warn};

use crate::config::ForwardConfig;
use crate::relay::RelaySession;
use crate::Result;

/// Accepts connections on one local endpoint and forwards each to one fixed
/// remote endpoint
pub struct PortForwarder {
    listener: TcpListener,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    config: Arc<ForwardConfig>,
}

impl PortForwarder {
    /// Bind the local endpoint. A bind or listen failure is a startup error;
    /// the caller must not serve traffic on this mapping.
    pub fn bind(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        config: Arc<ForwardConfig>,
    ) -> Result<Self> {
        let socket = if local_addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .with_context(|| format!("Failed to create socket for {}", local_addr))?;

        socket
            .set_reuseaddr(true)
            .with_context(|| format!("Failed to set SO_REUSEADDR for {}", local_addr))?;
        socket
            .bind(local_addr)
            .with_context(|| format!("Failed to bind {}", local_addr))?;

        let listener = socket
            .listen(config.listen_backlog)
            .with_context(|| format!("Failed to listen on {}", local_addr))?;
        let local_addr = listener
            .local_addr()
            .with_context(|| format!("Failed to get bound address for {}", local_addr))?;

        Ok(Self {
            listener,
            local_addr,
            remote_addr,
            config,
        })
    }

    /// The actual bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The remote endpoint this forwarder targets
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Accept connections until the listening socket itself fails. A failure
    /// here ends this forwarder only; sessions already running are unaffected.
    pub async fn run(self) -> Result<()> {
        info!("Forwarding {} -> {}", self.local_addr, self.remote_addr);

        loop {
            let (inbound, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) if is_transient_accept_error(&e) => {
                    warn!("Transient accept error on {}: {}", self.local_addr, e);
                    continue;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Listener on {} failed", self.local_addr));
                }
            };

            debug!("Accepted connection from {} on {}", peer_addr, self.local_addr);

            let remote_addr = self.remote_addr;
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                if let Err(e) = RelaySession::open(remote_addr, inbound, &config).await {
                    warn!("Session from {} ended early: {:#}", peer_addr, e);
                }
            });
        }
    }
}

/// Accept errors that concern the connection being accepted rather than the
/// listening socket itself
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}
