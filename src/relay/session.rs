//! Relay Session
//!
//! One session per accepted connection: an outbound connection to the remote
//! endpoint and two copy loops, one per direction, that run until EOF, an
//! I/O error, or the idle timeout. A loop that stops shuts down its
//! destination, which unblocks the opposite loop within one pending
//! read/write, so both connections always end closed.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ForwardConfig;
use crate::Result;

/// Represents an active relay session
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

impl RelaySession {
    fn new(client_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            session_id: Uuid::new_v4().simple().to_string(),
            client_addr,
            remote_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Bytes relayed from the client to the remote server
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes relayed from the remote server to the client
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    /// Session duration so far
    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn add_bytes_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    fn add_bytes_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Log session statistics
    fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            client_addr = %self.client_addr,
            remote_addr = %self.remote_addr,
            duration_ms = self.duration().as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            "Relay session completed"
        );
    }

    /// Open the outbound connection and relay until both directions finish.
    ///
    /// A connect failure closes the inbound connection and is reported to the
    /// spawning task only; it never reaches the listener or other sessions.
    #[instrument(skip(inbound, config), fields(remote_addr = %remote_addr))]
    pub async fn open(
        remote_addr: SocketAddr,
        inbound: TcpStream,
        config: &ForwardConfig,
    ) -> Result<()> {
        let client_addr = inbound.peer_addr().context("Failed to get client address")?;

        let outbound =
            match timeout(config.connect_timeout, TcpStream::connect(remote_addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    drop(inbound);
                    return Err(e)
                        .with_context(|| format!("Connection to {} failed", remote_addr));
                }
                Err(_) => {
                    drop(inbound);
                    anyhow::bail!(
                        "Connection to {} timed out after {:?}",
                        remote_addr,
                        config.connect_timeout
                    );
                }
            };

        let session = RelaySession::new(client_addr, remote_addr);
        debug!(
            session_id = %session.session_id,
            client_addr = %client_addr,
            "Relaying"
        );

        let (client_read, client_write) = inbound.into_split();
        let (remote_read, remote_write) = outbound.into_split();

        let idle_timeout = config.idle_timeout;
        let buffer_size = config.buffer_size;
        let up = tokio::spawn(pump(client_read, remote_write, idle_timeout, buffer_size));
        let down = tokio::spawn(pump(remote_read, client_write, idle_timeout, buffer_size));

        match up.await {
            Ok((bytes, end)) => {
                session.add_bytes_up(bytes);
                debug!(
                    session_id = %session.session_id,
                    bytes,
                    %end,
                    "Client-to-remote loop finished"
                );
            }
            Err(e) => warn!(
                session_id = %session.session_id,
                "Client-to-remote loop failed: {}",
                e
            ),
        }

        match down.await {
            Ok((bytes, end)) => {
                session.add_bytes_down(bytes);
                debug!(
                    session_id = %session.session_id,
                    bytes,
                    %end,
                    "Remote-to-client loop finished"
                );
            }
            Err(e) => warn!(
                session_id = %session.session_id,
                "Remote-to-client loop failed: {}",
                e
            ),
        }

        session.log_stats();
        Ok(())
    }
}

/// Why a copy loop stopped
#[derive(Debug)]
enum PumpEnd {
    /// Orderly EOF from the source
    Eof,
    /// No read or write completed within the idle timeout
    IdleTimeout,
    /// Read or write error
    Error(std::io::Error),
}

impl fmt::Display for PumpEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpEnd::Eof => write!(f, "eof"),
            PumpEnd::IdleTimeout => write!(f, "idle timeout"),
            PumpEnd::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Copy bytes from `src` to `dst` in fixed-size chunks until EOF, an error,
/// or the idle timeout, then shut down `dst` so the opposite loop unblocks.
async fn pump<R, W>(
    mut src: R,
    mut dst: W,
    idle_timeout: Duration,
    buffer_size: usize,
) -> (u64, PumpEnd)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut copied = 0u64;

    let end = loop {
        let n = match timeout(idle_timeout, src.read(&mut buffer)).await {
            Ok(Ok(0)) => break PumpEnd::Eof,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break PumpEnd::Error(e),
            Err(_) => break PumpEnd::IdleTimeout,
        };
        match timeout(idle_timeout, dst.write_all(&buffer[..n])).await {
            Ok(Ok(())) => copied += n as u64,
            Ok(Err(e)) => break PumpEnd::Error(e),
            Err(_) => break PumpEnd::IdleTimeout,
        }
    };

    let _ = dst.shutdown().await;
    (copied, end)
}
