//! Portbridge Library
//!
//! Local TCP port forwarding to an on-demand provisioned remote server.
//!
//! The forwarder binds a fixed set of local ports and relays every accepted
//! connection, byte for byte, to the corresponding port on a remote host
//! whose address is obtained from an HTTP provisioning endpoint.

pub mod config;
pub mod provision;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use provision::ProvisionClient;
pub use relay::{PortForwarder, RelaySession};

/// Common error type for the forwarder
pub type Result<T> = anyhow::Result<T>;
