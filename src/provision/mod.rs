//! Provisioning Module
//!
//! Client for the HTTP endpoint that starts the remote server on demand and
//! reports its address.

pub mod client;

pub use client::ProvisionClient;
