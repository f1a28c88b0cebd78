//! # ncplink-host
//!
//! Host side of the co-processor link.
//!
//! This crate provides:
//! - A request/response façade that matches answers to calls by sequence number
//! - Per-call timeouts and a bound on outstanding requests
//! - Notify dispatch into a broadcast event stream and one-shot callbacks
//! - A typed client with one method per co-processor command

pub mod client;
pub mod connection;
pub mod error;
pub mod notify;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, Endpoint};
pub use error::HostError;
pub use notify::{CallbackRegistry, HostEvent};
