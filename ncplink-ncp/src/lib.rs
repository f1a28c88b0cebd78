//! # ncplink-ncp
//!
//! Co-processor side of ncplink.
//!
//! This crate provides:
//! - The command table answering every host request
//! - The protocol engine seam and a simulated engine
//! - Network parameter and neighbor state
//! - The run loop turning engine events into notifies
//! - YAML and environment configuration
//! - Prometheus metrics over HTTP

pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;
pub mod sim;
pub mod state;

pub use config::{BusSettings, Config, ConfigError, LinkConfig, LinkMode, MetricsConfig};
pub use engine::{EngineEvent, EngineRequest, EventSink, ProtocolEngine};
pub use error::NcpError;
pub use handler::{command_table, ApsKind, ApsMailbox, CommandHandler, NcpContext};
pub use metrics::Metrics;
pub use server::{Ncp, NcpStats};
pub use sim::SimulatedEngine;
pub use state::{NetworkParams, NetworkStore};
