//! Library surface for the `cache-proxy` binary: configuration loading and
//! the reference single-backend forwarder. The actual protocol core lives
//! in the `cache-io`/`cache-proto`/`cache-forward`/`cache-handler` crates;
//! this crate only wires them together into a runnable server.

pub mod config;
pub mod tcp_forwarder;

pub use config::{Config, ConfigError, DEFAULT_CONFIG_PATH};
pub use tcp_forwarder::TcpForwarder;
