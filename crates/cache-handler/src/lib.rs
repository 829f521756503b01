//! The handler pipeline orchestrator (spec §4.E): the loop that ties a
//! connection's codec and a `Forwarder` together, one client connection per
//! `Handler`, adaptive batch sizing, and close-once semantics.

mod batch;
mod config;
mod handler;
mod slowlog;

pub use batch::BatchSizer;
pub use config::HandlerConfig;
pub use handler::Handler;
pub use slowlog::{SlowlogSink, TracingSlowlogSink};
