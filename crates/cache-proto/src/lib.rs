//! Data model (§3) and protocol codecs (§4.C) for the cache proxy core.
//!
//! This crate owns everything that is pure, in-memory, and protocol-shaped:
//! `Message`/`Request` pooled carriers, the `CompletionBarrier` they embed,
//! and the four wire codecs (Memcache text, Memcache binary, Redis RESP,
//! Redis Cluster). It depends only on `cache-io` for buffer access; it knows
//! nothing about sockets, the forwarder, or the handler loop.

mod barrier;
mod cache_type;
pub mod codec;
mod error;
mod merge;
mod message;
mod pool;
mod request;

pub use barrier::CompletionBarrier;
pub use cache_type::CacheType;
pub use codec::Codec;
pub use error::{ProtoError, ProtoResult};
pub use merge::MergeType;
pub use message::Message;
pub use pool::Pool;
pub use request::Request;
