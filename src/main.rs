// cache-proxy: a high-throughput L7 caching proxy core (see SPEC_FULL.md).
// This binary wires the protocol codecs, handler pipeline and a reference
// single-backend forwarder into a runnable server.

use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use cache_handler::{Handler, HandlerConfig, TracingSlowlogSink};
use cache_proto::codec::{MemcacheBinaryCodec, MemcacheTextCodec, RedisClusterCodec, RedisCodec};
use cache_proto::{CacheType, Codec, Message, Pool};

use cache_proxy::TcpForwarder;

#[derive(Parser, Debug)]
#[command(name = "cache-proxy", version, about = "L7 caching proxy core")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "/etc/cache-proxy/proxy.toml")]
    config: PathBuf,

    /// Overrides the config file's `listen_addr`.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut cfg = match cache_proxy::config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.log_level.clone())),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), listen_addr = %cfg.listen_addr, cache_type = ?cfg.cache_type, "cache-proxy starting");

    let listener = match tokio::net::TcpListener::bind(&cfg.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind {}: {e}", cfg.listen_addr);
            std::process::exit(1);
        }
    };

    let forwarder: Arc<dyn cache_forward::Forwarder> = Arc::new(TcpForwarder::new(cfg.backend_addr.clone()));
    let slog = Arc::new(TracingSlowlogSink);
    let conn_count = Arc::new(AtomicUsize::new(0));
    // One free-list of batch buffers shared by every connection's Handler
    // (spec §4.B), rather than each connection growing and keeping its own.
    let msg_pool: Arc<Pool<Vec<Message>>> = Arc::new(Pool::new(Vec::new));
    let handler_config = HandlerConfig {
        cache_type: cfg.cache_type,
        read_timeout: cfg.read_timeout,
        write_timeout: cfg.write_timeout,
        max_buffer_size: 1024 * 1024,
        concurrent: cfg.concurrent,
        max_concurrent: cfg.max_concurrent,
        slowlog_slower_than: cfg.slowlog_slower_than,
    };

    match cfg.cache_type {
        CacheType::Memcache => {
            accept_loop(listener, MemcacheTextCodec::new, forwarder, slog, handler_config, conn_count, msg_pool).await
        }
        CacheType::MemcacheBinary => {
            accept_loop(
                listener,
                MemcacheBinaryCodec::new,
                forwarder,
                slog,
                handler_config,
                conn_count,
                msg_pool,
            )
            .await
        }
        CacheType::Redis => {
            accept_loop(listener, RedisCodec::new, forwarder, slog, handler_config, conn_count, msg_pool).await
        }
        CacheType::RedisCluster => {
            accept_loop(
                listener,
                RedisClusterCodec::new,
                forwarder,
                slog,
                handler_config,
                conn_count,
                msg_pool,
            )
            .await
        }
        CacheType::Unknown => unreachable!("config::load rejects cache_type::Unknown"),
    }
}

/// Accepts connections forever, spawning one [`Handler`] per connection. A
/// fresh codec instance is built per connection via `make_codec` since codec
/// state (e.g. Memcache binary's quiet-batch tracking) is per-connection;
/// `msg_pool` is shared by every spawned `Handler` instead.
async fn accept_loop<C: Codec + 'static>(
    listener: tokio::net::TcpListener,
    make_codec: fn() -> C,
    forwarder: Arc<dyn cache_forward::Forwarder>,
    slog: Arc<dyn cache_handler::SlowlogSink>,
    handler_config: HandlerConfig,
    conn_count: Arc<AtomicUsize>,
    msg_pool: Arc<Pool<Vec<Message>>>,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        conn_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        info!(%peer_addr, "connection accepted");

        let handler = Handler::new(
            stream,
            make_codec(),
            forwarder.clone(),
            slog.clone(),
            handler_config.clone(),
            conn_count.clone(),
            msg_pool.clone(),
        );
        tokio::spawn(handler.run());
    }
}
