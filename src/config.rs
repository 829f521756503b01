//! TOML configuration loading (spec §6), following the teacher's two-layer
//! `Raw*Config` -> validated `*Config` pattern
//! (`services/forwarder/src/config.rs`).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use cache_proto::CacheType;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cache-proxy/proxy.toml";

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_type: CacheType,
    pub listen_addr: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub slowlog_slower_than: Option<Duration>,
    pub concurrent: usize,
    pub max_concurrent: usize,
    pub log_level: String,
    /// Single backend the reference `TcpForwarder` dials; not read by the
    /// core, only by this binary's own forwarder (spec §0: "a stand-in for
    /// the out-of-scope backend pool").
    pub backend_addr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid value for '{field}': {detail}")]
    InvalidValue { field: &'static str, detail: String },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    cache_type: Option<String>,
    listen_addr: Option<String>,
    read_timeout: Option<u64>,
    write_timeout: Option<u64>,
    slowlog_slower_than: Option<u64>,
    concurrent: Option<usize>,
    max_concurrent: Option<usize>,
    log_level: Option<String>,
    backend: Option<RawBackendConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct RawBackendConfig {
    addr: Option<String>,
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_from_str(&toml_str)
}

fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;

    let cache_type = match raw.cache_type.as_deref() {
        Some("memcache") => CacheType::Memcache,
        Some("memcache_binary") => CacheType::MemcacheBinary,
        Some("redis") => CacheType::Redis,
        Some("redis_cluster") => CacheType::RedisCluster,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "cache_type",
                detail: format!("unknown cache type '{other}'"),
            })
        }
        None => return Err(ConfigError::MissingField("cache_type")),
    };

    let listen_addr = raw.listen_addr.ok_or(ConfigError::MissingField("listen_addr"))?;

    let backend_addr = raw
        .backend
        .and_then(|b| b.addr)
        .ok_or(ConfigError::MissingField("backend.addr"))?;

    Ok(Config {
        cache_type,
        listen_addr,
        read_timeout: Duration::from_secs(raw.read_timeout.unwrap_or(1)),
        write_timeout: Duration::from_secs(raw.write_timeout.unwrap_or(1)),
        slowlog_slower_than: raw.slowlog_slower_than.map(Duration::from_micros),
        concurrent: raw.concurrent.unwrap_or(2),
        max_concurrent: raw.max_concurrent.unwrap_or(1024),
        log_level: raw.log_level.unwrap_or_else(|| "info".to_owned()),
        backend_addr,
    })
}
