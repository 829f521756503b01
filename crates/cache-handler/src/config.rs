use std::time::Duration;

use cache_proto::CacheType;

/// Everything a [`crate::Handler`] needs that isn't the socket, codec or
/// forwarder themselves. The root binary's config layer builds one of these
/// per listener from the validated `proxy.toml` (spec §6).
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub cache_type: CacheType,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_buffer_size: usize,
    /// Initial/minimum carrier-batch size (`concurrent` in spec §4.E).
    pub concurrent: usize,
    /// Ceiling the adaptive batch size never grows past.
    pub max_concurrent: usize,
    /// `None` disables the slowlog check entirely.
    pub slowlog_slower_than: Option<Duration>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            cache_type: CacheType::Unknown,
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            max_buffer_size: 1024 * 1024,
            concurrent: 2,
            max_concurrent: 1024,
            slowlog_slower_than: None,
        }
    }
}
