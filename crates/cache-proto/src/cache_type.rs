/// Which wire protocol a connection (and the Messages/Requests it owns)
/// speaks. Pools are free-lists keyed by this tag (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
    Unknown,
    Memcache,
    MemcacheBinary,
    Redis,
    RedisCluster,
}

impl Default for CacheType {
    fn default() -> Self {
        CacheType::Unknown
    }
}
