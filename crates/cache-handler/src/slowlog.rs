use cache_proto::Message;

/// Where a Message goes once its total duration exceeds the configured
/// threshold (spec §4.E step 7). Persistence/aggregation of slow entries is
/// out of scope (spec §1); the only collaborator this crate ships logs one
/// structured line per entry.
pub trait SlowlogSink: Send + Sync {
    fn record(&self, msg: &Message);
}

/// Default `SlowlogSink`: one `tracing::warn!` per slow Message.
#[derive(Default)]
pub struct TracingSlowlogSink;

impl SlowlogSink for TracingSlowlogSink {
    fn record(&self, msg: &Message) {
        tracing::warn!(
            cache_type = ?msg.cache_type(),
            total_us = ?msg.total_duration().map(|d| d.as_micros()),
            remote_us = ?msg.remote_duration().map(|d| d.as_micros()),
            wait_write_us = ?msg.wait_write_duration().map(|d| d.as_micros()),
            "slow request"
        );
    }
}
