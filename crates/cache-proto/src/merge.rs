/// The rule the encoder uses to combine a batch Message's sub-Request
/// replies into a single client-visible reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeType {
    /// Not a batch: the sub-Request's reply (possibly rewritten for control
    /// commands like `PING`) is emitted as-is.
    #[default]
    Single,
    /// RESP `MSET` fan-out: emit `+OK` iff every sub-Request succeeded.
    Ok,
    /// RESP `MGET` fan-out: concatenate bulk replies into one array.
    Join,
    /// RESP `DEL`/`EXISTS` fan-out: sum integer replies.
    Count,
    /// Memcache text multi-key `get`/`gets` fan-out: concatenate `VALUE`
    /// blocks, terminated by one `END`.
    McGetJoin,
}
