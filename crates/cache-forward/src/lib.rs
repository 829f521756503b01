//! The forwarder contract (spec §1, §3.D, §9): the one seam the handler
//! pipeline depends on besides the codecs themselves.
//!
//! A `Forwarder` takes a batch of freshly decoded `Message`s and is
//! responsible for getting each sub-Request to a backend and filling in its
//! `reply` slot. Backend selection, connection pooling, cluster topology and
//! retries are entirely the forwarder's business — the handler never reaches
//! past this trait (spec §1: "the forwarder is a black box").
//!
//! `forward` is `async` so a real implementation can `.await` backend I/O
//! while still holding the `&mut Message` borrow it needs to write `reply`
//! and call `Done` on the sub-Request's barrier — no shared cells, no
//! unsafe, no second write-back path into `cache-proto`'s plain `Request`
//! type. It must not block the calling task on anything other than the
//! backend round-trip itself: a forwarder that wants to overlap many
//! sub-Requests should drive them concurrently inside this one call (e.g.
//! with `futures::future::join_all`), not serialize them.
//!
//! A forwarder must never let a sub-Request's barrier slot go unresolved: if
//! it cannot deliver a sub-Request, it sets a terminal `ProtoError` on that
//! Request and still counts it down, or the handler hangs waiting on the
//! barrier forever (spec §5).
//!
//! A codec may answer a sub-Request itself at decode time without ever
//! meaning to forward it (a `PING` short-circuit, an unsupported command
//! rejected up front) — its `reply` is already `Some` by the time `forward`
//! sees it. `Message::next_req` already counted it into the barrier, so a
//! forwarder must still call `Done` for it; it must not re-dispatch it or
//! overwrite the reply the codec already set.

use async_trait::async_trait;
use cache_proto::Message;

/// Delivers a batch of Messages to backends and fills in their replies.
///
/// Implementors are handed out as `Arc<dyn Forwarder>` and shared across
/// every connection's handler task, so state that needs mutation (pools,
/// topology caches) must be internally synchronized.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Dispatches every sub-Request in `batch` to its backend and resolves
    /// each one's `CompletionBarrier` slot before returning. The handler
    /// calls `barrier.wait()` on each Message right after this returns;
    /// for a forwarder that completes eagerly (as both reference
    /// implementations in this workspace do) that wait is then an
    /// immediate no-op, but the handler still goes through it so a
    /// forwarder that genuinely defers completion past this call (e.g. by
    /// spawning a task that counts the barrier down later) is equally
    /// well-formed.
    async fn forward(&self, batch: &mut [Message]);
}
