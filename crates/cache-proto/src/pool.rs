use std::sync::Mutex;

/// A free-list of `T`s, reused across connections to avoid per-request heap
/// churn on the hot path (spec §4.B). Deliberately a plain `Mutex<Vec<_>>`
/// rather than a lock-free structure: check-out/check-in never happens
/// across an `.await` point, so there is no reason to reach for
/// `tokio::sync::Mutex` here.
pub struct Pool<T> {
    free: Mutex<Vec<Box<T>>>,
    make: fn() -> T,
}

impl<T> Pool<T> {
    pub fn new(make: fn() -> T) -> Self {
        Pool {
            free: Mutex::new(Vec::new()),
            make,
        }
    }

    /// Takes an item off the free-list, or builds a new one if it's empty.
    pub fn get(&self) -> Box<T> {
        let mut free = self.free.lock().expect("pool mutex poisoned");
        free.pop().unwrap_or_else(|| Box::new((self.make)()))
    }

    /// Returns an item to the free-list for reuse.
    pub fn put(&self, item: Box<T>) {
        let mut free = self.free.lock().expect("pool mutex poisoned");
        free.push(item);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.free.lock().expect("pool mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_type::CacheType;
    use crate::message::Message;

    #[test]
    fn get_builds_fresh_when_empty() {
        let pool: Pool<Message> = Pool::new(|| Message::new(CacheType::Redis));
        let msg = pool.get();
        assert_eq!(msg.cache_type(), CacheType::Redis);
    }

    #[test]
    fn put_then_get_reuses_the_same_allocation() {
        let pool: Pool<Message> = Pool::new(|| Message::new(CacheType::Redis));
        let msg = pool.get();
        let ptr = &*msg as *const Message;
        pool.put(msg);
        assert_eq!(pool.len(), 1);
        let msg2 = pool.get();
        assert_eq!(&*msg2 as *const Message, ptr);
        assert_eq!(pool.len(), 0);
    }
}
