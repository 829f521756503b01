/// Tracks the carrier-batch size (`alloc` in spec §4.E) across handler
/// iterations: starts small and grows geometrically while the client keeps
/// pipelining deeply enough to fill every round, plateauing at the
/// configured maximum.
pub struct BatchSizer {
    concurrent: usize,
    max_concurrent: usize,
    current: usize,
}

impl BatchSizer {
    pub fn new(concurrent: usize, max_concurrent: usize) -> Self {
        BatchSizer {
            concurrent: concurrent.max(1),
            max_concurrent: max_concurrent.max(1),
            current: 0,
        }
    }

    /// The batch size to decode into for the next iteration.
    pub fn target(&self) -> usize {
        if self.current == 0 {
            self.concurrent
        } else {
            self.current
        }
    }

    /// Updates the target for the iteration after next, given how many
    /// Messages the just-finished iteration actually decoded against its
    /// `target`. Only a fully-populated batch below the maximum grows; a
    /// partial one holds its capacity.
    pub fn note_decoded(&mut self, decoded: usize, target: usize) {
        self.current = if decoded == target && target < self.max_concurrent {
            (target.saturating_mul(self.concurrent)).min(self.max_concurrent)
        } else {
            target
        };
    }
}
