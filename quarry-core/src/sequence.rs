//! Shared write-sequence generator

use std::sync::atomic::{AtomicU64, Ordering};

use crate::identity::Sequence;

/// Process-wide monotonic counter ordering cache writes.
///
/// One generator is shared (behind an `Arc`) by every cached model so that
/// sequence numbers stay comparable across entity types. `next` is lock-free
/// and returns strictly increasing values across threads.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    /// Create a generator whose first value is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose first value is `start`.
    pub fn starting_at(start: Sequence) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Take the next sequence number.
    pub fn next(&self) -> Sequence {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The value the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> Sequence {
        self.next.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_is_monotonic() {
        let seq = SequenceGenerator::starting_at(10);
        assert_eq!(seq.next(), 10);
        assert_eq!(seq.next(), 11);
        assert_eq!(seq.peek(), 12);
    }

    #[test]
    fn test_sequence_unique_across_threads() {
        let seq = Arc::new(SequenceGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                thread::spawn(move || {
                    let mut taken = Vec::with_capacity(1000);
                    for _ in 0..1000 {
                        taken.push(seq.next());
                    }
                    taken
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let taken = handle.join().unwrap();
            // strictly increasing within each thread
            assert!(taken.windows(2).all(|w| w[0] < w[1]));
            all.extend(taken);
        }
        assert_eq!(all.len(), 8000);
        assert_eq!(seq.peek(), 8000);
    }
}
