//! Transaction id allocation
//!
//! The id space is cut into one disjoint range per executor so executors
//! never hand out the same id without talking to each other.

use crate::types::TxnId;

pub trait TxnIdGenerator: Send {
    fn generate_id(&mut self) -> TxnId;
}

/// Counts through `[start, start + interval)` and wraps
#[derive(Debug, Clone)]
pub struct SimpleTxnIdGenerator {
    start: TxnId,
    end: TxnId,
    next: TxnId,
}

impl SimpleTxnIdGenerator {
    pub fn new(executor_id: usize, interval: TxnId) -> Self {
        let start = interval.saturating_mul(executor_id as TxnId);
        Self {
            start,
            end: start.saturating_add(interval),
            next: start,
        }
    }

    pub fn range(&self) -> (TxnId, TxnId) {
        (self.start, self.end)
    }
}

impl TxnIdGenerator for SimpleTxnIdGenerator {
    fn generate_id(&mut self) -> TxnId {
        self.next += 1;
        if self.next >= self.end {
            self.next = self.start;
        }
        self.next
    }
}

/// Splits the whole id space evenly between `executor_count` executors
#[derive(Debug, Clone, Copy)]
pub struct SimpleTxnIdGeneratorFactory {
    interval: TxnId,
}

impl SimpleTxnIdGeneratorFactory {
    pub fn new(executor_count: usize) -> Self {
        Self {
            interval: TxnId::MAX / executor_count.max(1) as TxnId,
        }
    }

    pub fn create(&self, executor_id: usize) -> SimpleTxnIdGenerator {
        SimpleTxnIdGenerator::new(executor_id, self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_inside_range() {
        let mut ids = SimpleTxnIdGenerator::new(2, 4);
        let seq: Vec<_> = (0..6).map(|_| ids.generate_id()).collect();
        assert_eq!(seq, vec![9, 10, 11, 8, 9, 10]);
    }

    #[test]
    fn test_factory_ranges_are_disjoint() {
        let factory = SimpleTxnIdGeneratorFactory::new(3);
        let ranges: Vec<_> = (0..3).map(|i| factory.create(i).range()).collect();
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert!(ranges[2].1 <= TxnId::MAX);

        let mut last = factory.create(2);
        assert!(last.generate_id() > ranges[1].1);
    }
}
