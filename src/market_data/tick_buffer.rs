use std::collections::VecDeque;

use tracing::warn;

use crate::types::{RawTick, Sample};

// ---------------------------------------------------------------------------
// TickBuffer -- bounded FIFO of the most recent samples
// ---------------------------------------------------------------------------

/// Ring buffer holding the most recent validated samples.
///
/// Length never exceeds `capacity`; once full, every accepted sample evicts
/// the oldest one.
#[derive(Debug, Clone)]
pub struct TickBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl TickBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Validate and append a raw tick.
    ///
    /// Non-finite values are dropped and logged. Returns `true` if the tick
    /// was accepted.
    pub fn ingest(&mut self, tick: RawTick) -> bool {
        match Sample::from_raw(tick) {
            Some(sample) => {
                self.push(sample);
                true
            }
            None => {
                warn!(
                    value = tick.value,
                    timestamp = tick.timestamp,
                    "dropping malformed tick"
                );
                false
            }
        }
    }

    /// Append a sample, returning the evicted one if the buffer was full.
    pub fn push(&mut self, sample: Sample) -> Option<Sample> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Buffered values, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn tick(value: f64) -> RawTick {
        RawTick::new(value, 0)
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut buf = TickBuffer::new(100);
        for i in 0..150 {
            assert!(buf.ingest(tick(i as f64)));
        }
        assert_eq!(buf.len(), 100);
        let values = buf.values();
        assert_eq!(values.first(), Some(&50.0));
        assert_eq!(values.last(), Some(&149.0));
    }

    #[test]
    fn push_reports_evicted_sample() {
        let mut buf = TickBuffer::new(2);
        assert!(buf.push(Sample { value: 1.0, timestamp: 1 }).is_none());
        assert!(buf.push(Sample { value: 2.0, timestamp: 2 }).is_none());
        let evicted = buf.push(Sample { value: 3.0, timestamp: 3 });
        assert_eq!(evicted.map(|s| s.value), Some(1.0));
    }

    #[test]
    fn malformed_ticks_leave_buffer_untouched() {
        let mut buf = TickBuffer::new(10);
        buf.ingest(tick(4.0));
        assert!(!buf.ingest(tick(f64::NAN)));
        assert!(!buf.ingest(tick(f64::NEG_INFINITY)));
        assert_eq!(buf.values(), vec![4.0]);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buf = TickBuffer::new(10);
        buf.ingest(tick(1.0));
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.last().is_none());
    }

    #[quickcheck]
    fn length_never_exceeds_capacity(values: Vec<f64>, capacity: u8) -> bool {
        let capacity = (capacity as usize % 16) + 1;
        let mut buf = TickBuffer::new(capacity);
        values.iter().all(|&v| {
            buf.ingest(tick(v));
            buf.len() <= capacity
        })
    }

    #[quickcheck]
    fn retains_the_newest_accepted_values_in_order(values: Vec<f64>) -> bool {
        let capacity = 8;
        let mut buf = TickBuffer::new(capacity);
        for &v in &values {
            buf.ingest(tick(v));
        }
        let accepted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        let start = accepted.len().saturating_sub(capacity);
        buf.values() == accepted[start..]
    }
}
