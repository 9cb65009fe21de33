//! Sliding window of playhead offsets.

/// Fixed-capacity ring of `(device position - wall clock)` samples in microseconds.
///
/// Once full, each push overwrites the oldest sample. The smoothed offset is the mean of
/// the samples currently held.
#[derive(Debug, Clone)]
pub struct OffsetWindow {
    samples: Vec<i64>,
    next: usize,
    count: usize,
    smoothed_us: i64,
}

impl OffsetWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity.max(1)],
            next: 0,
            count: 0,
            smoothed_us: 0,
        }
    }

    pub fn push(&mut self, offset_us: i64) -> i64 {
        let capacity = self.samples.len();
        self.samples[self.next] = offset_us;
        self.next = (self.next + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
        let sum: i128 = self.samples[..self.count].iter().map(|v| i128::from(*v)).sum();
        self.smoothed_us = (sum / self.count as i128) as i64;
        self.smoothed_us
    }

    pub fn smoothed_us(&self) -> i64 {
        self.smoothed_us
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.count = 0;
        self.smoothed_us = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_partial_window() {
        let mut window = OffsetWindow::new(10);
        assert!(window.is_empty());
        window.push(100);
        assert_eq!(window.push(200), 150);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn full_window_overwrites_oldest() {
        let mut window = OffsetWindow::new(3);
        for v in [10, 20, 30] {
            window.push(v);
        }
        assert_eq!(window.smoothed_us(), 20);
        // Replaces 10.
        assert_eq!(window.push(40), 30);
        assert_eq!(window.len(), 3);
        // Replaces 20.
        assert_eq!(window.push(50), 40);
    }

    #[test]
    fn negative_offsets_average() {
        let mut window = OffsetWindow::new(4);
        window.push(-1_000_000);
        window.push(-1_000_010);
        assert_eq!(window.smoothed_us(), -1_000_005);
    }

    #[test]
    fn clear_forgets_samples() {
        let mut window = OffsetWindow::new(2);
        window.push(5);
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.smoothed_us(), 0);
        assert_eq!(window.push(8), 8);
        assert_eq!(window.capacity(), 2);
    }
}
