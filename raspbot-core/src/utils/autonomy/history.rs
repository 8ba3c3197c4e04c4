//! Rolling window of recent distance samples.

use heapless::Deque;

/// Largest smoothing window a controller can be configured with.
pub const HISTORY_CAPACITY: usize = 8;

/// Bounded FIFO of valid readings in millimeters.
///
/// Holds at most `window` samples; the oldest is evicted when a new one
/// arrives at capacity.
#[derive(Debug, Clone)]
pub struct DistanceHistory {
    samples: Deque<u16, HISTORY_CAPACITY>,
    window: usize,
}

impl DistanceHistory {
    /// `window` is clamped to `1..=HISTORY_CAPACITY`.
    pub fn new(window: usize) -> Self {
        Self {
            samples: Deque::new(),
            window: window.clamp(1, HISTORY_CAPACITY),
        }
    }

    pub fn push(
        &mut self,
        mm: u16,
    ) {
        while self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        // cannot fail: len < window <= capacity
        let _ = self.samples.push_back(mm);
    }

    /// Arithmetic mean, truncated toward zero. `None` while empty.
    pub fn mean(&self) -> Option<u16> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u32 = self.samples.iter().map(|&s| u32::from(s)).sum();
        Some((sum / self.samples.len() as u32) as u16)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}
