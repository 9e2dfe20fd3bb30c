//! Round-trip statistics.

use std::collections::VecDeque;

/// Average of the last `window` samples.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
}

impl MovingAverage {
    /// A zero window is treated as one.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub fn add_value(&mut self, value: f64) {
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    /// Zero until the first sample arrives.
    pub fn current_value(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        let mut avg = MovingAverage::new(3);
        assert_eq!(avg.current_value(), 0.0);
        avg.add_value(3.0);
        assert_eq!(avg.current_value(), 3.0);
        avg.add_value(6.0);
        avg.add_value(9.0);
        assert_eq!(avg.current_value(), 6.0);
        avg.add_value(12.0);
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.current_value(), 9.0);
    }

    #[test]
    fn test_zero_window() {
        let mut avg = MovingAverage::new(0);
        avg.add_value(1.0);
        avg.add_value(5.0);
        assert_eq!(avg.current_value(), 5.0);
    }
}
