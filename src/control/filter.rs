//! Moving-average filter over raw ADC codes.

/// The default (and largest supported) window capacity.
pub const MAX_WINDOW_LENGTH: usize = 16;

/// A moving average over the last `window_length` samples.
///
/// Keeps a running sum, so that each update is O(1). The capacity `N` bounds the window length.
#[derive(Debug, Clone)]
pub struct MovingAverage<const N: usize = MAX_WINDOW_LENGTH> {
    /// The number of samples that are averaged, in `1..=N`.
    window_length: usize,
    /// Sample history, of which the first `window_length` entries are in use.
    history: [u32; N],
    /// The sum over the active history.
    sum: u64,
    /// The next history slot to overwrite.
    cursor: usize,
}

impl<const N: usize> MovingAverage<N> {
    /// Create a filter with zeroed history.
    ///
    /// The window length is clamped into `1..=N`.
    pub fn new(window_length: usize) -> Self {
        const { assert!(N > 0, "the filter needs at least one history slot") };

        let mut filter = Self {
            window_length: 1,
            history: [0; N],
            sum: 0,
            cursor: 0,
        };
        filter.init(window_length);
        filter
    }

    /// Reset the history to zero and select a new window length.
    pub fn init(&mut self, window_length: usize) {
        self.window_length = window_length.clamp(1, N);
        self.history = [0; N];
        self.sum = 0;
        self.cursor = 0;
    }

    /// Add a sample and return the new average (truncated).
    pub fn compute(&mut self, raw: u32) -> u32 {
        let evicted = core::mem::replace(&mut self.history[self.cursor], raw);
        self.sum = self.sum + u64::from(raw) - u64::from(evicted);

        self.cursor += 1;
        if self.cursor >= self.window_length {
            self.cursor = 0;
        }

        self.value()
    }

    /// Fill the whole window with one value.
    ///
    /// Used after power-on, so that the output does not ramp up from zero.
    pub fn set_value(&mut self, value: u32) {
        self.history[..self.window_length].fill(value);
        self.sum = u64::from(value) * self.window_length as u64;
        self.cursor = 0;
    }

    /// The current average.
    pub fn value(&self) -> u32 {
        (self.sum / self.window_length as u64) as u32
    }

    /// The number of averaged samples.
    pub fn window_length(&self) -> usize {
        self.window_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_sum<const N: usize>(filter: &MovingAverage<N>) -> u64 {
        filter.history[..filter.window_length]
            .iter()
            .map(|&x| u64::from(x))
            .sum()
    }

    #[test]
    fn converges_after_one_window() {
        let mut filter: MovingAverage = MovingAverage::new(4);

        let outputs: [u32; 4] = core::array::from_fn(|_| filter.compute(1000));
        assert_eq!(outputs, [250, 500, 750, 1000]);
        assert_eq!(filter.compute(1000), 1000);
    }

    #[test]
    fn average_truncates() {
        let mut filter: MovingAverage = MovingAverage::new(2);
        filter.compute(3);
        assert_eq!(filter.compute(4), 3);
    }

    #[test]
    fn set_value_skips_ramp_up() {
        let mut filter: MovingAverage = MovingAverage::new(8);
        filter.set_value(2048);
        assert_eq!(filter.value(), 2048);
        assert_eq!(filter.compute(2048), 2048);
        assert_eq!(filter.compute(2056), 2049);
    }

    #[test]
    fn window_is_clamped() {
        let filter: MovingAverage<4> = MovingAverage::new(0);
        assert_eq!(filter.window_length(), 1);

        let filter: MovingAverage<4> = MovingAverage::new(100);
        assert_eq!(filter.window_length(), 4);
    }

    #[test]
    fn sum_tracks_history() {
        let mut filter: MovingAverage = MovingAverage::new(5);
        let mut sample = 17u32;

        for _ in 0..100 {
            sample = sample.wrapping_mul(1103515245).wrapping_add(12345) % 4096;
            filter.compute(sample);

            assert_eq!(filter.sum, history_sum(&filter));
            assert!(filter.cursor < filter.window_length);
        }
    }

    #[test]
    fn window_of_one_passes_through() {
        let mut filter: MovingAverage = MovingAverage::new(1);
        for raw in [5, 4095, 0, 17] {
            assert_eq!(filter.compute(raw), raw);
        }
    }
}
