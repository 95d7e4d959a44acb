/// Upper bounds, in seconds, of the duration buckets.
pub const DURATION_BUCKETS: [f64; 6] = [0.5, 1.0, 2.0, 4.0, 8.0, 16.0];

/// Cumulative histogram over a fixed bucket ladder.
///
/// `counts[i]` is the number of samples `<= bounds[i]`; samples above the
/// last bound only show up in `count` (the implicit `+Inf` bucket).
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    bounds: &'static [f64],
    counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl Histogram {
    pub fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            counts: vec![0; bounds.len()],
            count: 0,
            sum: 0.0,
        }
    }

    pub fn durations() -> Self {
        Self::new(&DURATION_BUCKETS)
    }

    pub fn observe(&mut self, value: f64) {
        for (bound, slot) in self.bounds.iter().zip(self.counts.iter_mut()) {
            if value <= *bound {
                *slot += 1;
            }
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn from_samples(bounds: &'static [f64], samples: impl IntoIterator<Item = f64>) -> Self {
        let mut h = Self::new(bounds);
        for s in samples {
            h.observe(s);
        }
        h
    }

    /// `(upper bound, cumulative count)` pairs in ascending bound order.
    pub fn buckets(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.bounds.iter().copied().zip(self.counts.iter().copied())
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }
}
