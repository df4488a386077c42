use hdrhistogram::Histogram;

/// Trend values are stored in the histogram in thousandths of their unit, so millisecond
/// latencies keep microsecond resolution.
const SCALE: f64 = 1000.0;

/// Largest representable value: one hour expressed in milliseconds, scaled.
const HIGHEST: u64 = 3_600_000_000;

fn new_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(1, HIGHEST, 3) {
        Ok(h) => h,
        // Bounds are constants that hdrhistogram accepts.
        Err(err) => unreachable!("invalid histogram bounds: {err}"),
    }
}

/// Distribution of a trend metric.
///
/// `count`, `sum`, `min` and `max` are exact. Percentiles come from a 3-significant-digit HDR
/// histogram (at most 0.1% relative error) and are clamped into `[min, max]`, which keeps them
/// monotonic and makes `p100 == max`.
#[derive(Debug, Clone)]
pub struct TrendValue {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    hist: Histogram<u64>,
}

impl Default for TrendValue {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            hist: new_histogram(),
        }
    }
}

impl TrendValue {
    /// Non-finite values are dropped. Negative values keep exact min/avg but land in the
    /// lowest histogram bucket.
    pub fn record(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        self.count = self.count.saturating_add(1);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let scaled = (value.max(0.0) * SCALE).round() as u64;
        self.hist.saturating_record(scaled.min(HIGHEST));
    }

    pub fn merge(&mut self, other: &TrendValue) {
        if other.count == 0 {
            return;
        }
        self.count = self.count.saturating_add(other.count);
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        // Both sides share the same bounds, so addition cannot run out of range.
        let _ = self.hist.add(&other.hist);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn med(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// `p` is in percent. Values at or above 100 return the exact maximum.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 || p.is_nan() {
            return None;
        }
        if p >= 100.0 {
            return Some(self.max);
        }
        if p <= 0.0 {
            return Some(self.min);
        }
        let raw = self.hist.value_at_percentile(p) as f64 / SCALE;
        Some(raw.clamp(self.min, self.max))
    }
}
