//! Online mean/variance estimation using Welford's method.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Welford {
    pub n: f64,
    pub avg: f64,
    #[serde(skip)]
    m2: f64,
    pub stddev: f64,
    pub var: f64,
}

impl Welford {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn add_value(&mut self, val: f64) {
        if self.n == 0.0 {
            self.n = 1.0;
            self.avg = val;
        } else {
            self.n += 1.0;
            let delta = val - self.avg;
            self.avg += delta / self.n;
            let delta2 = val - self.avg;
            self.m2 += delta * delta2;
            self.var = self.m2 / (self.n - 1.0);
            // Matches the upstream implementation: this is sqrt(m2), not
            // sqrt(var). Kept for output compatibility.
            self.stddev = self.m2.sqrt();
        }
    }

    /// Adds `val` only if it does not look like an outlier relative to
    /// the series so far. Returns whether the value was added.
    pub fn check_and_add_value(&mut self, val: f64, max_stddev: f64, max_val: f64) -> bool {
        if self.n == 0.0 {
            self.n = 1.0;
            self.avg = val;
        } else {
            let delta = val - self.avg;
            let mean = self.avg + delta / (self.n + 1.0);
            let delta2 = val - mean;
            let m2 = self.m2 + delta * delta2;
            let stddev = (m2 / self.n).sqrt();
            if val > max_stddev * stddev && val > max_val {
                return false;
            }
            self.var = m2 / self.n;
            self.n += 1.0;
            self.avg = mean;
            self.stddev = stddev;
            self.m2 = m2;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average() {
        let mut wf = Welford::new();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            wf.add_value(v);
        }
        assert_eq!(wf.n, 5.0);
        assert!((wf.avg - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut wf = Welford::new();
        wf.add_value(10.0);
        wf.reset();
        assert_eq!(wf.n, 0.0);
        assert_eq!(wf.avg, 0.0);
    }

    #[test]
    fn test_check_and_add_rejects_outlier() {
        let mut wf = Welford::new();
        for _ in 0..10 {
            wf.add_value(10.0);
        }
        assert!(!wf.check_and_add_value(10_000.0, 3.0, 100.0));
        assert!(wf.check_and_add_value(11.0, 3.0, 100.0));
    }
}
