use std::time::{Duration, Instant};

// Windowed event-rate accumulator. Counts added within a window are turned
// into a rate when the window rolls over; rolled rates feed lifetime mean,
// median and variance.
pub struct RateCounter {
    window: Duration,
    begin: Option<Instant>,
    count: u64,
    last: f64,
    samples: Vec<f64>,
    mean: f64,
    m2: f64,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        RateCounter {
            window,
            begin: None,
            count: 0,
            last: 0.0,
            samples: vec![],
            mean: 0.0,
            m2: 0.0,
        }
    }

    // Adds `n` events at time `now`. Returns true when this call closed a
    // window, making a new rate observable through `last()`.
    pub fn timed_add(&mut self, n: u64, now: Instant) -> bool {
        let begin = match self.begin {
            None => {
                self.begin = Some(now);
                self.count = n;
                return false;
            }
            Some(begin) => begin,
        };
        let elapsed = now - begin;
        if elapsed < self.window {
            self.count += n;
            return false;
        }
        let rate = self.count as f64 / elapsed.as_secs_f64();
        self.record(rate);
        self.last = rate;
        self.begin = Some(now);
        self.count = n;
        true
    }

    pub fn last(&self) -> f64 {
        self.last
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn median(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorted[sorted.len() / 2]
    }

    pub fn std_dev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.m2 / self.samples.len() as f64).sqrt()
    }

    fn record(&mut self, rate: f64) {
        self.samples.push(rate);
        let delta = rate - self.mean;
        self.mean += delta / self.samples.len() as f64;
        self.m2 += delta * (rate - self.mean);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_window_accumulates_silently() {
        let mut rate = RateCounter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(!rate.timed_add(10, t0));
        assert!(!rate.timed_add(10, t0 + Duration::from_millis(500)));
        assert_eq!(rate.last(), 0.0);
    }

    #[test]
    fn window_rollover_yields_rate() {
        let mut rate = RateCounter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        rate.timed_add(100, t0);
        rate.timed_add(100, t0 + Duration::from_millis(10));
        assert!(rate.timed_add(1, t0 + Duration::from_secs(2)));
        // 200 events over two seconds.
        assert!((rate.last() - 100.0).abs() < 1.0);
    }

    #[test]
    fn lifetime_statistics() {
        let mut rate = RateCounter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        rate.timed_add(100, t0);
        for i in 1..=3 {
            rate.timed_add(100, t0 + Duration::from_secs(i));
        }
        // Three closed windows of ~100 events/sec each.
        assert!((rate.mean() - 100.0).abs() < 1.0);
        assert!((rate.median() - 100.0).abs() < 1.0);
        assert!(rate.std_dev() < 1.0);
    }
}
