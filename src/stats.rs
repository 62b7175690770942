//! Completion-time histogram.

/// At most this many buckets are drawn.
pub const MAX_BUCKETS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub bucket_size: f64,
    pub counts: Vec<usize>,
    /// Bucket holding the caller's own time, when it falls inside the range.
    pub user_bucket: Option<usize>,
    pub samples: usize,
}

impl Histogram {
    /// `None` when there are no recorded times.
    pub fn build(times: &[f64], user_time: Option<f64>) -> Option<Self> {
        if times.is_empty() {
            return None;
        }
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let bucket_count = times.len().min(MAX_BUCKETS);
        let mut bucket_size = (max - min) / bucket_count as f64;
        if bucket_size == 0.0 || !bucket_size.is_finite() {
            bucket_size = 1.0;
        }

        let index = |t: f64| -> Option<usize> {
            let raw = ((t - min) / bucket_size).floor();
            if raw < 0.0 || !raw.is_finite() {
                return None;
            }
            Some((raw as usize).min(bucket_count - 1))
        };

        let mut counts = vec![0; bucket_count];
        for &t in times {
            if let Some(i) = index(t) {
                counts[i] += 1;
            }
        }

        Some(Self {
            min,
            max,
            bucket_size,
            counts,
            // a zero time is never highlighted
            user_bucket: user_time.filter(|&t| t != 0.0).and_then(index),
            samples: times.len(),
        })
    }

    pub fn peak(&self) -> usize {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Lower and upper bound of bucket `i` in seconds.
    pub fn range(&self, i: usize) -> (f64, f64) {
        let lo = self.min + i as f64 * self.bucket_size;
        (lo, lo + self.bucket_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_has_no_histogram() {
        assert_eq!(Histogram::build(&[], Some(3.0)), None);
    }

    #[test]
    fn test_zero_user_time_is_not_highlighted() {
        let h = Histogram::build(&[0.0, 4.0, 8.0], Some(0.0)).unwrap();
        assert_eq!(h.counts[0], 1);
        assert_eq!(h.user_bucket, None);
        let h = Histogram::build(&[0.0, 4.0, 8.0], Some(8.0)).unwrap();
        assert_eq!(h.user_bucket, Some(2));
    }

    #[test]
    fn test_identical_times_use_unit_buckets() {
        let h = Histogram::build(&[30.0, 30.0], Some(30.0)).unwrap();
        assert_eq!(h.bucket_size, 1.0);
        assert_eq!(h.counts, vec![2, 0]);
        assert_eq!(h.user_bucket, Some(0));
    }

    #[test]
    fn test_max_lands_in_last_bucket() {
        let times = [10.0, 20.0, 30.0, 40.0];
        let h = Histogram::build(&times, Some(40.0)).unwrap();
        assert_eq!(h.bucket_size, 7.5);
        assert_eq!(h.counts, vec![1, 1, 1, 1]);
        assert_eq!(h.user_bucket, Some(3));
        assert_eq!(h.range(1), (17.5, 25.0));
    }

    #[test]
    fn test_bucket_count_is_capped() {
        let times: Vec<f64> = (0..100).map(f64::from).collect();
        let h = Histogram::build(&times, None).unwrap();
        assert_eq!(h.counts.len(), MAX_BUCKETS);
        assert_eq!(h.counts.iter().sum::<usize>(), 100);
        assert_eq!(h.peak(), 5);
        assert_eq!(h.user_bucket, None);
    }

    #[test]
    fn test_faster_than_everyone_is_not_highlighted() {
        let h = Histogram::build(&[50.0, 60.0], Some(5.0)).unwrap();
        assert_eq!(h.user_bucket, None);
    }
}
