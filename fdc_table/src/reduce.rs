//! Reduction of a raw heating-run sample stream to interpolation anchors.
//!
//! A live run produces noisy, occasionally non-monotonic frame temperatures.
//! The reducer collapses them onto the step grid and keeps the first sample
//! per bucket, assuming a single continuous heating direction.

use tracing::debug;

use crate::quantize::quantize;

/// Ordered `(temperature, payload)` sequence with unique, strictly
/// increasing temperatures. The invariant is enforced on insertion rather
/// than checked after the fact.
#[derive(Clone, Debug, Default)]
pub struct Series<T> {
    entries: Vec<(f64, T)>,
}

impl<T> Series<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry; rejected (returning `false`) unless `temp` exceeds
    /// the current maximum.
    pub fn push(&mut self, temp: f64, value: T) -> bool {
        match self.entries.last() {
            Some(&(last, _)) if temp <= last => false,
            _ => {
                self.entries.push((temp, value));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> {
        self.entries.iter().map(|(t, v)| (*t, v))
    }

    pub fn temps(&self) -> Vec<f64> {
        self.entries.iter().map(|(t, _)| *t).collect()
    }

    pub fn first(&self) -> Option<&(f64, T)> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&(f64, T)> {
        self.entries.last()
    }

    pub fn into_entries(self) -> Vec<(f64, T)> {
        self.entries
    }
}

/// Collapse `(frame_temp, payload)` samples (in timestamp order) onto the
/// `step` grid. First occurrence per bucket wins; samples at or below the
/// running maximum are dropped.
pub fn reduce<T>(samples: impl IntoIterator<Item = (f64, T)>, step: f64) -> Series<T> {
    let mut series = Series::new();
    for (raw_temp, value) in samples {
        let temp = quantize(raw_temp, step);
        if !series.push(temp, value) {
            let max = series.last().map(|(t, _)| *t).unwrap_or(f64::NAN);
            if temp == max {
                debug!(temp, raw_temp, "duplicate temperature bucket, keeping first sample");
            } else {
                debug!(temp, raw_temp, max, "non-monotonic sample dropped");
            }
        }
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_strictly_increasing_and_unique() {
        let temps = [20.02, 20.04, 19.3, 20.51, 20.49, 21.0, 20.8, 22.3];
        let reduced = reduce(temps.iter().map(|&t| (t, ())), 0.1);
        let keys = reduced.temps();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keys, vec![20.0, 20.5, 21.0, 22.3]);
    }

    #[test]
    fn non_monotonic_sample_is_discarded() {
        let reduced = reduce([(20.0, 'a'), (19.0, 'b'), (25.0, 'c')], 0.1);
        assert_eq!(reduced.temps(), vec![20.0, 25.0]);
    }

    #[test]
    fn reducing_a_reduced_sequence_is_a_noop() {
        let once = reduce([(20.03, 1), (21.48, 2), (23.0, 3)], 0.1);
        let again = reduce(once.iter().map(|(t, v)| (t, *v)), 0.1);
        assert_eq!(once.temps(), again.temps());
        assert_eq!(once.len(), again.len());
    }

    #[test]
    fn duplicate_bucket_keeps_first_payload() {
        let reduced = reduce([(20.01, 'a'), (20.04, 'b'), (20.6, 'c')], 0.1);
        let entries = reduced.into_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (20.0, 'a'));
        assert_eq!(entries[1], (20.6, 'c'));
    }

    #[test]
    fn empty_input_yields_empty_series() {
        let reduced = reduce(std::iter::empty::<(f64, ())>(), 0.1);
        assert!(reduced.is_empty());
    }
}
