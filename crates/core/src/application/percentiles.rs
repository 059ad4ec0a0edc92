// Queue wait-time percentiles.
//
// The upstream computation is numpy-backed and uses numpy's default
// "linear" interpolation between the two nearest ranks; this reproduces that
// exact method so percentile values match bit-for-bit on the same samples.

use crate::port::WaitSample;
use serde::Serialize;
use std::collections::BTreeMap;

/// Fixed set of percentiles the wait-times endpoint reports.
pub const PERCENTILES: &[f64] = &[5.0, 10.0, 50.0, 90.0, 95.0];

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueWaitStats {
    pub sample_count: usize,
    /// percentile (e.g. 50.0) -> wait time in milliseconds.
    pub percentiles: BTreeMap<String, f64>,
}

/// Linear interpolation between nearest ranks, matching `numpy.percentile`'s
/// default `method="linear"`. `values` need not be sorted on input.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// `GET /v1/queues/wait_times`: group samples per queue and compute the
/// fixed percentile set over each queue's observed wait times.
pub fn queue_wait_times(samples: &[(String, WaitSample)]) -> BTreeMap<String, QueueWaitStats> {
    let mut by_queue: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (queue, sample) in samples {
        by_queue.entry(queue.clone()).or_default().push(sample.queue_wait_ms as f64);
    }

    by_queue
        .into_iter()
        .map(|(queue, values)| {
            let mut percentiles = BTreeMap::new();
            for p in PERCENTILES {
                percentiles.insert(format!("p{}", *p as i64), percentile(&values, *p));
            }
            (
                queue,
                QueueWaitStats {
                    sample_count: values.len(),
                    percentiles,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_sample_is_the_middle_value() {
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 50.0), 2.0);
    }

    #[test]
    fn median_of_even_sample_interpolates() {
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.5);
    }

    #[test]
    fn p0_and_p100_are_the_extremes() {
        let v = [10.0, 30.0, 20.0];
        assert_eq!(percentile(&v, 0.0), 10.0);
        assert_eq!(percentile(&v, 100.0), 30.0);
    }

    #[test]
    fn empty_samples_yield_zeroed_stats() {
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn samples_are_grouped_per_queue() {
        let samples = vec![
            ("q1".to_string(), WaitSample { queue_wait_ms: 100 }),
            ("q1".to_string(), WaitSample { queue_wait_ms: 200 }),
            ("q2".to_string(), WaitSample { queue_wait_ms: 50 }),
        ];
        let stats = queue_wait_times(&samples);
        assert_eq!(stats["q1"].sample_count, 2);
        assert_eq!(stats["q2"].sample_count, 1);
    }
}
