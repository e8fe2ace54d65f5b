/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Distribution statistics computed from timer samples

use serde::{Deserialize, Serialize};

/// Statistics derived from the samples of one timer within a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerStats {
    /// Smallest sample
    pub min: f64,

    /// Largest sample
    pub max: f64,

    /// Number of samples
    pub count: f64,

    /// Arithmetic mean
    pub average: f64,

    /// Population standard deviation
    pub std_dev: f64,

    /// 50th percentile
    pub median: f64,

    /// 95th percentile
    pub upper_95: f64,
}

impl TimerStats {
    /// Computes statistics over `samples`, or `None` if there are none.
    ///
    /// The input is not reordered; a sorted copy is used for rank statistics.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable_by(f64::total_cmp);

        let count = sorted.len() as f64;
        let average = sorted.iter().sum::<f64>() / count;
        let variance = sorted
            .iter()
            .map(|sample| (sample - average).powi(2))
            .sum::<f64>()
            / count;

        Some(Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            count,
            average,
            std_dev: variance.sqrt(),
            median: percentile(&sorted, 0.5),
            upper_95: percentile(&sorted, 0.95),
        })
    }

    /// Named fields in output order, as `(suffix, value)` pairs
    pub fn fields(&self) -> [(&'static str, f64); 7] {
        [
            ("min", self.min),
            ("max", self.max),
            ("count", self.count),
            ("average", self.average),
            ("std_dev", self.std_dev),
            ("median", self.median),
            ("upper_95", self.upper_95),
        ]
    }
}

/// Percentile at rank `floor(len * p)` of an ascending, non-empty slice.
///
/// Even-length series average the two samples around the rank.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty() && (0.0..1.0).contains(&p));

    let len = sorted.len();
    let index = ((len as f64 * p).floor() as usize).min(len - 1);

    if len % 2 == 0 && index > 0 {
        (sorted[index - 1] + sorted[index]) / 2.0
    } else {
        sorted[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-8;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPSILON,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_odd_series() {
        let stats = TimerStats::from_samples(&[3.0, 1.0, 5.0, 2.0, 4.0]).unwrap();

        assert_close(stats.min, 1.0);
        assert_close(stats.max, 5.0);
        assert_close(stats.count, 5.0);
        assert_close(stats.average, 3.0);
        assert_close(stats.std_dev, 2.0_f64.sqrt());
        assert_close(stats.median, 3.0);
        assert_close(stats.upper_95, 5.0);
    }

    #[test]
    fn test_even_series() {
        let stats = TimerStats::from_samples(&[4.0, 1.0, 3.0, 2.0]).unwrap();

        assert_close(stats.median, 2.5);
        // floor(4 * 0.95) = 3, averaged with its predecessor
        assert_close(stats.upper_95, 3.5);
        assert_close(stats.std_dev, 1.25_f64.sqrt());
    }

    #[test]
    fn test_single_sample() {
        let stats = TimerStats::from_samples(&[7.5]).unwrap();

        assert_close(stats.min, 7.5);
        assert_close(stats.max, 7.5);
        assert_close(stats.count, 1.0);
        assert_close(stats.std_dev, 0.0);
        assert_close(stats.median, 7.5);
        assert_close(stats.upper_95, 7.5);
    }

    #[test]
    fn test_two_samples() {
        let stats = TimerStats::from_samples(&[10.0, 20.0]).unwrap();

        assert_close(stats.median, 15.0);
        assert_close(stats.upper_95, 15.0);
    }

    #[test]
    fn test_empty_series() {
        assert_eq!(TimerStats::from_samples(&[]), None);
    }

    #[test]
    fn test_input_not_reordered() {
        let samples = vec![3.0, 1.0, 2.0];
        TimerStats::from_samples(&samples).unwrap();
        assert_eq!(samples, vec![3.0, 1.0, 2.0]);
    }
}
