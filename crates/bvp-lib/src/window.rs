//! Time-based rolling windows over sorted, possibly duplicated timestamps.
//!
//! Missing and non-finite values never contribute to a window; a window with
//! no defined values yields `None`.

use crate::signal::Micros;

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Mean over the trailing window `(t - width, t]`, ending at the current position.
pub fn trailing_mean(times: &[Micros], values: &[Option<f64>], width: Micros) -> Vec<Option<f64>> {
    debug_assert_eq!(times.len(), values.len());
    let width = width.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut start = 0usize;
    let mut acc = 0.0;
    let mut count = 0usize;
    for (i, &value) in values.iter().enumerate() {
        if let Some(v) = finite(value) {
            acc += v;
            count += 1;
        }
        while times[start] <= times[i] - width {
            if let Some(v) = finite(values[start]) {
                acc -= v;
                count -= 1;
            }
            start += 1;
        }
        if count == 0 {
            acc = 0.0;
            out.push(None);
        } else {
            out.push(Some(acc / count as f64));
        }
    }
    out
}

/// Mean over the centered window `[t - width/2, t + width/2]`.
///
/// Only defined where the whole window lies inside the recorded time span;
/// edge samples get `None`.
pub fn centered_mean(times: &[Micros], values: &[Option<f64>], width: Micros) -> Vec<Option<f64>> {
    debug_assert_eq!(times.len(), values.len());
    let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
        return Vec::new();
    };
    let half = width / 2;

    let mut sums = Vec::with_capacity(values.len() + 1);
    let mut counts = Vec::with_capacity(values.len() + 1);
    sums.push(0.0);
    counts.push(0usize);
    for value in values {
        let (s, c) = (sums[sums.len() - 1], counts[counts.len() - 1]);
        match finite(*value) {
            Some(v) => {
                sums.push(s + v);
                counts.push(c + 1);
            }
            None => {
                sums.push(s);
                counts.push(c);
            }
        }
    }

    times
        .iter()
        .map(|&t| {
            if t - half < first || t + half > last {
                return None;
            }
            let lo = times.partition_point(|&x| x < t - half);
            let hi = times.partition_point(|&x| x <= t + half);
            let n = counts[hi] - counts[lo];
            (n > 0).then(|| (sums[hi] - sums[lo]) / n as f64)
        })
        .collect()
}

/// Median over the centered window `[t - width/2, t + width/2]`, defined
/// wherever at least one value falls inside.
pub fn centered_median(times: &[Micros], values: &[Option<f64>], width: Micros) -> Vec<Option<f64>> {
    debug_assert_eq!(times.len(), values.len());
    let half = width / 2;
    let mut scratch = Vec::new();
    times
        .iter()
        .map(|&t| {
            let lo = times.partition_point(|&x| x < t - half);
            let hi = times.partition_point(|&x| x <= t + half);
            scratch.clear();
            scratch.extend(values[lo..hi].iter().filter_map(|&v| finite(v)));
            median(&mut scratch)
        })
        .collect()
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Fill gaps from the next defined value. Trailing gaps stay empty.
pub fn backfill(values: &mut [Option<f64>]) {
    let mut next = None;
    for value in values.iter_mut().rev() {
        match value {
            Some(v) => next = Some(*v),
            None => *value = next,
        }
    }
}
