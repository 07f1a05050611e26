// =============================================================================
// Digit Statistics — Hot/cold last-digit frequencies over the tick buffer
// =============================================================================

use serde::Serialize;

/// Frequency of one digit in the current window.
#[derive(Debug, Clone, Serialize)]
pub struct DigitFrequency {
    pub digit: u8,
    pub count: usize,
    pub pct: f64,
}

/// Per-digit breakdown of the samples in the buffer.
#[derive(Debug, Clone, Serialize)]
pub struct DigitStats {
    /// Number of samples that are integral digits 0..=9.
    pub total: usize,
    /// Samples outside the digit domain (fractional or out of range).
    pub ignored: usize,
    pub frequencies: Vec<DigitFrequency>,
    /// Most frequent digit. Lowest digit wins ties.
    pub hot: Option<u8>,
    /// Least frequent digit. Lowest digit wins ties.
    pub cold: Option<u8>,
}

impl DigitStats {
    pub fn from_values(values: &[f64]) -> Self {
        let mut counts = [0usize; 10];
        let mut ignored = 0;

        for &v in values {
            match as_digit(v) {
                Some(d) => counts[d as usize] += 1,
                None => ignored += 1,
            }
        }

        let total: usize = counts.iter().sum();
        let frequencies = counts
            .iter()
            .enumerate()
            .map(|(digit, &count)| DigitFrequency {
                digit: digit as u8,
                count,
                pct: if total > 0 {
                    count as f64 * 100.0 / total as f64
                } else {
                    0.0
                },
            })
            .collect::<Vec<_>>();

        let (hot, cold) = if total == 0 {
            (None, None)
        } else {
            let mut hot = 0usize;
            let mut cold = 0usize;
            for (digit, &count) in counts.iter().enumerate() {
                if count > counts[hot] {
                    hot = digit;
                }
                if count < counts[cold] {
                    cold = digit;
                }
            }
            (Some(hot as u8), Some(cold as u8))
        };

        Self {
            total,
            ignored,
            frequencies,
            hot,
            cold,
        }
    }
}

fn as_digit(value: f64) -> Option<u8> {
    if value.fract() == 0.0 && (0.0..=9.0).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_has_no_hot_or_cold() {
        let stats = DigitStats::from_values(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.hot.is_none());
        assert!(stats.cold.is_none());
        assert_eq!(stats.frequencies.len(), 10);
    }

    #[test]
    fn picks_hot_and_cold_digits() {
        let mut values = vec![7.0; 5];
        values.extend(std::iter::repeat(3.0).take(2));
        for d in 0..10 {
            if d != 4 {
                values.push(d as f64);
            }
        }
        let stats = DigitStats::from_values(&values);
        assert_eq!(stats.hot, Some(7));
        assert_eq!(stats.cold, Some(4));
        assert_eq!(stats.frequencies[7].count, 6);
    }

    #[test]
    fn non_digits_are_ignored() {
        let stats = DigitStats::from_values(&[1.5, 12.0, -1.0, 2.0]);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.ignored, 3);
        assert!((stats.frequencies[2].pct - 100.0).abs() < f64::EPSILON);
    }
}
