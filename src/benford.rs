use serde::Serialize;

/// Degrees of freedom of the goodness-of-fit test over the nine digit bins
pub const DEGREES_OF_FREEDOM: f64 = 8.0;

/// Benford proportion `log10(1 + 1/d)` for each leading digit 1..=9
pub fn expected_proportions() -> [f64; 9] {
    std::array::from_fn(|i| (1.0 + 1.0 / (i as f64 + 1.0)).log10())
}

/// First non-zero digit of a numeric string; sign, separators, leading zeros
/// and the decimal point are skipped, and an exponent is ignored. `None` for an
/// all-zero mantissa or digitless input.
pub fn leading_digit(number: &str) -> Option<u8> {
    number
        .chars()
        .take_while(|c| !matches!(c, 'e' | 'E'))
        .filter(char::is_ascii_digit)
        .find(|&c| c != '0')
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
}

/// Observed leading-digit histogram
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigitCounts([u64; 9]);

impl DigitCounts {
    pub fn from_numbers<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts = Self::default();
        for number in numbers {
            if let Some(digit) = leading_digit(number.as_ref()) {
                counts.record(digit);
            }
        }
        counts
    }

    pub fn record(&mut self, digit: u8) {
        if (1..=9).contains(&digit) {
            self.0[usize::from(digit) - 1] += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    pub fn as_array(&self) -> [u64; 9] {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenfordSummary {
    pub observed: [u64; 9],
    pub expected: [f64; 9],
    pub total: u64,
    pub chi2: f64,
    /// `None` when built without the `p-values` feature
    pub p_value: Option<f64>,
}

pub fn analyze<I, S>(numbers: I) -> Option<BenfordSummary>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    summarize(&DigitCounts::from_numbers(numbers))
}

/// Goodness of fit of `counts` against Benford's law; `None` when nothing was observed
pub fn summarize(counts: &DigitCounts) -> Option<BenfordSummary> {
    let total = counts.total();
    if total == 0 {
        return None;
    }

    let observed = counts.as_array();
    let proportions = expected_proportions();
    let expected: [f64; 9] = std::array::from_fn(|i| proportions[i] * total as f64);
    let chi2 = chi_square(&observed, &expected);

    Some(BenfordSummary {
        observed,
        expected,
        total,
        chi2,
        p_value: upper_tail(chi2),
    })
}

/// Pearson statistic over bins with a positive expectation
pub fn chi_square(observed: &[u64; 9], expected: &[f64; 9]) -> f64 {
    observed
        .iter()
        .zip(expected)
        .filter(|(_, e)| **e > 0.0)
        .map(|(&o, &e)| (o as f64 - e).powi(2) / e)
        .sum()
}

#[cfg(feature = "p-values")]
fn upper_tail(chi2: f64) -> Option<f64> {
    use statrs::distribution::{ChiSquared, ContinuousCDF};

    ChiSquared::new(DEGREES_OF_FREEDOM)
        .ok()
        .map(|dist| dist.sf(chi2))
        .filter(|p| p.is_finite())
}

#[cfg(not(feature = "p-values"))]
fn upper_tail(_chi2: f64) -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Values spread evenly over log-space, so mantissas follow Benford exactly
    fn log_uniform_numbers(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("{}", 10f64.powf(i as f64 / n as f64)))
            .collect()
    }

    #[test]
    fn test_expected_proportions_sum_to_one() {
        let proportions = expected_proportions();
        assert!((proportions.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((proportions[0] - 0.301_029_995_663_981_2).abs() < 1e-12);
        assert!(proportions.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_leading_digit_extraction() {
        let numbers = ["123", "-45.6", "0.007", "000"];
        let digits: Vec<u8> = numbers.iter().filter_map(|n| leading_digit(n)).collect();
        assert_eq!(digits, vec![1, 4, 7]);

        let counts = DigitCounts::from_numbers(numbers);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.as_array(), [1, 0, 0, 1, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_leading_digit_edge_cases() {
        assert_eq!(leading_digit(""), None);
        assert_eq!(leading_digit("-0.000"), None);
        assert_eq!(leading_digit("1,234"), Some(1));
        assert_eq!(leading_digit("+0.9"), Some(9));
        assert_eq!(leading_digit("09"), Some(9));
        assert_eq!(leading_digit("2.5E-3"), Some(2));
        assert_eq!(leading_digit("0e5"), None);
    }

    #[test]
    fn test_benford_distributed_sequence_fits() {
        let summary = analyze(log_uniform_numbers(900)).unwrap();
        assert_eq!(summary.total, 900);
        assert!(summary.chi2 < 2.0, "chi2 = {}", summary.chi2);
        if let Some(p) = summary.p_value {
            assert!(p > 0.05, "p = {p}");
        }
    }

    #[test]
    fn test_all_nines_is_rejected() {
        let numbers: Vec<String> = (0..30).map(|i| format!("9{i}")).collect();
        let summary = analyze(&numbers).unwrap();
        assert_eq!(summary.observed[8], 30);
        assert!(summary.chi2 > 100.0, "chi2 = {}", summary.chi2);
        if let Some(p) = summary.p_value {
            assert!(p < 1e-6, "p = {p}");
        }
    }

    #[test]
    fn test_expected_counts_scale_with_total() {
        let summary = analyze(["1", "2", "3", "4"]).unwrap();
        let expected_total: f64 = summary.expected.iter().sum();
        assert!((expected_total - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_digits_means_no_summary() {
        assert!(analyze(Vec::<String>::new()).is_none());
        assert!(analyze(["0", "0.00", "-0"]).is_none());
    }

    #[cfg(feature = "p-values")]
    #[test]
    fn test_p_value_is_probability() {
        let summary = analyze(["1", "1", "2", "3", "5", "8", "13", "21", "34"]).unwrap();
        let p = summary.p_value.unwrap();
        assert!((0.0..=1.0).contains(&p));
    }
}
