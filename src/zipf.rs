use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Fewest distinct tokens for which a rank/frequency line is defined
pub const MIN_TYPES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedToken {
    pub token: String,
    pub frequency: u64,
}

/// Least-squares fit of ln(frequency) against ln(rank)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipfFit {
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    /// Tokens by descending frequency, ties in order of first appearance
    pub ranked: Vec<RankedToken>,
}

impl ZipfFit {
    pub fn types(&self) -> usize {
        self.ranked.len()
    }
}

/// Summary columns; all `None` when the vocabulary is too small to fit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ZipfSummary {
    pub slope: Option<f64>,
    pub r2: Option<f64>,
    pub types: Option<usize>,
}

impl From<&ZipfFit> for ZipfSummary {
    fn from(fit: &ZipfFit) -> Self {
        Self {
            slope: Some(fit.slope),
            r2: Some(fit.r2),
            types: Some(fit.types()),
        }
    }
}

pub fn rank_frequencies<I, S>(tokens: I) -> Vec<RankedToken>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    for token in tokens {
        let token = token.as_ref();
        match counts.get_mut(token) {
            Some(count) => *count += 1,
            None => {
                counts.insert(token.to_string(), 1);
                order.push(token.to_string());
            }
        }
    }

    let mut ranked: Vec<RankedToken> = order
        .into_iter()
        .map(|token| RankedToken {
            frequency: counts[&token],
            token,
        })
        .collect();
    // stable sort keeps first-appearance order among equal frequencies
    ranked.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    ranked
}

pub fn fit<I, S>(tokens: I) -> Option<ZipfFit>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let ranked = rank_frequencies(tokens);
    if ranked.len() < MIN_TYPES {
        debug!(types = ranked.len(), "insufficient variety for a Zipf fit");
        return None;
    }

    let log_ranks: Vec<f64> = (1..=ranked.len()).map(|r| (r as f64).ln()).collect();
    let log_freqs: Vec<f64> = ranked.iter().map(|t| (t.frequency as f64).ln()).collect();
    let (slope, intercept, r2) = least_squares(&log_ranks, &log_freqs);

    Some(ZipfFit {
        slope,
        intercept,
        r2,
        ranked,
    })
}

/// Summary columns for an optional fit; all `None` when there is no fit
pub fn summarize(fit: Option<&ZipfFit>) -> ZipfSummary {
    fit.map(ZipfSummary::from).unwrap_or_default()
}

/// Returns (slope, intercept, R²). R² is 0 when `ys` has no variance.
fn least_squares(xs: &[f64], ys: &[f64]) -> (f64, f64, f64) {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    let sxy: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    (slope, intercept, r2)
}
