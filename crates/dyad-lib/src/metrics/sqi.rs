use crate::error::AnalysisError;
use crate::params::QualityApproach;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Overall verdict of a categorical quality index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityLabel {
    Unacceptable,
    BarelyAcceptable,
    Excellent,
}

impl QualityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::Unacceptable => "Unacceptable",
            QualityLabel::BarelyAcceptable => "Barely acceptable",
            QualityLabel::Excellent => "Excellent",
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal quality of an ECG trace: either one score per sample or one label for the
/// whole trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalQuality {
    Continuous(Vec<f64>),
    Categorical(QualityLabel),
}

impl SignalQuality {
    /// Restrict to the samples in `range`. A categorical label covers any excerpt.
    pub fn slice(&self, range: Range<usize>) -> SignalQuality {
        match self {
            SignalQuality::Continuous(values) => SignalQuality::Continuous(values[range].to_vec()),
            SignalQuality::Categorical(label) => SignalQuality::Categorical(*label),
        }
    }

    /// Per-sample score, when the quality is continuous.
    pub fn value_at(&self, row: usize) -> Option<f64> {
        match self {
            SignalQuality::Continuous(values) => values.get(row).copied(),
            SignalQuality::Categorical(_) => None,
        }
    }

    /// Text rendering of the quality at `row` for tabular export.
    pub fn cell(&self, row: usize) -> String {
        match self {
            SignalQuality::Continuous(_) => self
                .value_at(row)
                .map(|v| v.to_string())
                .unwrap_or_default(),
            SignalQuality::Categorical(label) => label.to_string(),
        }
    }

    pub fn mean(&self) -> Option<f64> {
        match self {
            SignalQuality::Continuous(values) if !values.is_empty() => {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
            _ => None,
        }
    }
}

const QRS_BEFORE_S: f64 = 0.35;
const QRS_AFTER_S: f64 = 0.5;

/// Per-sample quality from the correlation distance of every beat to the average
/// beat template, rescaled so the closest beat scores 1 and the farthest 0.
/// Each sample holds the score of the latest beat at or before it.
pub fn average_qrs_quality(
    clean: &[f64],
    peaks: &[usize],
    fs: f64,
) -> Result<Vec<f64>, AnalysisError> {
    if clean.is_empty() {
        return Err(AnalysisError::EmptySignal);
    }
    if peaks.is_empty() {
        return Err(AnalysisError::InsufficientBeats {
            found: 0,
            required: 1,
        });
    }
    let before = (QRS_BEFORE_S * fs).round() as usize;
    let after = (QRS_AFTER_S * fs).round() as usize;
    let epochs: Vec<Vec<f64>> = peaks
        .iter()
        .map(|&peak| {
            (0..before + after)
                .map(|k| {
                    (peak + k)
                        .checked_sub(before)
                        .and_then(|i| clean.get(i))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect()
        })
        .collect();

    let mut template = vec![0.0; before + after];
    for epoch in &epochs {
        for (acc, x) in template.iter_mut().zip(epoch) {
            *acc += x;
        }
    }
    for acc in template.iter_mut() {
        *acc /= epochs.len() as f64;
    }

    let distances: Vec<f64> = epochs
        .iter()
        .map(|epoch| 1.0 - pearson(epoch, &template))
        .collect();
    let min = distances.iter().copied().fold(f64::INFINITY, f64::min);
    let max = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let beat_quality: Vec<f64> = distances
        .iter()
        .map(|d| {
            if max - min > f64::EPSILON {
                1.0 - (d - min) / (max - min)
            } else {
                1.0
            }
        })
        .collect();

    let mut quality = Vec::with_capacity(clean.len());
    let mut beat = 0;
    for i in 0..clean.len() {
        while beat + 1 < peaks.len() && peaks[beat + 1] <= i {
            beat += 1;
        }
        quality.push(beat_quality[beat]);
    }
    Ok(quality)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// The three indices fused by the Zhao (2018) classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZhaoIndices {
    /// Power ratio 5-15 Hz over 5-40 Hz.
    pub p_sqi: f64,
    /// Kurtosis of the trace.
    pub k_sqi: f64,
    /// One minus the power ratio 0-1 Hz over 0-40 Hz.
    pub bas_sqi: f64,
}

pub fn zhao2018_indices(clean: &[f64], fs: f64) -> Result<ZhaoIndices, AnalysisError> {
    if clean.is_empty() {
        return Err(AnalysisError::EmptySignal);
    }
    let (freqs, powers) = power_spectrum(clean, fs)?;
    let band = |low: f64, high: f64| -> f64 {
        freqs
            .iter()
            .zip(&powers)
            .filter(|(f, _)| **f >= low && **f < high)
            .map(|(_, p)| *p)
            .sum()
    };
    Ok(ZhaoIndices {
        p_sqi: band(5.0, 15.0) / band(5.0, 40.0),
        k_sqi: compute_kurtosis(clean),
        bas_sqi: 1.0 - band(0.0, 1.0) / band(0.0, 40.0),
    })
}

pub fn zhao2018_quality(
    clean: &[f64],
    fs: f64,
    approach: QualityApproach,
) -> Result<QualityLabel, AnalysisError> {
    let indices = zhao2018_indices(clean, fs)?;
    Ok(match approach {
        QualityApproach::Simple => fuse_simple(&indices),
        QualityApproach::Fuzzy => fuse_fuzzy(&indices),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rating {
    Optimal,
    Suspicious,
    Unqualified,
}

fn rate_p(p: f64) -> Rating {
    if (0.5..=0.8).contains(&p) {
        Rating::Optimal
    } else if (0.4..0.5).contains(&p) || (p > 0.8 && p <= 0.9) {
        Rating::Suspicious
    } else {
        Rating::Unqualified
    }
}

fn rate_k(k: f64) -> Rating {
    if k > 5.0 {
        Rating::Optimal
    } else {
        Rating::Unqualified
    }
}

fn rate_bas(b: f64) -> Rating {
    if b >= 0.95 {
        Rating::Optimal
    } else if b >= 0.9 {
        Rating::Suspicious
    } else {
        Rating::Unqualified
    }
}

/// Rule vote: excellent when every index is optimal, unacceptable when two or more
/// are unqualified.
pub fn fuse_simple(indices: &ZhaoIndices) -> QualityLabel {
    let ratings = [
        rate_p(indices.p_sqi),
        rate_k(indices.k_sqi),
        rate_bas(indices.bas_sqi),
    ];
    let unqualified = ratings.iter().filter(|r| **r == Rating::Unqualified).count();
    if ratings.iter().all(|r| *r == Rating::Optimal) {
        QualityLabel::Excellent
    } else if unqualified >= 2 {
        QualityLabel::Unacceptable
    } else {
        QualityLabel::BarelyAcceptable
    }
}

const FUZZY_WEIGHTS: [f64; 3] = [0.4, 0.4, 0.2];

fn ramp(x: f64, from: f64, to: f64) -> f64 {
    ((x - from) / (to - from)).clamp(0.0, 1.0)
}

fn trapezoid(x: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    ramp(x, a, b).min(1.0 - ramp(x, c, d))
}

/// Memberships (optimal, suspicious, unqualified) summing to one.
fn memberships(optimal: f64, unqualified: f64) -> [f64; 3] {
    let suspicious = (1.0 - optimal - unqualified).max(0.0);
    [optimal, suspicious, unqualified]
}

fn membership_p(p: f64) -> [f64; 3] {
    if !p.is_finite() {
        return [0.0, 0.0, 1.0];
    }
    memberships(
        trapezoid(p, 0.4, 0.5, 0.8, 0.9),
        1.0 - trapezoid(p, 0.3, 0.4, 0.9, 1.0),
    )
}

fn membership_k(k: f64) -> [f64; 3] {
    if !k.is_finite() {
        return [0.0, 0.0, 1.0];
    }
    memberships(ramp(k, 4.0, 5.0), 1.0 - ramp(k, 3.0, 4.0))
}

fn membership_bas(b: f64) -> [f64; 3] {
    if !b.is_finite() {
        return [0.0, 0.0, 1.0];
    }
    memberships(ramp(b, 0.9, 0.95), 1.0 - ramp(b, 0.85, 0.9))
}

/// Weighted fuzzy evaluation: the membership matrix is collapsed with fixed index
/// weights and scored 1 (optimal) to 3 (unqualified).
pub fn fuse_fuzzy(indices: &ZhaoIndices) -> QualityLabel {
    let rows = [
        membership_p(indices.p_sqi),
        membership_k(indices.k_sqi),
        membership_bas(indices.bas_sqi),
    ];
    let mut evaluation = [0.0; 3];
    for (weight, row) in FUZZY_WEIGHTS.iter().zip(&rows) {
        for (acc, m) in evaluation.iter_mut().zip(row) {
            *acc += weight * m;
        }
    }
    let score: f64 = evaluation
        .iter()
        .enumerate()
        .map(|(grade, s)| (grade + 1) as f64 * s)
        .sum();
    if score < 1.5 {
        QualityLabel::Excellent
    } else if score < 2.4 {
        QualityLabel::BarelyAcceptable
    } else {
        QualityLabel::Unacceptable
    }
}

pub fn compute_kurtosis(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.iter().copied().sum::<f64>() / data.len() as f64;
    let m2 = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / data.len() as f64;
    if m2 == 0.0 {
        return 0.0;
    }
    let m4 = data.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / data.len() as f64;
    m4 / (m2 * m2)
}

/// One-sided power spectrum of the mean-removed trace.
fn power_spectrum(data: &[f64], fs: f64) -> Result<(Vec<f64>, Vec<f64>), AnalysisError> {
    let n = data.len();
    let mean = data.iter().sum::<f64>() / n as f64;
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer: Vec<f64> = data.iter().map(|x| x - mean).collect();
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut buffer, &mut spectrum)
        .map_err(|e| AnalysisError::Numerical(e.to_string()))?;
    let freqs = (0..spectrum.len())
        .map(|k| k as f64 * fs / n as f64)
        .collect();
    let powers = spectrum.iter().map(|c| c.norm_sqr()).collect();
    Ok((freqs, powers))
}
