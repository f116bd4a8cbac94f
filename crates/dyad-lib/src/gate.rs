//! Outlier and quality screening of aggregated metrics tables. Every function
//! returns an annotated copy; rows are never dropped.

use crate::error::DyadError;
use crate::report::{Cell, MetricsTable};
use log::debug;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_Z_THRESHOLD: f64 = 1.96;
pub const DEFAULT_CV_THRESHOLD: f64 = 0.75;
pub const DEFAULT_MIN_POINTS: usize = 4;
pub const DEFAULT_PLAUSIBLE_RANGE: (f64, f64) = (9.0, 110.0);
pub const DEFAULT_GROUP_BY: &str = "segment_name";

/// Standard deviations below this count as no variability.
const MIN_SEGMENT_STD: f64 = 1e-5;

/// Statistic used to replace flagged values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputeMethod {
    Mean,
    Median,
}

impl FromStr for ImputeMethod {
    type Err = DyadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(ImputeMethod::Mean),
            "median" => Ok(ImputeMethod::Median),
            other => Err(DyadError::InvalidParameter {
                name: "method".into(),
                reason: format!("'{other}' is not one of mean, median"),
            }),
        }
    }
}

/// Flag values whose population z-score exceeds `threshold` in magnitude. Missing
/// values are always flagged; with zero spread nothing else is.
pub fn identify_outliers_zscore(values: &[Option<f64>], threshold: f64) -> Vec<bool> {
    let valid: Vec<f64> = values.iter().flatten().copied().collect();
    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let std = (valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    values
        .iter()
        .map(|value| match value {
            None => true,
            Some(_) if std == 0.0 || !std.is_finite() => false,
            Some(v) => ((v - mean) / std).abs() > threshold,
        })
        .collect()
}

/// Replace flagged positions by the mean or median of the unflagged values. When
/// every value is flagged the replacement is missing.
pub fn replace_outliers(
    values: &[Option<f64>],
    outliers: &[bool],
    method: ImputeMethod,
) -> Vec<Option<f64>> {
    let mut kept: Vec<f64> = values
        .iter()
        .zip(outliers)
        .filter(|(_, &flag)| !flag)
        .filter_map(|(v, _)| *v)
        .collect();
    let replacement = match method {
        ImputeMethod::Mean => mean(&kept),
        ImputeMethod::Median => median(&mut kept),
    };
    values
        .iter()
        .zip(outliers)
        .map(|(v, &flag)| if flag { replacement } else { *v })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Per group: add `{metric}_z_score_outlier` and `{metric}_imputed`.
pub fn identify_and_impute_outliers(
    table: &MetricsTable,
    metric: &str,
    method: ImputeMethod,
    z_threshold: f64,
    group_by: &[&str],
) -> Result<MetricsTable, DyadError> {
    let values = table.numeric_column(metric)?;
    let mut flags = vec![Cell::Missing; table.len()];
    let mut imputed = vec![Cell::Missing; table.len()];
    for rows in table.group_rows(group_by)? {
        let group: Vec<Option<f64>> = rows.iter().map(|&r| values[r]).collect();
        let outliers = identify_outliers_zscore(&group, z_threshold);
        let replaced = replace_outliers(&group, &outliers, method);
        debug!(
            "{metric}: {} of {} values flagged in group",
            outliers.iter().filter(|f| **f).count(),
            rows.len()
        );
        for ((&row, flag), value) in rows.iter().zip(outliers).zip(replaced) {
            flags[row] = Cell::Bool(flag);
            imputed[row] = value.into();
        }
    }
    table
        .with_column(&format!("{metric}_z_score_outlier"), flags)?
        .with_column(&format!("{metric}_imputed"), imputed)
}

/// Group verdict of the reliability screen.
///
/// The sample std needs two values, so a group smaller than `max(min_points, 2)` is
/// unreliable even when `min_points` is 0 or 1.
pub fn segment_is_unreliable(values: &[f64], cv_threshold: f64, min_points: usize) -> bool {
    if values.len() < min_points.max(2) {
        return true;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    let cv = if mean != 0.0 { std / mean } else { f64::INFINITY };
    std < MIN_SEGMENT_STD || cv > cv_threshold
}

/// Per group: add `segment_outlier`, true on every row of a group that has too few
/// values, no variability or a coefficient of variation above `cv_threshold`.
pub fn flag_unreliable_segments(
    table: &MetricsTable,
    metric: &str,
    cv_threshold: f64,
    min_points: usize,
    group_by: &[&str],
) -> Result<MetricsTable, DyadError> {
    let values = table.numeric_column(metric)?;
    let mut flags = vec![Cell::Missing; table.len()];
    for rows in table.group_rows(group_by)? {
        let present: Vec<f64> = rows.iter().filter_map(|&r| values[r]).collect();
        let verdict = segment_is_unreliable(&present, cv_threshold, min_points);
        for &row in &rows {
            flags[row] = Cell::Bool(verdict);
        }
    }
    table.with_column("segment_outlier", flags)
}

/// Add `{column}_plausible`: the value when inside `[lower, upper]`, else missing.
pub fn mark_implausible(
    table: &MetricsTable,
    column: &str,
    lower: f64,
    upper: f64,
) -> Result<MetricsTable, DyadError> {
    let values = table.numeric_column(column)?;
    let plausible = values
        .into_iter()
        .map(|v| v.filter(|x| *x >= lower && *x <= upper).into())
        .collect();
    table.with_column(&format!("{column}_plausible"), plausible)
}
