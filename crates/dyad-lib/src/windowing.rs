//! Fixed-length analysis windows over a preprocessed segment.

use crate::analysis::SignalAnalysis;
use crate::error::{AnalysisError, DyadError};
use crate::metrics::hrv::{
    HrvFrequencyFeatures, HrvTimeFeatures, FREQUENCY_FEATURES, TIME_FEATURES,
};
use crate::params::ParameterSet;
use crate::segment::Segment;
use crate::table::{EcgSignalTable, Timeline};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Consecutive non-overlapping ranges of `size` covering `0..len`; the last may be short.
pub fn window_ranges(len: usize, size: usize) -> Vec<Range<usize>> {
    if size == 0 {
        return Vec::new();
    }
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

pub const WINDOW_COLUMNS: [&str; 4] = [
    "start_index",
    "stop_index",
    "analysis_window",
    "heart_rate_bpm",
];

/// Column names of [`WindowMetrics::columns`].
pub fn metric_column_names(with_frequency: bool) -> Vec<&'static str> {
    let mut names = TIME_FEATURES.to_vec();
    if with_frequency {
        names.extend(FREQUENCY_FEATURES);
    }
    names.extend(WINDOW_COLUMNS);
    names
}

/// Feature row of one analysis window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMetrics {
    pub analysis_window: usize,
    pub start_index: f64,
    pub stop_index: f64,
    pub heart_rate_bpm: f64,
    pub time: HrvTimeFeatures,
    pub frequency: Option<HrvFrequencyFeatures>,
}

impl WindowMetrics {
    /// HRV features first, then window bookkeeping.
    pub fn columns(&self) -> Vec<(&'static str, f64)> {
        let mut columns = self.time.columns();
        if let Some(frequency) = &self.frequency {
            columns.extend(frequency.columns());
        }
        let bookkeeping = [
            self.start_index,
            self.stop_index,
            self.analysis_window as f64,
            self.heart_rate_bpm,
        ];
        columns.extend(WINDOW_COLUMNS.into_iter().zip(bookkeeping));
        columns
    }
}

/// Why a window produced no row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowDiagnostic {
    pub segment: String,
    pub analysis_window: usize,
    pub start_index: f64,
    pub stop_index: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Computed(WindowMetrics),
    Skipped(WindowDiagnostic),
}

/// A window the QA renderer should draw as `{segment}_segment_{window}.png`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotRequest {
    pub segment: String,
    pub analysis_window: usize,
    pub window: EcgSignalTable,
}

impl PlotRequest {
    pub fn file_name(&self) -> String {
        format!("{}_segment_{}.png", self.segment, self.analysis_window)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowedMetrics {
    pub rows: Vec<WindowMetrics>,
    pub diagnostics: Vec<WindowDiagnostic>,
    pub plot_requests: Vec<PlotRequest>,
}

impl WindowedMetrics {
    fn record(&mut self, outcome: WindowOutcome) {
        match outcome {
            WindowOutcome::Computed(row) => self.rows.push(row),
            WindowOutcome::Skipped(diagnostic) => self.diagnostics.push(diagnostic),
        }
    }
}

fn window_features(
    window: &EcgSignalTable,
    params: &ParameterSet,
    analysis: &dyn SignalAnalysis,
) -> Result<(f64, HrvTimeFeatures, Option<HrvFrequencyFeatures>), AnalysisError> {
    if window.is_empty() {
        return Err(AnalysisError::EmptySignal);
    }
    let fs = params.sampling_frequency();
    let peaks = window.peak_positions();
    let duration_s = window.len() as f64 / fs;
    let heart_rate = 60.0 / duration_s * peaks.len() as f64;
    let time = analysis.hrv_time(&peaks, fs)?;
    let frequency = if params.general.compute_hrv_frequency_metrics {
        Some(analysis.hrv_frequency(&peaks, fs, &params.hrv_frequency_settings)?)
    } else {
        None
    };
    Ok((heart_rate, time, frequency))
}

/// Slice `segment` into analysis windows and compute heart rate and HRV per window.
///
/// A failing window contributes a diagnostic instead of a row; the remaining windows
/// are still processed. With `emit_plots`, every window yields a plot request.
pub fn compute_windowed_metrics(
    segment: &Segment<EcgSignalTable>,
    params: &ParameterSet,
    analysis: &dyn SignalAnalysis,
    emit_plots: bool,
) -> Result<WindowedMetrics, DyadError> {
    let size = params.window_size_samples()?;
    let table = &segment.table;
    let mut out = WindowedMetrics::default();
    for (analysis_window, range) in window_ranges(table.len(), size).into_iter().enumerate() {
        let window = table.slice(range);
        let start_index = window.index[0];
        let stop_index = window.index[window.len() - 1];
        let outcome = match window_features(&window, params, analysis) {
            Ok((heart_rate_bpm, time, frequency)) => {
                debug!(
                    "{} window {analysis_window}: {heart_rate_bpm:.1} bpm",
                    segment.label
                );
                WindowOutcome::Computed(WindowMetrics {
                    analysis_window,
                    start_index,
                    stop_index,
                    heart_rate_bpm,
                    time,
                    frequency,
                })
            }
            Err(err) => {
                warn!(
                    "error calculating HRV metrics for {} window {analysis_window}: {err}",
                    segment.label
                );
                WindowOutcome::Skipped(WindowDiagnostic {
                    segment: segment.label.clone(),
                    analysis_window,
                    start_index,
                    stop_index,
                    reason: err.to_string(),
                })
            }
        };
        out.record(outcome);
        if emit_plots {
            out.plot_requests.push(PlotRequest {
                segment: segment.label.clone(),
                analysis_window,
                window,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{NativeAnalysis, SignalQuality};
    use crate::table::IndexUnit;

    fn segment_with_peaks(len: usize, peaks: impl Fn(usize) -> bool) -> Segment<EcgSignalTable> {
        let index: Vec<f64> = (0..len).map(|i| i as f64 * 2.0).collect();
        let table = EcgSignalTable {
            unit: IndexUnit::Milliseconds,
            raw: vec![0.0; len],
            clean: vec![0.0; len],
            r_peaks: (0..len).map(peaks).collect(),
            quality: SignalQuality::Continuous(vec![1.0; len]),
            event: vec![None; len],
            event_description: vec![None; len],
            index,
        };
        Segment {
            name: "baseline".into(),
            label: "baseline".into(),
            onset: 0.0,
            offset: len as f64 * 2.0,
            table,
        }
    }

    #[test]
    fn ranges_are_exhaustive_and_disjoint() {
        for (len, size) in [(0, 5), (10, 5), (11, 5), (4, 5), (149_999, 15_000)] {
            let ranges = window_ranges(len, size);
            let mut next = 0;
            for r in &ranges {
                assert_eq!(r.start, next);
                assert!(r.end > r.start && r.end - r.start <= size);
                next = r.end;
            }
            assert_eq!(next, len);
        }
        assert_eq!(window_ranges(11, 5).last(), Some(&(10..11)));
    }

    #[test]
    fn five_minute_segment_gives_ten_windows() {
        let segment = segment_with_peaks(149_999, |i| i % 400 == 200);
        let params = ParameterSet::default();
        let out = compute_windowed_metrics(&segment, &params, &NativeAnalysis::default(), false)
            .unwrap();
        assert_eq!(out.rows.len(), 10);
        assert!(out.diagnostics.is_empty());
        let windows: Vec<usize> = out.rows.iter().map(|r| r.analysis_window).collect();
        assert_eq!(windows, (0..10).collect::<Vec<_>>());
        assert!(out.rows.windows(2).all(|w| w[0].start_index < w[1].start_index));
        assert_eq!(out.rows[1].start_index, 30_000.0);
        assert_eq!(out.rows[9].stop_index, 299_996.0);
        // 37 beats in the first 30 s
        assert!((out.rows[0].time.mean_nn - 800.0).abs() < 1e-9);
        assert!((out.rows[0].heart_rate_bpm - 74.0).abs() < 1e-9);
        assert_eq!(out.rows[0].columns().last().map(|c| c.0), Some("heart_rate_bpm"));
    }

    #[test]
    fn failing_window_is_skipped_with_diagnostic() {
        // no beats in the second window
        let segment = segment_with_peaks(45_000, |i| {
            i % 400 == 200 && !(15_000..30_000).contains(&i)
        });
        let params = ParameterSet::default();
        let out =
            compute_windowed_metrics(&segment, &params, &NativeAnalysis::default(), true).unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[1].analysis_window, 2);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].analysis_window, 1);
        assert!(out.diagnostics[0].reason.contains("R-peaks"));
        assert_eq!(out.plot_requests.len(), 3);
        assert_eq!(out.plot_requests[1].file_name(), "baseline_segment_1.png");
    }

    #[test]
    fn frequency_features_when_enabled() {
        let segment = segment_with_peaks(15_000, |i| i % 400 == 200);
        let mut params = ParameterSet::default();
        params.general.compute_hrv_frequency_metrics = true;
        let out = compute_windowed_metrics(&segment, &params, &NativeAnalysis::default(), false)
            .unwrap();
        let names: Vec<&str> = out.rows[0].columns().iter().map(|c| c.0).collect();
        assert_eq!(names, metric_column_names(true));
        assert_eq!(names[14], "HRV_ULF");
    }
}
