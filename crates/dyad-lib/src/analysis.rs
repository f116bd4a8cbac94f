//! Signal-analysis capability: cleaning, R-peak detection, signal quality and HRV
//! indices behind one trait, plus whole-recording preprocessing of one role.

use crate::detectors::ecg::{
    clean_ecg, correct_artifacts, detect_r_peaks_with_config, local_maxima_peaks,
    EcgPipelineConfig,
};
use crate::error::AnalysisError;
use crate::metrics::hrv::{self, HrvFrequencyFeatures, HrvTimeFeatures};
use crate::metrics::sqi;
use crate::params::{
    CleaningParams, HrvFrequencySettings, ParameterSet, PeakDetectionParams, PeakMethod,
    QualityMethod, Role, SignalQualityParams,
};
use crate::signal::{Events, TimeSeries};
use crate::table::{EcgSignalTable, SignalEventTable, Timeline};
use log::{debug, info};

pub use crate::metrics::sqi::{QualityLabel, SignalQuality};

/// R-peaks of a trace plus how they were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakDetection {
    pub peaks: Events,
    pub method: PeakMethod,
    /// Beats removed by artifact correction.
    pub corrected_artifacts: usize,
}

pub trait SignalAnalysis {
    fn clean(&self, raw: &TimeSeries, params: &CleaningParams) -> Result<Vec<f64>, AnalysisError>;

    fn detect_peaks(
        &self,
        clean: &TimeSeries,
        params: &PeakDetectionParams,
    ) -> Result<PeakDetection, AnalysisError>;

    fn signal_quality(
        &self,
        clean: &TimeSeries,
        peaks: &Events,
        params: &SignalQualityParams,
    ) -> Result<SignalQuality, AnalysisError>;

    fn hrv_time(&self, peaks: &[usize], fs: f64) -> Result<HrvTimeFeatures, AnalysisError>;

    fn hrv_frequency(
        &self,
        peaks: &[usize],
        fs: f64,
        settings: &HrvFrequencySettings,
    ) -> Result<HrvFrequencyFeatures, AnalysisError>;
}

/// In-crate implementation built on the adaptive-threshold detector.
#[derive(Debug, Clone, Default)]
pub struct NativeAnalysis {
    pub detector: EcgPipelineConfig,
}

impl SignalAnalysis for NativeAnalysis {
    fn clean(&self, raw: &TimeSeries, params: &CleaningParams) -> Result<Vec<f64>, AnalysisError> {
        if raw.is_empty() {
            return Err(AnalysisError::EmptySignal);
        }
        Ok(clean_ecg(raw, params.method, params.powerline))
    }

    fn detect_peaks(
        &self,
        clean: &TimeSeries,
        params: &PeakDetectionParams,
    ) -> Result<PeakDetection, AnalysisError> {
        if clean.is_empty() {
            return Err(AnalysisError::EmptySignal);
        }
        let detected = match params.method {
            PeakMethod::PanTompkins => detect_r_peaks_with_config(clean, &self.detector),
            PeakMethod::LocalMaxima => local_maxima_peaks(clean, &self.detector),
        };
        let (peaks, corrected_artifacts) = if params.correct_artifacts {
            correct_artifacts(&detected)
        } else {
            (detected, 0)
        };
        Ok(PeakDetection {
            peaks,
            method: params.method,
            corrected_artifacts,
        })
    }

    fn signal_quality(
        &self,
        clean: &TimeSeries,
        peaks: &Events,
        params: &SignalQualityParams,
    ) -> Result<SignalQuality, AnalysisError> {
        match params.method {
            QualityMethod::AverageQrs => {
                sqi::average_qrs_quality(&clean.data, &peaks.indices, clean.fs)
                    .map(SignalQuality::Continuous)
            }
            QualityMethod::Zhao2018 => {
                sqi::zhao2018_quality(&clean.data, clean.fs, params.approach)
                    .map(SignalQuality::Categorical)
            }
        }
    }

    fn hrv_time(&self, peaks: &[usize], fs: f64) -> Result<HrvTimeFeatures, AnalysisError> {
        hrv::hrv_time(peaks, fs)
    }

    fn hrv_frequency(
        &self,
        peaks: &[usize],
        fs: f64,
        settings: &HrvFrequencySettings,
    ) -> Result<HrvFrequencyFeatures, AnalysisError> {
        hrv::hrv_frequency(peaks, fs, settings)
    }
}

/// Clean, detect and rate one role's channel over the whole recording, keeping the
/// recording's index and event columns.
pub fn ecg_preprocess(
    table: &SignalEventTable,
    role: Role,
    params: &ParameterSet,
    analysis: &dyn SignalAnalysis,
) -> Result<EcgSignalTable, AnalysisError> {
    let fs = params.sampling_frequency();
    let raw = TimeSeries::new(fs, table.channel(role).to_vec());
    let clean = TimeSeries::new(fs, analysis.clean(&raw, &params.cleaning)?);
    let detection = analysis.detect_peaks(&clean, &params.peak_detection)?;
    if detection.corrected_artifacts > 0 {
        info!(
            "{role}: artifact correction removed {} of {} beats",
            detection.corrected_artifacts,
            detection.peaks.len() + detection.corrected_artifacts
        );
    }
    let quality = analysis.signal_quality(&clean, &detection.peaks, &params.signal_quality_index)?;
    debug!(
        "{role}: {} R-peaks over {:.1} s",
        detection.peaks.len(),
        raw.duration()
    );

    let mut r_peaks = vec![false; raw.len()];
    for &peak in &detection.peaks.indices {
        if let Some(flag) = r_peaks.get_mut(peak) {
            *flag = true;
        }
    }
    Ok(EcgSignalTable {
        unit: table.unit(),
        index: table.index().to_vec(),
        raw: raw.data,
        clean: clean.data,
        r_peaks,
        quality,
        event: table.events().to_vec(),
        event_description: table.event_descriptions().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::ecg::tests::synthetic_timeseries;
    use crate::params::CleaningMethod;
    use crate::table::{EventMarker, EventTable, IndexUnit, SignalTable};

    fn recording(fs: f64) -> SignalEventTable {
        let child = synthetic_timeseries(fs, &[0.6; 12]);
        let mother = synthetic_timeseries(fs, &[0.9; 8]);
        let len = child.len().min(mother.len());
        let index: Vec<f64> = (0..len).map(|i| i as f64 / fs * 1000.0).collect();
        let signal = SignalTable::new(
            IndexUnit::Milliseconds,
            index,
            child.data[..len].to_vec(),
            mother.data[..len].to_vec(),
        )
        .unwrap();
        let events = EventTable::new(
            IndexUnit::Milliseconds,
            vec![EventMarker {
                timestamp: 1000.0,
                event: "E1".into(),
                event_description: "baseline resting start".into(),
            }],
        );
        SignalEventTable::merge(&signal, &events).unwrap()
    }

    #[test]
    fn preprocess_keeps_index_and_flags_peaks() {
        let fs = 250.0;
        let table = recording(fs);
        let mut params = ParameterSet::default();
        params.general.sampling_frequency = fs as u32;
        let out = ecg_preprocess(&table, Role::Child, &params, &NativeAnalysis::default()).unwrap();
        assert_eq!(out.len(), table.len());
        assert_eq!(out.index, table.index());
        assert_eq!(out.raw, table.channel(Role::Child));
        assert!(out.peak_count() >= 6, "found {}", out.peak_count());
        assert!(matches!(out.quality, SignalQuality::Continuous(ref q) if q.len() == out.len()));
        assert_eq!(
            out.event_description.iter().flatten().next().map(String::as_str),
            Some("baseline resting start")
        );
    }

    #[test]
    fn categorical_quality_with_zhao() {
        let fs = 250.0;
        let table = recording(fs);
        let mut params = ParameterSet::default();
        params.general.sampling_frequency = fs as u32;
        params.signal_quality_index.method = QualityMethod::Zhao2018;
        let out =
            ecg_preprocess(&table, Role::Mother, &params, &NativeAnalysis::default()).unwrap();
        assert!(matches!(out.quality, SignalQuality::Categorical(_)));
    }

    #[test]
    fn empty_channel_is_rejected() {
        let analysis = NativeAnalysis::default();
        let params = CleaningParams {
            method: CleaningMethod::None,
            powerline: None,
        };
        let err = analysis
            .clean(&TimeSeries::new(500.0, Vec::new()), &params)
            .unwrap_err();
        assert_eq!(err, AnalysisError::EmptySignal);
    }
}
