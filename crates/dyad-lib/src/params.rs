//! Processing parameters and the per-subject override registry.
//!
//! A [`ParameterSet`] is built once as the base default and never edited in place.
//! Subject- and role-specific deviations are expressed as [`OverrideRule`] entries in an
//! [`OverrideRegistry`], which derives a fresh parameter tree for every dyad and role.

use crate::error::DyadError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Which member of the dyad a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Child,
    Mother,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Child, Role::Mother];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Child => "child",
            Role::Mother => "mother",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralParams {
    /// Sampling frequency of both ECG channels (Hz).
    pub sampling_frequency: u32,
    /// Length of one analysis window (seconds).
    pub analysis_window_seconds: f64,
    pub compute_hrv_frequency_metrics: bool,
}

impl Default for GeneralParams {
    fn default() -> Self {
        Self {
            sampling_frequency: 500,
            analysis_window_seconds: 30.0,
            compute_hrv_frequency_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleaningMethod {
    /// 0.5 Hz high-pass followed by powerline smoothing.
    Neurokit,
    /// 5-15 Hz band-pass used by QRS detectors.
    PanTompkins,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningParams {
    pub method: CleaningMethod,
    /// Powerline frequency to suppress (Hz). Written as `false` when disabled.
    #[serde(with = "powerline")]
    pub powerline: Option<f64>,
}

impl Default for CleaningParams {
    fn default() -> Self {
        Self {
            method: CleaningMethod::Neurokit,
            powerline: Some(50.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakMethod {
    PanTompkins,
    LocalMaxima,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakDetectionParams {
    pub method: PeakMethod,
    pub correct_artifacts: bool,
}

impl Default for PeakDetectionParams {
    fn default() -> Self {
        Self {
            method: PeakMethod::PanTompkins,
            correct_artifacts: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityMethod {
    #[serde(rename = "averageQRS")]
    AverageQrs,
    #[serde(rename = "zhao2018")]
    Zhao2018,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityApproach {
    Simple,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalQualityParams {
    pub method: QualityMethod,
    /// Fusion approach, only used by `zhao2018`.
    pub approach: QualityApproach,
}

impl Default for SignalQualityParams {
    fn default() -> Self {
        Self {
            method: QualityMethod::AverageQrs,
            approach: QualityApproach::Simple,
        }
    }
}

/// Half-open frequency band `[low, high)` in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand(pub f64, pub f64);

impl FrequencyBand {
    pub fn low(&self) -> f64 {
        self.0
    }
    pub fn high(&self) -> f64 {
        self.1
    }
    pub fn contains(&self, freq: f64) -> bool {
        freq >= self.0 && freq < self.1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PsdMethod {
    Welch,
    Periodogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrvFrequencySettings {
    pub ulf: FrequencyBand,
    pub vlf: FrequencyBand,
    pub lf: FrequencyBand,
    pub hf: FrequencyBand,
    pub vhf: FrequencyBand,
    pub psd_method: PsdMethod,
    pub normalize: bool,
}

impl Default for HrvFrequencySettings {
    fn default() -> Self {
        Self {
            ulf: FrequencyBand(0.0, 0.0033),
            vlf: FrequencyBand(0.0033, 0.04),
            lf: FrequencyBand(0.04, 0.15),
            hf: FrequencyBand(0.15, 0.4),
            vhf: FrequencyBand(0.4, 0.5),
            psd_method: PsdMethod::Welch,
            normalize: true,
        }
    }
}

impl HrvFrequencySettings {
    pub fn bands(&self) -> [(&'static str, FrequencyBand); 5] {
        [
            ("ulf", self.ulf),
            ("vlf", self.vlf),
            ("lf", self.lf),
            ("hf", self.hf),
            ("vhf", self.vhf),
        ]
    }
}

/// Segment onset: an absolute time in the table's index unit, or the description of
/// an event marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventRef {
    Time(f64),
    Name(String),
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRef::Time(t) => write!(f, "{t}"),
            EventRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for EventRef {
    fn from(value: &str) -> Self {
        EventRef::Name(value.to_string())
    }
}

impl From<f64> for EventRef {
    fn from(value: f64) -> Self {
        EventRef::Time(value)
    }
}

/// One entry of the segmentation recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub name: String,
    pub event_onset: EventRef,
    /// Segment length in seconds.
    pub duration: f64,
}

impl SegmentSpec {
    pub fn new(name: &str, event_onset: impl Into<EventRef>, duration: f64) -> Self {
        Self {
            name: name.to_string(),
            event_onset: event_onset.into(),
            duration,
        }
    }
}

fn default_segmentation() -> Vec<SegmentSpec> {
    vec![
        SegmentSpec::new("baseline", "baseline resting start", 300.0),
        SegmentSpec::new("book_reading", "Book start", 300.0),
    ]
}

/// Full parameter tree for processing one role of one dyad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSet {
    pub general: GeneralParams,
    pub cleaning: CleaningParams,
    pub peak_detection: PeakDetectionParams,
    pub signal_quality_index: SignalQualityParams,
    pub hrv_frequency_settings: HrvFrequencySettings,
    /// Ordered recipe; segments are produced in this order.
    pub segmentation: Vec<SegmentSpec>,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            general: GeneralParams::default(),
            cleaning: CleaningParams::default(),
            peak_detection: PeakDetectionParams::default(),
            signal_quality_index: SignalQualityParams::default(),
            hrv_frequency_settings: HrvFrequencySettings::default(),
            segmentation: default_segmentation(),
        }
    }
}

impl ParameterSet {
    /// Independent copy; nothing is shared with `self`.
    pub fn deep_copy(&self) -> ParameterSet {
        self.clone()
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.general.sampling_frequency as f64
    }

    /// Samples per analysis window, `floor(analysis_window_seconds * fs)`.
    pub fn window_size_samples(&self) -> Result<usize, DyadError> {
        let size = (self.general.analysis_window_seconds * self.sampling_frequency()).floor();
        if !size.is_finite() || size < 1.0 {
            return Err(invalid(
                "general.analysis_window_seconds",
                format!(
                    "{} s at {} Hz is shorter than one sample",
                    self.general.analysis_window_seconds, self.general.sampling_frequency
                ),
            ));
        }
        Ok(size as usize)
    }

    pub fn validate(&self) -> Result<(), DyadError> {
        if self.general.sampling_frequency == 0 {
            return Err(invalid("general.sampling_frequency", "must be positive".into()));
        }
        if !(self.general.analysis_window_seconds > 0.0) {
            return Err(invalid(
                "general.analysis_window_seconds",
                "must be positive".into(),
            ));
        }
        self.window_size_samples()?;
        if let Some(powerline) = self.cleaning.powerline {
            if !(powerline > 0.0) {
                return Err(invalid("cleaning.powerline", "must be positive".into()));
            }
        }
        for (name, band) in self.hrv_frequency_settings.bands() {
            if !(band.low() >= 0.0 && band.low() < band.high()) {
                return Err(invalid(
                    &format!("hrv_frequency_settings.{name}"),
                    format!("[{}, {}) is not a valid band", band.low(), band.high()),
                ));
            }
        }
        for spec in &self.segmentation {
            if !(spec.duration > 0.0) {
                return Err(invalid(
                    &format!("segmentation.{}.duration", spec.name),
                    "must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing parameters")
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing parameters")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }
}

fn invalid(name: &str, reason: String) -> DyadError {
    DyadError::InvalidParameter {
        name: name.to_string(),
        reason,
    }
}

/// Per-segment adjustment inside a [`ParameterPatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPatch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_onset: Option<EventRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// TOML has no null, so a disabled powerline filter is spelled `powerline = false`.
mod powerline {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Setting {
        Hz(f64),
        Enabled(bool),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(hz) => serializer.serialize_f64(*hz),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Setting::deserialize(deserializer)? {
            Setting::Hz(hz) => Ok(Some(hz)),
            Setting::Enabled(false) => Ok(None),
            Setting::Enabled(true) => Err(D::Error::custom(
                "powerline = true is ambiguous; give a frequency in Hz or false",
            )),
        }
    }

    /// Patch form: absent keeps the base value, present replaces it.
    pub mod patch {
        use serde::{Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Option<f64>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(setting) => super::serialize(setting, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Option<f64>>, D::Error> {
            super::deserialize(deserializer).map(Some)
        }
    }
}

/// Sparse set of parameter values that replace the base values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_window_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_hrv_frequency_metrics: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaning_method: Option<CleaningMethod>,
    /// `Some(None)` switches powerline filtering off.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "powerline::patch"
    )]
    pub powerline: Option<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_method: Option<PeakMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_artifacts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_method: Option<QualityMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_approach: Option<QualityApproach>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<SegmentPatch>,
}

impl ParameterPatch {
    fn apply(&self, subject_id: u32, params: &mut ParameterSet) -> Result<(), DyadError> {
        if let Some(v) = self.analysis_window_seconds {
            params.general.analysis_window_seconds = v;
        }
        if let Some(v) = self.compute_hrv_frequency_metrics {
            params.general.compute_hrv_frequency_metrics = v;
        }
        if let Some(v) = self.cleaning_method {
            params.cleaning.method = v;
        }
        if let Some(v) = self.powerline {
            params.cleaning.powerline = v;
        }
        if let Some(v) = self.peak_method {
            params.peak_detection.method = v;
        }
        if let Some(v) = self.correct_artifacts {
            params.peak_detection.correct_artifacts = v;
        }
        if let Some(v) = self.quality_method {
            params.signal_quality_index.method = v;
        }
        if let Some(v) = self.quality_approach {
            params.signal_quality_index.approach = v;
        }
        for patch in &self.segments {
            let spec = params
                .segmentation
                .iter_mut()
                .find(|spec| spec.name == patch.name)
                .ok_or_else(|| DyadError::UnknownOverride {
                    subject_id,
                    segment: patch.name.clone(),
                })?;
            if let Some(onset) = &patch.event_onset {
                spec.event_onset = onset.clone();
            }
            if let Some(duration) = patch.duration {
                spec.duration = duration;
            }
        }
        Ok(())
    }
}

/// Rule keyed by subject id and, optionally, role. A rule without a role applies to
/// both members of the dyad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub subject_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub patch: ParameterPatch,
}

/// Lookup table of subject-specific parameter deviations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideRegistry {
    rules: Vec<OverrideRule>,
}

impl OverrideRegistry {
    pub fn new(rules: Vec<OverrideRule>) -> Self {
        Self { rules }
    }

    pub fn register(&mut self, rule: OverrideRule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[OverrideRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Derive the parameters for one subject and role from `base`.
    ///
    /// Role-agnostic rules are applied before role-specific ones, each group in
    /// registration order. `base` is never modified; with no matching rule the result
    /// equals `base`.
    pub fn override_for_subject(
        &self,
        subject_id: u32,
        role: Role,
        base: &ParameterSet,
    ) -> Result<ParameterSet, DyadError> {
        let mut params = base.deep_copy();
        let shared = self
            .rules
            .iter()
            .filter(|rule| rule.subject_id == subject_id && rule.role.is_none());
        let specific = self
            .rules
            .iter()
            .filter(|rule| rule.subject_id == subject_id && rule.role == Some(role));
        for rule in shared.chain(specific) {
            rule.patch.apply(subject_id, &mut params)?;
        }
        params.validate()?;
        Ok(params)
    }
}

/// On-disk pipeline configuration: base parameters plus override rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub parameters: ParameterSet,
    pub overrides: Vec<OverrideRule>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: PipelineConfig =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        config.parameters.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing pipeline config")
    }

    pub fn registry(&self) -> OverrideRegistry {
        OverrideRegistry::new(self.overrides.clone())
    }
}
