//! Dyad orchestration: from a pair of recording files to per-role metrics and
//! preprocessed signals, tagged with the subject's identity.

use crate::analysis::{ecg_preprocess, SignalAnalysis, SignalQuality};
use crate::error::DyadError;
use crate::io::dyad::load_dyad_table;
use crate::params::{OverrideRegistry, ParameterSet, Role};
use crate::report::{Cell, MetricsTable};
use crate::segment::segment;
use crate::table::{EcgSignalTable, SignalEventTable, Timeline};
use crate::windowing::{compute_windowed_metrics, metric_column_names, PlotRequest, WindowDiagnostic};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Columns appended to every metrics row after the window features.
pub const IDENTITY_COLUMNS: [&str; 5] = [
    "segment_name",
    "subject_type",
    "condition",
    "wave",
    "subject_id",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectIdentity {
    pub condition: char,
    pub subject_id: u32,
    pub wave: String,
}

impl SubjectIdentity {
    /// Output directory name, e.g. `B_1_W1`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}_{}", self.condition, self.subject_id, self.wave)
    }

    /// Output file prefix for one role, e.g. `B1_W1_child`.
    pub fn file_stem(&self, role: Role) -> String {
        format!("{}{}_{}_{}", self.condition, self.subject_id, self.wave, role)
    }
}

impl fmt::Display for SubjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} ({})", self.condition, self.subject_id, self.wave)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Ecg,
    Events,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingName {
    pub identity: SubjectIdentity,
    pub kind: FileKind,
}

/// Parse `{Condition}{Subject}_{Wave}_{Type}` from a recording's file name.
pub fn parse_recording_name(path: &Path) -> Result<RecordingName, DyadError> {
    let file = path.display().to_string();
    let fail = |reason: String| DyadError::FilenamePattern {
        file: file.clone(),
        reason,
    };
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| fail("file name is not valid UTF-8".into()))?;
    let tokens: Vec<&str> = stem.split('_').collect();
    let [subject, wave, file_type] = tokens.as_slice() else {
        return Err(fail(format!(
            "expected 3 '_'-separated tokens, found {}",
            tokens.len()
        )));
    };
    let mut chars = subject.chars();
    let condition = chars
        .next()
        .ok_or_else(|| fail("missing condition letter".into()))?
        .to_ascii_uppercase();
    let digits = chars.as_str();
    let subject_id = digits
        .parse::<u32>()
        .map_err(|_| fail(format!("subject id '{digits}' is not a number")))?;
    if wave.chars().count() != 2 {
        return Err(fail(format!(
            "wave should be 2 letters/digits but is {} in '{wave}'",
            wave.chars().count()
        )));
    }
    let kind = if file_type.contains("event") {
        FileKind::Events
    } else if file_type.contains("mc") {
        FileKind::Ecg
    } else {
        return Err(fail(format!(
            "file type '{file_type}' is neither 'mc' nor 'event'"
        )));
    };
    Ok(RecordingName {
        identity: SubjectIdentity {
            condition,
            subject_id,
            wave: wave.to_string(),
        },
        kind,
    })
}

/// Check that an ECG file and an event file belong to the same recording session.
pub fn validate_pair(ecg_path: &Path, event_path: &Path) -> Result<SubjectIdentity, DyadError> {
    let ecg = parse_recording_name(ecg_path)?;
    let events = parse_recording_name(event_path)?;
    if ecg.kind != FileKind::Ecg {
        return Err(DyadError::FilenamePattern {
            file: ecg_path.display().to_string(),
            reason: "expected an ECG ('mc') recording".into(),
        });
    }
    if events.kind != FileKind::Events {
        return Err(DyadError::FilenamePattern {
            file: event_path.display().to_string(),
            reason: "expected an 'event' recording".into(),
        });
    }
    let mismatch = |field: &'static str, left: String, right: String| DyadError::DyadMismatch {
        field,
        ecg: ecg_path.display().to_string(),
        events: event_path.display().to_string(),
        left,
        right,
    };
    let (a, b) = (&ecg.identity, &events.identity);
    if a.subject_id != b.subject_id {
        return Err(mismatch(
            "subject id",
            a.subject_id.to_string(),
            b.subject_id.to_string(),
        ));
    }
    if a.condition != b.condition {
        return Err(mismatch(
            "condition",
            a.condition.to_string(),
            b.condition.to_string(),
        ));
    }
    if a.wave != b.wave {
        return Err(mismatch("wave", a.wave.clone(), b.wave.clone()));
    }
    Ok(ecg.identity)
}

/// Skipped work of one role, for the diagnostics dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDiagnostics {
    pub skipped_segments: Vec<String>,
    pub skipped_windows: Vec<WindowDiagnostic>,
}

/// Everything produced for one role of a dyad.
#[derive(Debug, Clone)]
pub struct RoleOutput {
    pub role: Role,
    pub parameters: ParameterSet,
    pub metrics: MetricsTable,
    /// Whole preprocessed recording with its event columns.
    pub signal: EcgSignalTable,
    /// Segment label of every signal row, when the row lies in a segment.
    pub segment_names: Vec<Option<String>>,
    pub diagnostics: RoleDiagnostics,
    pub plot_requests: Vec<PlotRequest>,
}

#[derive(Debug, Clone)]
pub struct DyadOutput {
    pub identity: SubjectIdentity,
    pub child: RoleOutput,
    pub mother: RoleOutput,
}

impl DyadOutput {
    pub fn roles(&self) -> [&RoleOutput; 2] {
        [&self.child, &self.mother]
    }
}

/// Collaborators shared by every dyad of a batch.
pub struct DyadPipeline<'a> {
    pub base: &'a ParameterSet,
    pub overrides: &'a OverrideRegistry,
    pub analysis: &'a dyn SignalAnalysis,
    pub emit_plots: bool,
}

impl DyadPipeline<'_> {
    /// Validate, load and process one dyad.
    pub fn process_dyad(&self, ecg_path: &Path, event_path: &Path) -> Result<DyadOutput> {
        let identity = validate_pair(ecg_path, event_path)?;
        info!("processing dyad {identity}");
        let table = load_dyad_table(ecg_path, event_path, self.base.sampling_frequency())?;
        self.process_loaded_dyad(identity, &table)
    }

    /// Process both roles of an already merged recording.
    pub fn process_loaded_dyad(
        &self,
        identity: SubjectIdentity,
        table: &SignalEventTable,
    ) -> Result<DyadOutput> {
        let child = self.process_role(&identity, table, Role::Child)?;
        let mother = self.process_role(&identity, table, Role::Mother)?;
        Ok(DyadOutput {
            identity,
            child,
            mother,
        })
    }

    fn process_role(
        &self,
        identity: &SubjectIdentity,
        table: &SignalEventTable,
        role: Role,
    ) -> Result<RoleOutput> {
        let parameters = self
            .overrides
            .override_for_subject(identity.subject_id, role, self.base)
            .with_context(|| format!("configuring {role} parameters for {identity}"))?;
        let fs = parameters.sampling_frequency();
        let signal = ecg_preprocess(table, role, &parameters, self.analysis)
            .with_context(|| format!("preprocessing {role} ECG of {identity}"))?;
        match (&signal.quality, signal.quality.mean()) {
            (_, Some(mean)) => debug!("{identity} {role}: mean signal quality {mean:.3}"),
            (SignalQuality::Categorical(label), _) => {
                debug!("{identity} {role}: signal quality {label}")
            }
            _ => {}
        }
        let segments = segment(&signal, &parameters.segmentation, fs)
            .with_context(|| format!("segmenting {role} recording of {identity}"))?;

        let mut diagnostics = RoleDiagnostics {
            skipped_segments: parameters
                .segmentation
                .iter()
                .filter(|spec| !segments.iter().any(|s| s.name == spec.name))
                .map(|spec| spec.name.clone())
                .collect(),
            ..RoleDiagnostics::default()
        };

        let columns: Vec<String> = metric_column_names(
            parameters.general.compute_hrv_frequency_metrics,
        )
        .into_iter()
        .chain(IDENTITY_COLUMNS)
        .map(str::to_string)
        .collect();
        let mut metrics = MetricsTable::new(columns);
        let mut plot_requests = Vec::new();
        for seg in &segments {
            let windowed = compute_windowed_metrics(seg, &parameters, self.analysis, self.emit_plots)?;
            for row in &windowed.rows {
                let mut cells: Vec<Cell> =
                    row.columns().into_iter().map(|(_, v)| Cell::Number(v)).collect();
                cells.extend(identity_cells(&seg.label, role, identity));
                metrics.push_row(cells)?;
            }
            if !windowed.diagnostics.is_empty() {
                warn!(
                    "{identity} {role}: {} of {} windows skipped in '{}'",
                    windowed.diagnostics.len(),
                    windowed.diagnostics.len() + windowed.rows.len(),
                    seg.label
                );
            }
            diagnostics.skipped_windows.extend(windowed.diagnostics);
            plot_requests.extend(windowed.plot_requests);
        }
        info!(
            "{identity} {role}: {} segments, {} metric rows",
            segments.len(),
            metrics.len()
        );

        let index = signal.index();
        let segment_names = index
            .iter()
            .map(|&t| {
                segments
                    .iter()
                    .find(|s| t >= s.onset && t < s.offset)
                    .map(|s| s.label.clone())
            })
            .collect();

        Ok(RoleOutput {
            role,
            parameters,
            metrics,
            signal,
            segment_names,
            diagnostics,
            plot_requests,
        })
    }
}

fn identity_cells(segment_name: &str, role: Role, identity: &SubjectIdentity) -> [Cell; 5] {
    [
        Cell::from(segment_name),
        Cell::from(role.as_str()),
        Cell::Text(identity.condition.to_string()),
        Cell::from(identity.wave.as_str()),
        Cell::Number(identity.subject_id as f64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::NativeAnalysis;
    use crate::params::{OverrideRule, ParameterPatch, SegmentPatch, SegmentSpec};
    use crate::simulate::{simulate_dyad_table, SimulationConfig};

    #[test]
    fn parses_recording_names() {
        let mc = parse_recording_name(Path::new("raw/B01_W1_mc.txt")).unwrap();
        assert_eq!(mc.kind, FileKind::Ecg);
        assert_eq!(
            mc.identity,
            SubjectIdentity {
                condition: 'B',
                subject_id: 1,
                wave: "W1".into()
            }
        );
        let ev = parse_recording_name(Path::new("c7_WX_event.txt")).unwrap();
        assert_eq!(ev.kind, FileKind::Events);
        assert_eq!(ev.identity.condition, 'C');
        assert_eq!(ev.identity.subject_id, 7);
        assert_eq!(ev.identity.wave, "WX");
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["bad_name.txt", "B01_W12_mc.txt", "Bxx_W1_mc.txt", "B01_W1_ecg.txt"] {
            let err = parse_recording_name(Path::new(name)).unwrap_err();
            assert!(
                matches!(&err, DyadError::FilenamePattern { file, .. } if file == name),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn pair_must_share_identity() {
        let ok = validate_pair(Path::new("B01_W1_mc.txt"), Path::new("B01_W1_event.txt"));
        assert_eq!(ok.unwrap().dir_name(), "B_1_W1");
        let err =
            validate_pair(Path::new("B01_W1_mc.txt"), Path::new("B02_W1_event.txt")).unwrap_err();
        assert!(matches!(
            err,
            DyadError::DyadMismatch {
                field: "subject id",
                ..
            }
        ));
        let err =
            validate_pair(Path::new("B01_W1_mc.txt"), Path::new("B01_W2_event.txt")).unwrap_err();
        assert!(matches!(err, DyadError::DyadMismatch { field: "wave", .. }));
    }

    fn identity() -> SubjectIdentity {
        SubjectIdentity {
            condition: 'B',
            subject_id: 1,
            wave: "W1".into(),
        }
    }

    #[test]
    fn ten_minute_recording_yields_ten_windows_per_role() {
        let config = SimulationConfig {
            duration_s: 600.0,
            events: vec![("E1".into(), "baseline".into(), 0.0)],
            ..SimulationConfig::default()
        };
        let table = simulate_dyad_table(&config).unwrap();
        let base = ParameterSet {
            segmentation: vec![SegmentSpec::new("baseline", "baseline", 300.0)],
            ..ParameterSet::default()
        };
        let overrides = OverrideRegistry::default();
        let pipeline = DyadPipeline {
            base: &base,
            overrides: &overrides,
            analysis: &NativeAnalysis::default(),
            emit_plots: false,
        };
        let out = pipeline.process_loaded_dyad(identity(), &table).unwrap();
        for role in out.roles() {
            let windows = role.metrics.numeric_column("analysis_window").unwrap();
            assert_eq!(
                windows,
                (0..10).map(|w| Some(w as f64)).collect::<Vec<_>>(),
                "{}",
                role.role
            );
            let starts = role.metrics.numeric_column("start_index").unwrap();
            assert!(starts.windows(2).all(|w| w[0] < w[1]));
            let subject_type = role.metrics.column("subject_type").unwrap();
            assert!(subject_type.iter().all(|c| **c == Cell::from(role.role.as_str())));
            assert_eq!(role.metrics.columns().last().map(String::as_str), Some("subject_id"));
            assert!(role.diagnostics.skipped_windows.is_empty());
            assert_eq!(role.signal.len(), table.len());
            assert_eq!(
                role.segment_names.iter().flatten().count(),
                149_999
            );
        }
    }

    #[test]
    fn overrides_apply_per_role_and_empty_segments_are_reported() {
        let config = SimulationConfig {
            duration_s: 120.0,
            events: vec![("E1".into(), "baseline".into(), 1000.0)],
            ..SimulationConfig::default()
        };
        let table = simulate_dyad_table(&config).unwrap();
        let base = ParameterSet {
            segmentation: vec![
                SegmentSpec::new("baseline", "baseline", 60.0),
                SegmentSpec::new("late", 500_000.0, 60.0),
            ],
            ..ParameterSet::default()
        };
        let mut overrides = OverrideRegistry::default();
        overrides.register(OverrideRule {
            subject_id: 1,
            role: Some(Role::Mother),
            patch: ParameterPatch {
                segments: vec![SegmentPatch {
                    name: "baseline".into(),
                    event_onset: None,
                    duration: Some(30.0),
                }],
                ..ParameterPatch::default()
            },
        });
        let pipeline = DyadPipeline {
            base: &base,
            overrides: &overrides,
            analysis: &NativeAnalysis::default(),
            emit_plots: true,
        };
        let out = pipeline.process_loaded_dyad(identity(), &table).unwrap();
        assert_eq!(out.child.metrics.len(), 2);
        assert_eq!(out.mother.metrics.len(), 1);
        assert_eq!(out.mother.parameters.segmentation[0].duration, 30.0);
        assert_eq!(base.segmentation[0].duration, 60.0);
        assert_eq!(out.child.diagnostics.skipped_segments, vec!["late".to_string()]);
        assert_eq!(out.child.plot_requests.len(), 2);
    }

    #[test]
    fn missing_event_fails_the_dyad() {
        let config = SimulationConfig {
            duration_s: 20.0,
            events: vec![],
            ..SimulationConfig::default()
        };
        let table = simulate_dyad_table(&config).unwrap();
        let base = ParameterSet::default();
        let overrides = OverrideRegistry::default();
        let pipeline = DyadPipeline {
            base: &base,
            overrides: &overrides,
            analysis: &NativeAnalysis::default(),
            emit_plots: false,
        };
        let err = pipeline.process_loaded_dyad(identity(), &table).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DyadError>(),
            Some(DyadError::AmbiguousOrMissingEvent { matches: 0, .. })
        ));
    }
}
