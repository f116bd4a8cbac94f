//! Per-dyad output files.

use crate::params::Role;
use crate::pipeline::{DyadOutput, RoleOutput, SubjectIdentity};
use crate::report::{Cell, MetricsTable};
use anyhow::{Context, Result};
use log::info;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const SIGNAL_COLUMNS: [&str; 12] = [
    "index",
    "ECG_Raw",
    "ECG_Clean",
    "ECG_R_Peaks",
    "ECG_Quality",
    "event",
    "event_description",
    "segment_name",
    "subject_type",
    "condition",
    "wave",
    "subject_id",
];

/// `{out_root}/{C}_{id}_{wave}`.
pub fn dyad_dir(out_root: &Path, identity: &SubjectIdentity) -> PathBuf {
    out_root.join(identity.dir_name())
}

/// Where the per-window QA figures of one role go: `{qa_root}/{C}_{id}_{wave}/{role}`.
pub fn plot_dir(qa_root: &Path, identity: &SubjectIdentity, role: Role) -> PathBuf {
    qa_root.join(identity.dir_name()).join(role.as_str())
}

/// Preprocessed recording of one role as a table, one row per sample.
///
/// Covers the whole recording, not just the segments: rows outside every segment
/// keep their samples and carry a missing `segment_name`.
pub fn signal_table(output: &RoleOutput, identity: &SubjectIdentity) -> Result<MetricsTable> {
    let signal = &output.signal;
    let mut table = MetricsTable::new(SIGNAL_COLUMNS.iter().map(|c| c.to_string()).collect());
    let text = |value: &Option<String>| value.clone().map_or(Cell::Missing, Cell::Text);
    for row in 0..signal.index.len() {
        table.push_row(vec![
            Cell::Number(signal.index[row]),
            Cell::Number(signal.raw[row]),
            Cell::Number(signal.clean[row]),
            Cell::Number(if signal.r_peaks[row] { 1.0 } else { 0.0 }),
            Cell::parse(&signal.quality.cell(row)),
            text(&signal.event[row]),
            text(&signal.event_description[row]),
            output
                .segment_names
                .get(row)
                .and_then(|s| s.as_ref())
                .map_or(Cell::Missing, |s| Cell::Text(s.clone())),
            Cell::from(output.role.as_str()),
            Cell::Text(identity.condition.to_string()),
            Cell::from(identity.wave.as_str()),
            Cell::Number(identity.subject_id as f64),
        ])?;
    }
    Ok(table)
}

fn write_role(dir: &Path, identity: &SubjectIdentity, output: &RoleOutput) -> Result<()> {
    let stem = identity.file_stem(output.role);
    output
        .metrics
        .write_csv(&dir.join(format!("{stem}_hrv.csv")))?;
    signal_table(output, identity)?.write_delimited(&dir.join(format!("{stem}_signal.tsv")), b'\t')?;
    output
        .parameters
        .save(&dir.join(format!("{}_params.toml", output.role)))?;
    let path = dir.join(format!("{}_diagnostics.json", output.role));
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &output.diagnostics)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Write metrics, signal, effective parameters and diagnostics of both roles.
/// Returns the dyad directory.
pub fn write_dyad_outputs(out_root: &Path, output: &DyadOutput) -> Result<PathBuf> {
    let dir = dyad_dir(out_root, &output.identity);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    for role in output.roles() {
        write_role(&dir, &output.identity, role)?;
    }
    info!("wrote outputs of {} to {}", output.identity, dir.display());
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SignalQuality;
    use crate::params::ParameterSet;
    use crate::pipeline::RoleDiagnostics;
    use crate::table::{EcgSignalTable, IndexUnit};

    fn role_output(role: Role) -> RoleOutput {
        let signal = EcgSignalTable {
            unit: IndexUnit::Milliseconds,
            index: vec![0.0, 2.0, 4.0],
            raw: vec![0.1, 1.0, 0.1],
            clean: vec![0.0, 0.9, 0.0],
            r_peaks: vec![false, true, false],
            quality: SignalQuality::Continuous(vec![1.0, 0.5, 0.25]),
            event: vec![Some("E1".into()), None, None],
            event_description: vec![Some("baseline".into()), None, None],
        };
        let mut metrics = MetricsTable::new(vec!["HRV_RMSSD".into(), "segment_name".into()]);
        metrics
            .push_row(vec![25.0.into(), "baseline".into()])
            .unwrap();
        RoleOutput {
            role,
            parameters: ParameterSet::default(),
            metrics,
            signal,
            segment_names: vec![Some("baseline".into()), Some("baseline".into()), None],
            diagnostics: RoleDiagnostics {
                skipped_segments: vec!["book_reading".into()],
                skipped_windows: vec![],
            },
            plot_requests: vec![],
        }
    }

    #[test]
    fn writes_every_file_of_both_roles() {
        let dir = tempfile::tempdir().unwrap();
        let output = DyadOutput {
            identity: SubjectIdentity {
                condition: 'B',
                subject_id: 1,
                wave: "W1".into(),
            },
            child: role_output(Role::Child),
            mother: role_output(Role::Mother),
        };
        let dyad = write_dyad_outputs(dir.path(), &output).unwrap();
        assert_eq!(dyad, dir.path().join("B_1_W1"));
        for name in [
            "B1_W1_child_hrv.csv",
            "B1_W1_mother_hrv.csv",
            "B1_W1_child_signal.tsv",
            "child_params.toml",
            "mother_diagnostics.json",
        ] {
            assert!(dyad.join(name).is_file(), "{name}");
        }
        let params = ParameterSet::load(&dyad.join("child_params.toml")).unwrap();
        assert_eq!(params, ParameterSet::default());
        let json = std::fs::read_to_string(dyad.join("child_diagnostics.json")).unwrap();
        let back: RoleDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.skipped_segments, vec!["book_reading".to_string()]);
    }

    #[test]
    fn signal_rows_carry_segment_and_identity() {
        let identity = SubjectIdentity {
            condition: 'C',
            subject_id: 7,
            wave: "WX".into(),
        };
        let table = signal_table(&role_output(Role::Mother), &identity).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.columns().len(), SIGNAL_COLUMNS.len());
        let row = &table.rows()[1];
        assert_eq!(row[3], Cell::Number(1.0));
        assert_eq!(row[4], Cell::Number(0.5));
        assert_eq!(row[7], Cell::from("baseline"));
        assert_eq!(row[8], Cell::from("mother"));
        assert_eq!(table.rows()[2][7], Cell::Missing);
        assert_eq!(table.rows()[0][6], Cell::from("baseline"));
    }
}
