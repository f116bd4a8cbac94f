use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::DyadError;
use crate::table::{EventMarker, EventTable, IndexUnit, SignalEventTable, SignalTable};

pub const ECG_TIME_COLUMN: &str = "Time (s)";
pub const CHILD_ECG_COLUMN: &str = "MWCHILD_Bio";
pub const MOTHER_ECG_COLUMN: &str = "MOTHER_Bio";
pub const ACQUISITION_START: &str = "Acquisition Start";

fn skip_banner<R: BufRead>(reader: &mut R, source: &str) -> Result<()> {
    let mut banner = String::new();
    reader
        .read_line(&mut banner)
        .with_context(|| format!("reading banner line of {source}"))?;
    Ok(())
}

fn numeric_field(record: &StringRecord, idx: usize, column: &str) -> Result<f64, DyadError> {
    let raw = record.get(idx).unwrap_or("").trim();
    raw.parse::<f64>().map_err(|_| DyadError::ColumnType {
        column: column.to_string(),
        value: raw.to_string(),
    })
}

/// Parse a tab-delimited two-channel ECG export (banner line, then a header row).
/// The index is `Time (s)`, in seconds.
pub fn read_ecg<R: BufRead>(mut reader: R, source: &str) -> Result<SignalTable> {
    skip_banner(&mut reader, source)?;
    let mut csv = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = csv
        .headers()
        .with_context(|| format!("reading header of {source}"))?
        .clone();
    let column = |name: &str| -> Result<usize, DyadError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| DyadError::MissingColumn {
                column: name.to_string(),
                table: source.to_string(),
            })
    };
    let time_idx = column(ECG_TIME_COLUMN)?;
    let child_idx = column(CHILD_ECG_COLUMN)?;
    let mother_idx = column(MOTHER_ECG_COLUMN)?;

    let mut index = Vec::new();
    let mut child = Vec::new();
    let mut mother = Vec::new();
    for (row, record) in csv.records().enumerate() {
        let record = record.with_context(|| format!("reading row {} of {source}", row + 1))?;
        index.push(numeric_field(&record, time_idx, ECG_TIME_COLUMN)?);
        child.push(numeric_field(&record, child_idx, CHILD_ECG_COLUMN)?);
        mother.push(numeric_field(&record, mother_idx, MOTHER_ECG_COLUMN)?);
    }
    Ok(SignalTable::new(IndexUnit::Seconds, index, child, mother)?)
}

/// Parse a tab-delimited event log. After the banner, the first row must have three
/// fields, one of them `Acquisition Start`; every following row is
/// `event, event_description, timestamp_ms`.
pub fn read_events<R: BufRead>(mut reader: R, source: &str) -> Result<EventTable> {
    skip_banner(&mut reader, source)?;
    let mut csv = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = csv
        .headers()
        .with_context(|| format!("reading header of {source}"))?
        .clone();
    if !headers.iter().any(|h| h.trim() == ACQUISITION_START) {
        return Err(DyadError::MissingColumn {
            column: ACQUISITION_START.to_string(),
            table: source.to_string(),
        }
        .into());
    }
    if headers.len() != 3 {
        bail!(
            "event file {source} should have 3 columns, found {}",
            headers.len()
        );
    }

    let mut markers = Vec::new();
    for (row, record) in csv.records().enumerate() {
        let record = record.with_context(|| format!("reading row {} of {source}", row + 1))?;
        if record.len() != 3 {
            bail!(
                "row {} of {source} has {} fields, expected 3",
                row + 1,
                record.len()
            );
        }
        markers.push(EventMarker {
            event: record[0].to_string(),
            event_description: record[1].trim().to_string(),
            timestamp: numeric_field(&record, 2, "timestamp_ms")?,
        });
    }
    Ok(EventTable::new(IndexUnit::Milliseconds, markers))
}

pub fn load_ecg_file(path: &Path) -> Result<SignalTable> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_ecg(BufReader::new(file), &path.display().to_string())
}

pub fn load_event_file(path: &Path) -> Result<EventTable> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_events(BufReader::new(file), &path.display().to_string())
}

/// Load both files of a dyad, bring the ECG index to milliseconds and merge the
/// events onto it.
pub fn load_dyad_table(ecg_path: &Path, event_path: &Path, fs: f64) -> Result<SignalEventTable> {
    let ecg = load_ecg_file(ecg_path)?;
    let events = load_event_file(event_path)?;
    let ecg = ecg
        .to_unit(events.unit(), fs)
        .with_context(|| format!("converting index of {}", ecg_path.display()))?;
    let merged = SignalEventTable::merge(&ecg, &events).with_context(|| {
        format!(
            "merging {} onto {}",
            event_path.display(),
            ecg_path.display()
        )
    })?;
    Ok(merged)
}

/// Sorted `*mc.txt` files paired by position with sorted `*event.txt` files.
pub fn pair_recordings(dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut ecg_files = Vec::new();
    let mut event_files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if name.ends_with("mc.txt") {
            ecg_files.push(path);
        } else if name.ends_with("event.txt") {
            event_files.push(path);
        }
    }
    if ecg_files.len() != event_files.len() {
        bail!(
            "{} has {} ECG files but {} event files",
            dir.display(),
            ecg_files.len(),
            event_files.len()
        );
    }
    ecg_files.sort();
    event_files.sort();
    Ok(ecg_files.into_iter().zip(event_files).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Role;
    use crate::table::Timeline;
    use std::io::Cursor;

    const ECG: &str = "Exported by acquisition software\n\
        Time (s)\tMWCHILD_Bio\tMOTHER_Bio\tEXTRA\n\
        0.000\t0.1\t1.1\t9\n\
        0.002\t0.2\t1.2\t9\n\
        0.004\t0.3\t1.3\t9\n";

    const EVENTS: &str = "Event log\n\
        E0\tAcquisition Start\t0\n\
        E1\t  baseline resting start \t2\n\
        E2\tBook start\t4\n";

    #[test]
    fn parses_ecg_export() {
        let table = read_ecg(Cursor::new(ECG), "mem").unwrap();
        assert_eq!(table.unit(), IndexUnit::Seconds);
        assert_eq!(table.index(), &[0.0, 0.002, 0.004]);
        assert_eq!(table.channel(Role::Mother), &[1.1, 1.2, 1.3]);
    }

    #[test]
    fn missing_ecg_column_is_named() {
        let text = "banner\nTime (s)\tMWCHILD_Bio\n0\t1\n";
        let err = read_ecg(Cursor::new(text), "mem").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DyadError>(),
            Some(DyadError::MissingColumn { column, .. }) if column == MOTHER_ECG_COLUMN
        ));
    }

    #[test]
    fn non_numeric_sample_is_a_type_error() {
        let text = "banner\nTime (s)\tMWCHILD_Bio\tMOTHER_Bio\n0\tabc\t1\n";
        let err = read_ecg(Cursor::new(text), "mem").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DyadError>(),
            Some(DyadError::ColumnType { .. })
        ));
    }

    #[test]
    fn parses_event_log_and_trims_descriptions() {
        let events = read_events(Cursor::new(EVENTS), "mem").unwrap();
        assert_eq!(events.unit(), IndexUnit::Milliseconds);
        assert_eq!(events.markers().len(), 2);
        assert_eq!(events.markers()[0].event_description, "baseline resting start");
        assert_eq!(events.markers()[1].timestamp, 4.0);
    }

    #[test]
    fn event_log_needs_acquisition_start() {
        let text = "banner\nE0\tStart\t0\nE1\tx\t2\n";
        assert!(read_events(Cursor::new(text), "mem").is_err());
        let wide = "banner\nE0\tAcquisition Start\t0\textra\n";
        assert!(read_events(Cursor::new(wide), "mem").is_err());
    }

    #[test]
    fn dyad_files_merge_in_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        let ecg = dir.path().join("B01_W1_mc.txt");
        let events = dir.path().join("B01_W1_event.txt");
        std::fs::write(&ecg, ECG).unwrap();
        std::fs::write(&events, EVENTS).unwrap();
        let table = load_dyad_table(&ecg, &events, 500.0).unwrap();
        assert_eq!(table.unit(), IndexUnit::Milliseconds);
        assert_eq!(table.index(), &[0.0, 2.0, 4.0]);
        assert_eq!(
            table.event_descriptions()[1].as_deref(),
            Some("baseline resting start")
        );
        assert_eq!(table.event_descriptions()[2].as_deref(), Some("Book start"));
    }

    #[test]
    fn pairs_sorted_recordings() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["B02_W1_mc.txt", "B01_W1_mc.txt", "B02_W1_event.txt", "B01_W1_event.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::write(dir.path().join("notes.md"), "").unwrap();
        let pairs = pair_recordings(dir.path()).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].0.ends_with("B01_W1_mc.txt"));
        assert!(pairs[0].1.ends_with("B01_W1_event.txt"));

        std::fs::write(dir.path().join("B03_W1_mc.txt"), "").unwrap();
        assert!(pair_recordings(dir.path()).is_err());
    }
}
