//! Time-indexed tables shared by the loaders, the segmenter and the windowed engine.
//!
//! Every table carries the [`IndexUnit`] of its index. Converting between units is an
//! explicit call, and [`SignalEventTable::merge`] refuses inputs whose units differ.

use crate::analysis::SignalQuality;
use crate::error::DyadError;
use crate::params::Role;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Unit of a table's index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexUnit {
    Seconds,
    Milliseconds,
    Samples,
}

impl IndexUnit {
    /// Express a span given in seconds in this unit.
    pub fn from_seconds(&self, seconds: f64, fs: f64) -> f64 {
        match self {
            IndexUnit::Seconds => seconds,
            IndexUnit::Milliseconds => seconds * 1000.0,
            IndexUnit::Samples => seconds * fs,
        }
    }

    pub fn to_seconds(&self, value: f64, fs: f64) -> f64 {
        match self {
            IndexUnit::Seconds => value,
            IndexUnit::Milliseconds => value / 1000.0,
            IndexUnit::Samples => value / fs,
        }
    }

    /// Convert an index value to `target`, rounded to 1e-6 of the target unit so that
    /// decimal timestamps land on exact keys.
    pub fn convert(&self, value: f64, target: IndexUnit, fs: f64) -> f64 {
        if *self == target {
            return value;
        }
        let converted = target.from_seconds(self.to_seconds(value, fs), fs);
        (converted * 1e6).round() / 1e6
    }
}

impl fmt::Display for IndexUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexUnit::Seconds => "seconds",
            IndexUnit::Milliseconds => "milliseconds",
            IndexUnit::Samples => "samples",
        })
    }
}

/// Tables that can be segmented: an index with a declared unit plus event descriptions.
pub trait Timeline: Sized {
    fn unit(&self) -> IndexUnit;
    fn index(&self) -> &[f64];
    fn event_descriptions(&self) -> &[Option<String>];
    /// Rows at positions `range`, as a new table.
    fn slice(&self, range: Range<usize>) -> Self;

    fn len(&self) -> usize {
        self.index().len()
    }

    fn is_empty(&self) -> bool {
        self.index().is_empty()
    }
}

fn check_monotonic(index: &[f64], table: &str) -> Result<(), DyadError> {
    for (row, pair) in index.windows(2).enumerate() {
        if !(pair[1] > pair[0]) {
            return Err(DyadError::NonMonotonicIndex {
                table: table.to_string(),
                row: row + 1,
            });
        }
    }
    Ok(())
}

/// Continuous two-channel ECG recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalTable {
    unit: IndexUnit,
    index: Vec<f64>,
    child_ecg: Vec<f64>,
    mother_ecg: Vec<f64>,
}

impl SignalTable {
    pub fn new(
        unit: IndexUnit,
        index: Vec<f64>,
        child_ecg: Vec<f64>,
        mother_ecg: Vec<f64>,
    ) -> Result<Self, DyadError> {
        if child_ecg.len() != index.len() || mother_ecg.len() != index.len() {
            return Err(DyadError::InvalidParameter {
                name: "signal table".into(),
                reason: format!(
                    "column lengths differ (index {}, child {}, mother {})",
                    index.len(),
                    child_ecg.len(),
                    mother_ecg.len()
                ),
            });
        }
        check_monotonic(&index, "ECG table")?;
        Ok(Self {
            unit,
            index,
            child_ecg,
            mother_ecg,
        })
    }

    pub fn unit(&self) -> IndexUnit {
        self.unit
    }

    pub fn index(&self) -> &[f64] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn channel(&self, role: Role) -> &[f64] {
        match role {
            Role::Child => &self.child_ecg,
            Role::Mother => &self.mother_ecg,
        }
    }

    /// Re-express the index in `target`.
    pub fn to_unit(&self, target: IndexUnit, fs: f64) -> Result<SignalTable, DyadError> {
        let index = self
            .index
            .iter()
            .map(|&t| self.unit.convert(t, target, fs))
            .collect();
        SignalTable::new(
            target,
            index,
            self.child_ecg.clone(),
            self.mother_ecg.clone(),
        )
    }
}

/// One row of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMarker {
    pub timestamp: f64,
    pub event: String,
    pub event_description: String,
}

/// Sparse event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    unit: IndexUnit,
    markers: Vec<EventMarker>,
}

impl EventTable {
    pub fn new(unit: IndexUnit, markers: Vec<EventMarker>) -> Self {
        Self { unit, markers }
    }

    pub fn unit(&self) -> IndexUnit {
        self.unit
    }

    pub fn markers(&self) -> &[EventMarker] {
        &self.markers
    }

    pub fn to_unit(&self, target: IndexUnit, fs: f64) -> EventTable {
        let markers = self
            .markers
            .iter()
            .map(|m| EventMarker {
                timestamp: self.unit.convert(m.timestamp, target, fs),
                ..m.clone()
            })
            .collect();
        EventTable::new(target, markers)
    }
}

/// ECG samples with the event log merged onto them (left-outer on the index).
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEventTable {
    unit: IndexUnit,
    index: Vec<f64>,
    child_ecg: Vec<f64>,
    mother_ecg: Vec<f64>,
    event: Vec<Option<String>>,
    event_description: Vec<Option<String>>,
}

impl SignalEventTable {
    /// Attach each marker to the nearest sample.
    ///
    /// A marker snaps to the closest index value when it lies within half a sample
    /// period of it; an exact midpoint goes to the earlier sample. Markers further
    /// from every sample are dropped with a warning, as are later markers landing on
    /// a sample an earlier marker already holds, so the index stays unique.
    pub fn merge(signal: &SignalTable, events: &EventTable) -> Result<Self, DyadError> {
        if signal.unit() != events.unit() {
            return Err(DyadError::IndexUnitMismatch {
                left: signal.unit(),
                right: events.unit(),
            });
        }
        let mut event = vec![None; signal.len()];
        let mut event_description = vec![None; signal.len()];
        for marker in events.markers() {
            match nearest_row(&signal.index, marker.timestamp) {
                Some(row) if event[row].is_none() => {
                    if signal.index[row] != marker.timestamp {
                        debug!(
                            "event '{}' at {} {} snapped to {}",
                            marker.event_description,
                            marker.timestamp,
                            signal.unit(),
                            signal.index[row]
                        );
                    }
                    event[row] = Some(marker.event.clone());
                    event_description[row] = Some(marker.event_description.clone());
                }
                Some(_) => warn!(
                    "dropping event '{}' at {} {}: another event already occupies that sample",
                    marker.event_description,
                    marker.timestamp,
                    signal.unit()
                ),
                None => warn!(
                    "dropping event '{}' at {} {}: no sample within half a period",
                    marker.event_description,
                    marker.timestamp,
                    signal.unit()
                ),
            }
        }
        Ok(Self {
            unit: signal.unit,
            index: signal.index.clone(),
            child_ecg: signal.child_ecg.clone(),
            mother_ecg: signal.mother_ecg.clone(),
            event,
            event_description,
        })
    }

    pub fn channel(&self, role: Role) -> &[f64] {
        match role {
            Role::Child => &self.child_ecg,
            Role::Mother => &self.mother_ecg,
        }
    }

    pub fn events(&self) -> &[Option<String>] {
        &self.event
    }
}

/// Row whose index is closest to `timestamp`, if it lies within half the sample period.
fn nearest_row(index: &[f64], timestamp: f64) -> Option<usize> {
    let upper = index.partition_point(|&t| t < timestamp);
    let row = match (upper.checked_sub(1), index.get(upper)) {
        (Some(lower), Some(&next)) => {
            if timestamp - index[lower] <= next - timestamp {
                lower
            } else {
                upper
            }
        }
        (Some(lower), None) => lower,
        (None, Some(_)) => upper,
        (None, None) => return None,
    };
    let distance = (index[row] - timestamp).abs();
    if distance == 0.0 {
        return Some(row);
    }
    let period = match index {
        [first, second, ..] => second - first,
        _ => return None,
    };
    (distance <= period / 2.0 + period * 1e-9).then_some(row)
}

impl Timeline for SignalEventTable {
    fn unit(&self) -> IndexUnit {
        self.unit
    }

    fn index(&self) -> &[f64] {
        &self.index
    }

    fn event_descriptions(&self) -> &[Option<String>] {
        &self.event_description
    }

    fn slice(&self, range: Range<usize>) -> Self {
        Self {
            unit: self.unit,
            index: self.index[range.clone()].to_vec(),
            child_ecg: self.child_ecg[range.clone()].to_vec(),
            mother_ecg: self.mother_ecg[range.clone()].to_vec(),
            event: self.event[range.clone()].to_vec(),
            event_description: self.event_description[range].to_vec(),
        }
    }
}

/// Preprocessed ECG of one role: raw and cleaned samples, R-peak flags, signal
/// quality and the event columns, on the recording's index.
#[derive(Debug, Clone, PartialEq)]
pub struct EcgSignalTable {
    pub unit: IndexUnit,
    pub index: Vec<f64>,
    pub raw: Vec<f64>,
    pub clean: Vec<f64>,
    pub r_peaks: Vec<bool>,
    pub quality: SignalQuality,
    pub event: Vec<Option<String>>,
    pub event_description: Vec<Option<String>>,
}

impl EcgSignalTable {
    /// Positions (relative to this table) of the detected R-peaks.
    pub fn peak_positions(&self) -> Vec<usize> {
        self.r_peaks
            .iter()
            .enumerate()
            .filter_map(|(i, &peak)| peak.then_some(i))
            .collect()
    }

    pub fn peak_count(&self) -> usize {
        self.r_peaks.iter().filter(|&&peak| peak).count()
    }
}

impl Timeline for EcgSignalTable {
    fn unit(&self) -> IndexUnit {
        self.unit
    }

    fn index(&self) -> &[f64] {
        &self.index
    }

    fn event_descriptions(&self) -> &[Option<String>] {
        &self.event_description
    }

    fn slice(&self, range: Range<usize>) -> Self {
        Self {
            unit: self.unit,
            index: self.index[range.clone()].to_vec(),
            raw: self.raw[range.clone()].to_vec(),
            clean: self.clean[range.clone()].to_vec(),
            r_peaks: self.r_peaks[range.clone()].to_vec(),
            quality: self.quality.slice(range.clone()),
            event: self.event[range.clone()].to_vec(),
            event_description: self.event_description[range].to_vec(),
        }
    }
}
