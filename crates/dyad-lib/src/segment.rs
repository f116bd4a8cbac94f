//! Event alignment and recipe-driven segmentation.

use crate::error::DyadError;
use crate::params::{EventRef, SegmentSpec};
use crate::table::Timeline;
use log::{debug, warn};

/// Absolute onset of `event_ref` in the table's index unit.
///
/// Numbers, and strings that parse as numbers, are returned verbatim. Any other
/// string must equal the `event_description` of exactly one row.
pub fn resolve_time<T: Timeline>(event_ref: &EventRef, table: &T) -> Result<f64, DyadError> {
    let name = match event_ref {
        EventRef::Time(t) => return Ok(*t),
        EventRef::Name(name) => name,
    };
    if let Ok(t) = name.trim().parse::<f64>() {
        return Ok(t);
    }
    let rows: Vec<usize> = table
        .event_descriptions()
        .iter()
        .enumerate()
        .filter_map(|(row, desc)| (desc.as_deref() == Some(name.as_str())).then_some(row))
        .collect();
    match rows.as_slice() {
        [row] => Ok(table.index()[*row]),
        _ => Err(DyadError::AmbiguousOrMissingEvent {
            event: name.clone(),
            matches: rows.len(),
        }),
    }
}

/// A named excerpt `onset <= t < offset` of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment<T> {
    /// Recipe entry that produced the segment.
    pub name: String,
    /// `event_description` of the first row, or `name` when that row has none.
    pub label: String,
    pub onset: f64,
    /// Exclusive upper bound.
    pub offset: f64,
    pub table: T,
}

/// Cut `table` into the segments of `recipe`, in recipe order. Empty segments are
/// skipped with a warning.
pub fn segment<T: Timeline>(
    table: &T,
    recipe: &[SegmentSpec],
    sampling_frequency: f64,
) -> Result<Vec<Segment<T>>, DyadError> {
    let unit = table.unit();
    let sample_period = unit.from_seconds(1.0 / sampling_frequency, sampling_frequency);
    let index = table.index();
    let mut segments = Vec::with_capacity(recipe.len());
    for spec in recipe {
        let onset = resolve_time(&spec.event_onset, table)?;
        let offset = onset + unit.from_seconds(spec.duration, sampling_frequency) - sample_period;
        let start = index.partition_point(|&t| t < onset);
        let end = index.partition_point(|&t| t < offset).max(start);
        if start == end {
            warn!(
                "segment '{}' (onset {} {unit}, offset {} {unit}) is empty; skipping",
                spec.name, onset, offset
            );
            continue;
        }
        let slice = table.slice(start..end);
        let label = slice
            .event_descriptions()
            .first()
            .cloned()
            .flatten()
            .unwrap_or_else(|| spec.name.clone());
        debug!(
            "segment '{}' -> '{}': rows {}..{} ({} samples)",
            spec.name,
            label,
            start,
            end,
            end - start
        );
        segments.push(Segment {
            name: spec.name.clone(),
            label,
            onset,
            offset,
            table: slice,
        });
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{EventMarker, EventTable, IndexUnit, SignalEventTable, SignalTable};

    fn table_ms(rows: usize, markers: Vec<(f64, &str)>) -> SignalEventTable {
        let index: Vec<f64> = (0..rows).map(|i| i as f64 * 2.0).collect();
        let signal =
            SignalTable::new(IndexUnit::Milliseconds, index, vec![0.0; rows], vec![0.0; rows])
                .unwrap();
        let events = EventTable::new(
            IndexUnit::Milliseconds,
            markers
                .into_iter()
                .map(|(timestamp, desc)| EventMarker {
                    timestamp,
                    event: "E".into(),
                    event_description: desc.into(),
                })
                .collect(),
        );
        SignalEventTable::merge(&signal, &events).unwrap()
    }

    #[test]
    fn numeric_references_are_verbatim() {
        let table = table_ms(10, vec![]);
        assert_eq!(resolve_time(&EventRef::Time(7.5), &table).unwrap(), 7.5);
        assert_eq!(resolve_time(&EventRef::from("12"), &table).unwrap(), 12.0);
    }

    #[test]
    fn named_reference_needs_exactly_one_match() {
        let table = table_ms(10, vec![(4.0, "start"), (8.0, "repeat"), (10.0, "repeat")]);
        assert_eq!(resolve_time(&EventRef::from("start"), &table).unwrap(), 4.0);
        let missing = resolve_time(&EventRef::from("Start"), &table).unwrap_err();
        assert!(matches!(
            missing,
            DyadError::AmbiguousOrMissingEvent { matches: 0, .. }
        ));
        let ambiguous = resolve_time(&EventRef::from("repeat"), &table).unwrap_err();
        assert!(matches!(
            ambiguous,
            DyadError::AmbiguousOrMissingEvent { matches: 2, .. }
        ));
    }

    #[test]
    fn bounds_exclude_the_last_sample_period() {
        let table = table_ms(200_001, vec![(100.0, "onset")]);
        let recipe = [SegmentSpec::new("task", 100.0, 300.0)];
        let segments = segment(&table, &recipe, 500.0).unwrap();
        assert_eq!(segments.len(), 1);
        let seg = &segments[0];
        assert_eq!(seg.offset, 300_098.0);
        assert_eq!(seg.table.index()[0], 100.0);
        assert_eq!(seg.table.index().last().copied(), Some(300_096.0));
        assert_eq!(seg.table.len(), 149_999);
        assert_eq!(seg.label, "onset");
    }

    #[test]
    fn empty_segments_are_skipped_and_order_kept() {
        let table = table_ms(1000, vec![(0.0, "first"), (1000.0, "second")]);
        let recipe = [
            SegmentSpec::new("b", "second", 0.5),
            SegmentSpec::new("late", 5000.0, 1.0),
            SegmentSpec::new("a", "first", 0.5),
        ];
        let segments = segment(&table, &recipe, 500.0).unwrap();
        let names: Vec<&str> = segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(segments[0].label, "second");
        // 500 ms minus one 2 ms period, exclusive: 249 samples
        assert_eq!(segments[1].table.len(), 249);
    }

    #[test]
    fn label_falls_back_to_recipe_name() {
        let table = table_ms(100, vec![]);
        let segments = segment(&table, &[SegmentSpec::new("rest", 20.0, 0.1)], 500.0).unwrap();
        assert_eq!(segments[0].label, "rest");
    }

    #[test]
    fn unknown_event_is_fatal() {
        let table = table_ms(100, vec![]);
        assert!(segment(&table, &[SegmentSpec::new("x", "nowhere", 1.0)], 500.0).is_err());
    }
}
