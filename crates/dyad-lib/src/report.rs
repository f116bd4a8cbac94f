//! Row-oriented metrics tables: the per-subject HRV output and the input of the
//! screening pass.

use crate::error::DyadError;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Bool(bool),
    Missing,
}

impl Cell {
    /// Numeric value; NaN counts as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing) || matches!(self, Cell::Number(v) if v.is_nan())
    }

    /// Interpret a CSV field.
    pub fn parse(field: &str) -> Cell {
        let field = field.trim();
        if field.is_empty() {
            return Cell::Missing;
        }
        match field {
            "true" | "True" | "TRUE" => return Cell::Bool(true),
            "false" | "False" | "FALSE" => return Cell::Bool(false),
            _ => {}
        }
        match field.parse::<f64>() {
            Ok(v) if v.is_nan() => Cell::Missing,
            Ok(v) => Cell::Number(v),
            Err(_) => Cell::Text(field.to_string()),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Cell::Missing, Cell::Number)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(v) if v.is_nan() => Ok(()),
            Cell::Number(v) => write!(f, "{v}"),
            Cell::Text(s) => f.write_str(s),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Missing => Ok(()),
        }
    }
}

/// Named columns over rows of [`Cell`]s.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl MetricsTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), DyadError> {
        if row.len() != self.columns.len() {
            return Err(DyadError::InvalidParameter {
                name: "row".into(),
                reason: format!(
                    "has {} cells but the table has {} columns",
                    row.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Result<usize, DyadError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DyadError::MissingColumn {
                column: name.to_string(),
                table: "metrics table".into(),
            })
    }

    pub fn column(&self, name: &str) -> Result<Vec<&Cell>, DyadError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Values of a numeric column; missing and NaN cells map to `None`.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>, DyadError> {
        self.column(name)?
            .into_iter()
            .map(|cell| match cell {
                Cell::Number(_) | Cell::Missing => Ok(cell.as_f64()),
                other => Err(DyadError::ColumnType {
                    column: name.to_string(),
                    value: other.to_string(),
                }),
            })
            .collect()
    }

    /// Copy of the table with `name` set to `values`, appended when absent.
    pub fn with_column(&self, name: &str, values: Vec<Cell>) -> Result<MetricsTable, DyadError> {
        if values.len() != self.rows.len() {
            return Err(DyadError::InvalidParameter {
                name: name.to_string(),
                reason: format!(
                    "column has {} values for {} rows",
                    values.len(),
                    self.rows.len()
                ),
            });
        }
        let mut out = self.clone();
        match self.columns.iter().position(|c| c == name) {
            Some(idx) => {
                for (row, value) in out.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                out.columns.push(name.to_string());
                for (row, value) in out.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(out)
    }

    /// Row positions grouped by the rendered values of `keys`, groups in order of
    /// first appearance.
    pub fn group_rows(&self, keys: &[&str]) -> Result<Vec<Vec<usize>>, DyadError> {
        let key_idx = keys
            .iter()
            .map(|k| self.column_index(k))
            .collect::<Result<Vec<_>, _>>()?;
        let mut lookup: HashMap<Vec<String>, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (pos, row) in self.rows.iter().enumerate() {
            let key: Vec<String> = key_idx.iter().map(|&i| row[i].to_string()).collect();
            let group = *lookup.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(pos);
        }
        Ok(groups)
    }

    /// Stack tables; the column set is the union in order of first appearance and
    /// absent cells are missing.
    pub fn concat(tables: &[MetricsTable]) -> MetricsTable {
        let mut columns: Vec<String> = Vec::new();
        for table in tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        let mut out = MetricsTable::new(columns);
        for table in tables {
            let positions: Vec<Option<usize>> = out
                .columns
                .iter()
                .map(|c| table.columns.iter().position(|t| t == c))
                .collect();
            for row in &table.rows {
                out.rows.push(
                    positions
                        .iter()
                        .map(|pos| pos.map_or(Cell::Missing, |p| row[p].clone()))
                        .collect(),
                );
            }
        }
        out
    }

    pub fn write_delimited(&self, path: &Path, delimiter: u8) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| cell.to_string()))?;
        }
        writer
            .flush()
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        self.write_delimited(path, b',')
    }

    pub fn read_csv(path: &Path) -> Result<MetricsTable> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = MetricsTable::new(columns);
        for (line, record) in reader.records().enumerate() {
            let record = record
                .with_context(|| format!("reading row {} of {}", line + 1, path.display()))?;
            table.push_row(record.iter().map(Cell::parse).collect())?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MetricsTable {
        let mut t = MetricsTable::new(vec!["segment_name".into(), "HRV_RMSSD".into()]);
        t.push_row(vec!["rest".into(), 20.0.into()]).unwrap();
        t.push_row(vec!["task".into(), Cell::Missing]).unwrap();
        t.push_row(vec!["rest".into(), f64::NAN.into()]).unwrap();
        t
    }

    #[test]
    fn numeric_column_treats_nan_as_missing() {
        assert_eq!(
            table().numeric_column("HRV_RMSSD").unwrap(),
            vec![Some(20.0), None, None]
        );
        assert!(matches!(
            table().numeric_column("segment_name"),
            Err(DyadError::ColumnType { .. })
        ));
        assert!(matches!(
            table().numeric_column("nope"),
            Err(DyadError::MissingColumn { .. })
        ));
    }

    #[test]
    fn groups_follow_first_appearance() {
        assert_eq!(
            table().group_rows(&["segment_name"]).unwrap(),
            vec![vec![0, 2], vec![1]]
        );
    }

    #[test]
    fn with_column_leaves_source_untouched() {
        let source = table();
        let extended = source
            .with_column("flag", vec![true.into(), false.into(), true.into()])
            .unwrap();
        assert_eq!(source.columns().len(), 2);
        assert_eq!(extended.columns().len(), 3);
        assert!(source.with_column("flag", vec![]).is_err());
    }

    #[test]
    fn concat_unions_columns() {
        let mut other = MetricsTable::new(vec!["HRV_RMSSD".into(), "wave".into()]);
        other.push_row(vec![30.0.into(), "W1".into()]).unwrap();
        let all = MetricsTable::concat(&[table(), other]);
        assert_eq!(all.columns(), &["segment_name", "HRV_RMSSD", "wave"]);
        assert_eq!(all.len(), 4);
        assert_eq!(all.rows()[3][0], Cell::Missing);
        assert_eq!(all.rows()[0][2], Cell::Missing);
    }

    #[test]
    fn csv_round_trip_keeps_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let source = table()
            .with_column("ok", vec![true.into(), false.into(), true.into()])
            .unwrap();
        source.write_csv(&path).unwrap();
        let back = MetricsTable::read_csv(&path).unwrap();
        assert_eq!(back.columns(), source.columns());
        assert_eq!(
            back.rows()[0],
            vec![Cell::from("rest"), Cell::Number(20.0), Cell::Bool(true)]
        );
        assert_eq!(back.rows()[2][1], Cell::Missing);
    }
}
