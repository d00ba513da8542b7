// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Column-oriented confound regressor table.

Every column has one value per volume of the functional series. The table
also records how many leading rows belong to non-steady-state volumes.

TSV output is tab separated with a header row, values written with ten
decimals and non-finite values written as `n/a`.
*/

use crate::error::{Component, ConfoundError, ConfoundResult};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfoundsTable {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    n_rows: usize,
    leading_skipped: usize,
}

impl ConfoundsTable {
    /// Empty table with a fixed number of rows
    pub fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            ..Self::default()
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn leading_skipped(&self) -> usize {
        self.leading_skipped
    }

    pub fn with_leading_skipped(mut self, skipped: usize) -> Self {
        self.leading_skipped = skipped.min(self.n_rows);
        self
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Append a column. Names must be unique and lengths must match.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> ConfoundResult<()> {
        let name = name.into();
        if values.len() != self.n_rows {
            return Err(ConfoundError::invalid(
                Component::ConfoundsTable,
                name,
                format!("column has {} rows, table has {}", values.len(), self.n_rows),
            ));
        }
        if self.names.contains(&name) {
            return Err(ConfoundError::invalid(
                Component::ConfoundsTable,
                name,
                "duplicate column name",
            ));
        }
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Columns of `self` followed by the columns of `other`. The result keeps
    /// the larger leading-skip count.
    pub fn hstack(mut self, other: ConfoundsTable) -> ConfoundResult<ConfoundsTable> {
        if self.names.is_empty() && self.n_rows == 0 {
            return Ok(other);
        }
        if other.n_rows != self.n_rows {
            return Err(ConfoundError::invalid(
                Component::ConfoundsTable,
                "hstack",
                format!("row counts differ: {} vs {}", self.n_rows, other.n_rows),
            ));
        }
        self.leading_skipped = self.leading_skipped.max(other.leading_skipped);
        for (name, values) in other.names.into_iter().zip(other.columns) {
            self.push_column(name, values)?;
        }
        Ok(self)
    }

    pub fn to_tsv_string(&self) -> String {
        let mut out = self.names.join("\t");
        out.push('\n');
        for row in 0..self.n_rows {
            for (i, column) in self.columns.iter().enumerate() {
                if i > 0 {
                    out.push('\t');
                }
                push_value(&mut out, column[row]);
            }
            out.push('\n');
        }
        out
    }

    pub fn write_tsv(&self, path: impl AsRef<Path>) -> ConfoundResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_tsv_string()).map_err(|e| ConfoundError::Output {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

pub(crate) fn push_value(out: &mut String, value: f64) {
    if value.is_finite() {
        let _ = write!(out, "{:.10}", value);
    } else {
        out.push_str("n/a");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_lookup() {
        let mut table = ConfoundsTable::new(3);
        table.push_column("white_matter", vec![1.0, 2.0, 3.0]).unwrap();
        table.push_column("csf", vec![0.5, 0.5, 0.5]).unwrap();
        assert_eq!(table.column_names(), &["white_matter", "csf"]);
        assert_eq!(table.column("csf"), Some(&[0.5, 0.5, 0.5][..]));
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn test_rejects_duplicates_and_wrong_lengths() {
        let mut table = ConfoundsTable::new(2);
        table.push_column("a", vec![0.0, 1.0]).unwrap();
        assert!(table.push_column("a", vec![0.0, 1.0]).is_err());
        assert!(table.push_column("b", vec![0.0]).is_err());
    }

    #[test]
    fn test_hstack_keeps_order_and_skip_flag() {
        let mut left = ConfoundsTable::new(2);
        left.push_column("white_matter", vec![1.0, 2.0]).unwrap();
        let mut right = ConfoundsTable::new(2).with_leading_skipped(1);
        right.push_column("a_comp_cor_00", vec![0.0, 0.3]).unwrap();

        let table = left.hstack(right).unwrap();
        assert_eq!(table.column_names(), &["white_matter", "a_comp_cor_00"]);
        assert_eq!(table.leading_skipped(), 1);
    }

    #[test]
    fn test_tsv_format() {
        let mut table = ConfoundsTable::new(2);
        table.push_column("a", vec![1.0, f64::NAN]).unwrap();
        table.push_column("b", vec![-0.25, 2.0]).unwrap();
        assert_eq!(
            table.to_tsv_string(),
            "a\tb\n1.0000000000\t-0.2500000000\nn/a\t2.0000000000\n"
        );
    }
}
