// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Responsibilities:
//! - `Dataset`: an ordered, fixed-width batch of `Data` columns with equal
//!   row counts. Batches travel across stages and the network without
//!   synchronization, so every operation except `swap_rows`, `sort` and the
//!   builder-side `copy_at_row` derives a new value.
//! - In-place multi-key sort by `SortingCol`s, applied through row swaps.
//! - Cross-batch row comparison (`row_less`) for the k-way merge, and
//!   per-row string keys for hash partitioning.
//!
//! Sorting is not stable: rows with equal keys keep no particular relative
//! order.

use std::cmp::Ordering;

use crate::exec::data::{Data, SortingCol};

/// Separator between column renderings inside one partition key. Chosen
/// outside the printable range so composite keys cannot collide.
const KEY_SEP: char = '\u{1f}';

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    columns: Vec<Box<dyn Data>>,
}

impl Dataset {
    pub fn new(columns: Vec<Box<dyn Data>>) -> Self {
        if let Some(first) = columns.first() {
            debug_assert!(
                columns.iter().all(|c| c.len() == first.len()),
                "columns of one dataset must have equal row counts"
            );
        }
        Self { columns }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, i: usize) -> &dyn Data {
        self.columns[i].as_ref()
    }

    pub fn column_mut(&mut self, i: usize) -> &mut Box<dyn Data> {
        &mut self.columns[i]
    }

    pub fn columns(&self) -> &[Box<dyn Data>] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Box<dyn Data>> {
        self.columns
    }

    /// Derived batch over rows `[from, to)`.
    pub fn slice(&self, from: usize, to: usize) -> Dataset {
        Dataset {
            columns: self.columns.iter().map(|c| c.slice(from, to)).collect(),
        }
    }

    /// Row-wise concatenation: self's rows followed by `other`'s. Widths and
    /// column types must match.
    pub fn append(&self, other: &Dataset) -> Dataset {
        debug_assert_eq!(self.width(), other.width(), "append width mismatch");
        Dataset {
            columns: self
                .columns
                .iter()
                .zip(&other.columns)
                .map(|(a, b)| a.append(b.as_ref()))
                .collect(),
        }
    }

    /// Column-wise concatenation: self's columns followed by `other`'s.
    /// Both batches must carry the same number of rows.
    pub fn expand(&self, other: &Dataset) -> crate::common::error::Result<Dataset> {
        if self.width() > 0 && other.width() > 0 && self.len() != other.len() {
            return Err(crate::common::error::Error::MismatchedRows);
        }
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Ok(Dataset { columns })
    }

    /// New batch repeating all rows `times` times.
    pub fn duplicate(&self, times: usize) -> Dataset {
        Dataset {
            columns: self.columns.iter().map(|c| c.duplicate(times)).collect(),
        }
    }

    pub fn swap_rows(&mut self, i: usize, j: usize) {
        for col in &mut self.columns {
            col.swap(i, j);
        }
    }

    /// Overwrite row `to_row` with row `from_row` of `from`, column by
    /// column. Builder-side only.
    pub fn copy_at_row(&mut self, from: &Dataset, from_row: usize, to_row: usize) {
        debug_assert_eq!(self.width(), from.width(), "copy_at_row width mismatch");
        for (dst, src) in self.columns.iter_mut().zip(&from.columns) {
            dst.copy_at(src.as_ref(), from_row, to_row);
        }
    }

    fn row_cmp(&self, i: usize, j: usize, cols: &[SortingCol]) -> Ordering {
        for key in cols {
            let col = self.column(key.index);
            let ord = if col.less(i, j) {
                Ordering::Less
            } else if col.less(j, i) {
                Ordering::Greater
            } else {
                Ordering::Equal
            };
            let ord = if key.desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// In-place multi-key sort. Computes the target permutation, then
    /// realizes it cycle by cycle through row swaps.
    pub fn sort(&mut self, cols: &[SortingCol]) {
        let n = self.len();
        if n < 2 || cols.is_empty() {
            return;
        }
        let mut perm: Vec<usize> = (0..n).collect();
        perm.sort_by(|&a, &b| self.row_cmp(a, b, cols));

        let mut visited = vec![false; n];
        for start in 0..n {
            if visited[start] || perm[start] == start {
                visited[start] = true;
                continue;
            }
            let mut i = start;
            loop {
                visited[i] = true;
                let j = perm[i];
                if j == start {
                    break;
                }
                self.swap_rows(i, j);
                i = j;
            }
        }
    }

    /// Concatenated string key per row over `cols`, for hash routing.
    pub fn key_strings(&self, cols: &[usize]) -> Vec<String> {
        let rendered: Vec<Vec<String>> = cols.iter().map(|&c| self.column(c).strings()).collect();
        (0..self.len())
            .map(|row| {
                let mut key = String::new();
                for (k, col) in rendered.iter().enumerate() {
                    if k > 0 {
                        key.push(KEY_SEP);
                    }
                    key.push_str(&col[row]);
                }
                key
            })
            .collect()
    }
}

/// Row `ai` of `a` against row `bi` of `b` under `cols`. Equal keys are not
/// ordered either way.
pub fn row_less(a: &Dataset, ai: usize, b: &Dataset, bi: usize, cols: &[SortingCol]) -> bool {
    for key in cols {
        let ca = a.column(key.index);
        let cb = b.column(key.index);
        let less = ca.less_other(ai, cb, bi);
        let greater = cb.less_other(bi, ca, ai);
        if less == greater {
            continue;
        }
        return if key.desc { greater } else { less };
    }
    false
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.equal(b.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::data::{NullData, StringsData};

    fn strings_batch(cols: &[&[&str]]) -> Dataset {
        Dataset::new(
            cols.iter()
                .map(|c| Box::new(StringsData::from_slice(c)) as Box<dyn Data>)
                .collect(),
        )
    }

    #[test]
    fn append_adds_lengths_without_mutation() {
        let a = strings_batch(&[&["a", "b"]]);
        let b = strings_batch(&[&["c"]]);
        let joined = a.append(&b);
        assert_eq!(joined.len(), a.len() + b.len());
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert_eq!(joined, strings_batch(&[&["a", "b", "c"]]));
    }

    #[test]
    fn expand_concatenates_columns() {
        let a = strings_batch(&[&["x", "y"]]);
        let b = strings_batch(&[&["1", "2"]]);
        let wide = a.expand(&b).expect("expand");
        assert_eq!(wide.width(), 2);
        assert_eq!(wide.len(), 2);
    }

    #[test]
    fn expand_rejects_unequal_row_counts() {
        let a = strings_batch(&[&["x", "y"]]);
        let b = strings_batch(&[&["1"]]);
        let err = a.expand(&b).unwrap_err();
        assert_eq!(err.to_string(), "mismatched number of rows");
    }

    #[test]
    fn sort_single_key() {
        let mut ds = strings_batch(&[&["c", "a", "d", "b"]]);
        ds.sort(&[SortingCol::ascending(0)]);
        assert_eq!(ds, strings_batch(&[&["a", "b", "c", "d"]]));
    }

    #[test]
    fn sort_descending() {
        let mut ds = strings_batch(&[&["c", "a", "d", "b"]]);
        ds.sort(&[SortingCol::descending(0)]);
        assert_eq!(ds, strings_batch(&[&["d", "c", "b", "a"]]));
    }

    #[test]
    fn sort_two_keys_keeps_rows_together() {
        let mut ds = strings_batch(&[&["b", "a", "b", "a"], &["2", "2", "1", "1"]]);
        ds.sort(&[SortingCol::ascending(0), SortingCol::ascending(1)]);
        assert_eq!(
            ds,
            strings_batch(&[&["a", "a", "b", "b"], &["1", "2", "1", "2"]])
        );
    }

    #[test]
    fn slice_is_derived_value() {
        let ds = strings_batch(&[&["a", "b", "c"]]);
        let mid = ds.slice(1, 2);
        assert_eq!(mid, strings_batch(&[&["b"]]));
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn row_less_across_batches() {
        let a = strings_batch(&[&["apple"]]);
        let b = strings_batch(&[&["pear"]]);
        let keys = [SortingCol::ascending(0)];
        assert!(row_less(&a, 0, &b, 0, &keys));
        assert!(!row_less(&b, 0, &a, 0, &keys));
        let keys_desc = [SortingCol::descending(0)];
        assert!(row_less(&b, 0, &a, 0, &keys_desc));
    }

    #[test]
    fn key_strings_join_columns() {
        let ds = strings_batch(&[&["a", "b"], &["1", "2"]]);
        let keys = ds.key_strings(&[0, 1]);
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
        assert!(keys[0].starts_with('a'));
        assert!(keys[0].ends_with('1'));
    }

    #[test]
    fn null_columns_mix_with_concrete_ones() {
        let ds = Dataset::new(vec![
            Box::new(StringsData::from_slice(&["a", "b"])) as Box<dyn Data>,
            Box::new(NullData::new(2)) as Box<dyn Data>,
        ]);
        assert_eq!(ds.width(), 2);
        assert_eq!(ds.len(), 2);
        let sliced = ds.slice(0, 1);
        assert_eq!(sliced.len(), 1);
        assert!(sliced.column(1).is_null(0));
    }
}
