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
//! - The k-way merge behind sorted merge-gather: one cursor per source,
//!   minimal row selected by the ordering columns, copied into a fixed
//!   1000-row builder batch, partial final batch at end of stream.
//! - Sources are pulled lazily through `BatchSource`, so the algorithm is
//!   independent of where batches come from; the exchange layer adapts its
//!   connections to this trait.
//!
//! Precondition: every source delivers rows already sorted by the same
//! ordering columns. Ties between equal keys are broken arbitrarily.

use crate::common::error::Result;
use crate::exec::data::SortingCol;
use crate::exec::dataset::{Dataset, row_less};

/// Rows per emitted batch.
pub const MERGE_BATCH_ROWS: usize = 1000;

/// Cursor position marking a finished source.
const EXHAUSTED: usize = usize::MAX;

/// Pull side of one merge input. `Ok(None)` is end-of-stream.
pub trait BatchSource {
    fn next_batch(&mut self) -> Result<Option<Dataset>>;
}

struct Cursor<'a> {
    source: Box<dyn BatchSource + 'a>,
    batch: Dataset,
    row: usize,
}

fn next_non_empty(source: &mut dyn BatchSource) -> Result<Option<Dataset>> {
    loop {
        match source.next_batch()? {
            Some(batch) if batch.is_empty() => continue,
            other => return Ok(other),
        }
    }
}

/// Merge pre-sorted sources into batches of at most `MERGE_BATCH_ROWS` rows,
/// handing each finished batch to `emit` in globally sorted order.
pub fn merge_sorted<'a, F>(
    sources: Vec<Box<dyn BatchSource + 'a>>,
    cols: &[SortingCol],
    mut emit: F,
) -> Result<()>
where
    F: FnMut(Dataset) -> Result<()>,
{
    let mut cursors = Vec::with_capacity(sources.len());
    for mut source in sources {
        let cursor = match next_non_empty(source.as_mut())? {
            Some(batch) => Cursor {
                source,
                batch,
                row: 0,
            },
            None => Cursor {
                source,
                batch: Dataset::default(),
                row: EXHAUSTED,
            },
        };
        cursors.push(cursor);
    }

    let mut builder: Option<Dataset> = None;
    let mut fill = 0usize;

    loop {
        let mut min: Option<usize> = None;
        for (i, cursor) in cursors.iter().enumerate() {
            if cursor.row == EXHAUSTED {
                continue;
            }
            min = match min {
                None => Some(i),
                Some(m) => {
                    let lead = &cursors[m];
                    if row_less(&cursor.batch, cursor.row, &lead.batch, lead.row, cols) {
                        Some(i)
                    } else {
                        Some(m)
                    }
                }
            };
        }
        let Some(i) = min else {
            break;
        };

        {
            let row = cursors[i].row;
            let proto = &cursors[i].batch;
            let buf = builder
                .get_or_insert_with(|| proto.slice(row, row + 1).duplicate(MERGE_BATCH_ROWS));
            buf.copy_at_row(proto, row, fill);
            fill += 1;
        }
        if fill == MERGE_BATCH_ROWS
            && let Some(full) = builder.take()
        {
            emit(full)?;
            fill = 0;
        }

        let cursor = &mut cursors[i];
        cursor.row += 1;
        if cursor.row >= cursor.batch.len() {
            match next_non_empty(cursor.source.as_mut())? {
                Some(next) => {
                    cursor.batch = next;
                    cursor.row = 0;
                }
                None => {
                    cursor.batch = Dataset::default();
                    cursor.row = EXHAUSTED;
                }
            }
        }
    }

    if fill > 0
        && let Some(buf) = builder.take()
    {
        emit(buf.slice(0, fill))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::common::error::Error;
    use crate::exec::data::{Data, StringsData};
    use crate::exec::runner::testing::strings_batch;

    struct VecSource(VecDeque<Dataset>);

    impl VecSource {
        fn new(batches: Vec<Dataset>) -> Box<dyn BatchSource> {
            Box::new(Self(batches.into()))
        }
    }

    impl BatchSource for VecSource {
        fn next_batch(&mut self) -> Result<Option<Dataset>> {
            Ok(self.0.pop_front())
        }
    }

    fn merged_values(sources: Vec<Box<dyn BatchSource>>, cols: &[SortingCol]) -> Vec<String> {
        let mut out = Vec::new();
        merge_sorted(sources, cols, |batch| {
            out.extend(batch.column(0).strings());
            Ok(())
        })
        .expect("merge");
        out
    }

    #[test]
    fn two_sources_merge_globally_sorted() {
        let sources = vec![
            VecSource::new(vec![strings_batch(&["a", "c", "e"])]),
            VecSource::new(vec![strings_batch(&["b", "d"])]),
        ];
        let got = merged_values(sources, &[SortingCol::ascending(0)]);
        assert_eq!(got, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn descending_order_is_honored() {
        let sources = vec![
            VecSource::new(vec![strings_batch(&["e", "c", "a"])]),
            VecSource::new(vec![strings_batch(&["d", "b"])]),
        ];
        let got = merged_values(sources, &[SortingCol::descending(0)]);
        assert_eq!(got, vec!["e", "d", "c", "b", "a"]);
    }

    #[test]
    fn merge_crosses_batch_boundaries() {
        let sources = vec![
            VecSource::new(vec![strings_batch(&["a", "b"]), strings_batch(&["e"])]),
            VecSource::new(vec![strings_batch(&["c", "d"])]),
        ];
        let got = merged_values(sources, &[SortingCol::ascending(0)]);
        assert_eq!(got, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn empty_batches_are_skipped() {
        let sources = vec![
            VecSource::new(vec![
                strings_batch(&[]),
                strings_batch(&["a"]),
                strings_batch(&[]),
                strings_batch(&["c"]),
            ]),
            VecSource::new(vec![strings_batch(&["b"])]),
        ];
        let got = merged_values(sources, &[SortingCol::ascending(0)]);
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn all_empty_sources_emit_nothing() {
        let sources = vec![
            VecSource::new(vec![strings_batch(&[])]),
            VecSource::new(vec![]),
        ];
        let mut batches = 0;
        merge_sorted(sources, &[SortingCol::ascending(0)], |_| {
            batches += 1;
            Ok(())
        })
        .expect("merge");
        assert_eq!(batches, 0);
    }

    #[test]
    fn secondary_key_breaks_primary_ties() {
        fn two_col(rows: &[(&str, &str)]) -> Dataset {
            let first = StringsData::new(rows.iter().map(|(a, _)| a.to_string()).collect());
            let second = StringsData::new(rows.iter().map(|(_, b)| b.to_string()).collect());
            Dataset::new(vec![Box::new(first) as Box<dyn Data>, Box::new(second)])
        }
        let sources = vec![
            VecSource::new(vec![two_col(&[("a", "1"), ("b", "1")])]),
            VecSource::new(vec![two_col(&[("a", "2"), ("b", "0")])]),
        ];
        let cols = [SortingCol::ascending(0), SortingCol::ascending(1)];
        let mut rows = Vec::new();
        merge_sorted(sources, &cols, |batch| {
            let first = batch.column(0).strings();
            let second = batch.column(1).strings();
            rows.extend(first.into_iter().zip(second));
            Ok(())
        })
        .expect("merge");
        let expected: Vec<(String, String)> = [("a", "1"), ("a", "2"), ("b", "0"), ("b", "1")]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn full_builder_batches_are_emitted_at_capacity() {
        let evens: Vec<String> = (0..1500).step_by(2).map(|i| format!("{:04}", i)).collect();
        let odds: Vec<String> = (1..1500).step_by(2).map(|i| format!("{:04}", i)).collect();
        let as_batch = |values: Vec<String>| {
            Dataset::new(vec![Box::new(StringsData::new(values)) as Box<dyn Data>])
        };
        let sources = vec![
            VecSource::new(vec![as_batch(evens)]),
            VecSource::new(vec![as_batch(odds)]),
        ];
        let mut sizes = Vec::new();
        let mut all = Vec::new();
        merge_sorted(sources, &[SortingCol::ascending(0)], |batch| {
            sizes.push(batch.len());
            all.extend(batch.column(0).strings());
            Ok(())
        })
        .expect("merge");
        assert_eq!(sizes, vec![MERGE_BATCH_ROWS, 500]);
        let expected: Vec<String> = (0..1500).map(|i| format!("{:04}", i)).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn source_errors_propagate() {
        struct Failing;
        impl BatchSource for Failing {
            fn next_batch(&mut self) -> Result<Option<Dataset>> {
                Err(Error::Transport("peer went away".to_string()))
            }
        }
        let sources: Vec<Box<dyn BatchSource>> = vec![
            VecSource::new(vec![strings_batch(&["a"])]),
            Box::new(Failing),
        ];
        let err = merge_sorted(sources, &[SortingCol::ascending(0)], |_| Ok(())).unwrap_err();
        assert_eq!(err, Error::Transport("peer went away".to_string()));
    }
}
