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
//! - `Project`: horizontal join. A dispatcher duplicates each input batch to
//!   every branch; branch outputs are read one batch per branch per round and
//!   column-concatenated into one wider batch. Branches must agree on batch
//!   count and per-round row count, otherwise the round fails with
//!   "mismatched number of rows".
//! - Column filter: a downstream consumer can mark output columns unused.
//!   A branch whose columns are all unused is not run at all; its slots are
//!   filled with null columns of the round's row count.

use std::thread;

use crate::common::error::{Error, Result};
use crate::exec::data::{Data, DataType, NullData};
use crate::exec::dataset::Dataset;
use crate::exec::pipeline::run_stage;
use crate::exec::runner::{Filterable, Runner};
use crate::runtime::queue::{
    BatchReceiver, BatchSender, batch_queue, drain, duplicate_to, recv_batch, send_batch,
};
use crate::runtime::runtime_state::RuntimeState;

pub struct Project {
    branches: Vec<Box<dyn Runner>>,
    elided: Vec<bool>,
}

enum Slot {
    Active(BatchReceiver),
    Elided(usize),
}

impl Project {
    pub fn new(branches: Vec<Box<dyn Runner>>) -> Self {
        let elided = vec![false; branches.len()];
        Self { branches, elided }
    }
}

fn null_part(arity: usize, rows: usize) -> Dataset {
    let columns = (0..arity)
        .map(|_| Box::new(NullData::new(rows)) as Box<dyn Data>)
        .collect();
    Dataset::new(columns)
}

/// One round per output batch: fetch one batch from every active branch,
/// synthesize null parts for elided ones, concatenate columns left to right.
fn combine(state: &RuntimeState, slots: &[Slot], output: BatchSender) -> Result<()> {
    loop {
        let mut fetched: Vec<Option<Dataset>> = Vec::with_capacity(slots.len());
        let mut open = 0usize;
        for slot in slots {
            match slot {
                Slot::Active(rx) => {
                    let got = recv_batch(state, rx)?;
                    if got.is_some() {
                        open += 1;
                    }
                    fetched.push(got);
                }
                Slot::Elided(_) => fetched.push(None),
            }
        }
        if open == 0 {
            return Ok(());
        }
        let rows = fetched
            .iter()
            .flatten()
            .next()
            .map(|batch| batch.len())
            .unwrap_or(0);
        let mut combined: Option<Dataset> = None;
        for (slot, got) in slots.iter().zip(fetched) {
            let part = match slot {
                Slot::Elided(arity) => null_part(*arity, rows),
                Slot::Active(_) => got.ok_or(Error::MismatchedRows)?,
            };
            combined = Some(match combined {
                None => part,
                Some(prev) => prev.expand(&part)?,
            });
        }
        if let Some(batch) = combined {
            send_batch(state, &output, batch)?;
        }
    }
}

impl Runner for Project {
    fn returns(&self) -> Vec<DataType> {
        self.branches
            .iter()
            .flat_map(|branch| branch.returns())
            .collect()
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        if self.branches.is_empty() {
            return Err(Error::exec("project requires at least one branch"));
        }
        if self.elided.iter().all(|&e| e) {
            // Nothing to produce; still consume the input so the producer
            // can finish.
            while recv_batch(state, &input)?.is_some() {}
            return Ok(());
        }

        thread::scope(|s| {
            let mut slots = Vec::with_capacity(self.branches.len());
            let mut branch_txs = Vec::new();
            for (i, branch) in self.branches.iter().enumerate() {
                if self.elided[i] {
                    slots.push(Slot::Elided(branch.returns().len()));
                    continue;
                }
                let (in_tx, in_rx) = batch_queue();
                let (out_tx, out_rx) = batch_queue();
                branch_txs.push(in_tx);
                slots.push(Slot::Active(out_rx));
                thread::Builder::new()
                    .name(format!("millrace-project-{}", i))
                    .spawn_scoped(s, move || run_stage(state, branch.as_ref(), in_rx, out_tx))
                    .expect("spawn project branch thread");
            }

            let leftovers = input.clone();
            thread::Builder::new()
                .name("millrace-project-dispatch".to_string())
                .spawn_scoped(s, move || {
                    if let Err(err) = duplicate_to(state, input, &branch_txs) {
                        state.fail(&err);
                        drop(branch_txs);
                        drain(&leftovers);
                    }
                })
                .expect("spawn project dispatcher thread");

            if let Err(err) = combine(state, &slots, output) {
                state.fail(&err);
                for slot in &slots {
                    if let Slot::Active(rx) = slot {
                        drain(rx);
                    }
                }
            }
        });
        state.outcome()
    }

    fn as_filterable(&mut self) -> Option<&mut dyn Filterable> {
        Some(self)
    }
}

impl Filterable for Project {
    fn filter(&mut self, keep: &[bool]) -> Result<()> {
        let arity = self.returns().len();
        if keep.len() != arity {
            return Err(Error::exec(format!(
                "column filter has {} entries, project returns {} columns",
                keep.len(),
                arity
            )));
        }
        let mut offset = 0;
        for (i, branch) in self.branches.iter().enumerate() {
            let span = branch.returns().len();
            if span > 0 && keep[offset..offset + span].iter().all(|&k| !k) {
                self.elided[i] = true;
            }
            offset += span;
        }
        Ok(())
    }
}
