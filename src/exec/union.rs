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
//! - `Union`: duplicates the single input stream to every branch and fans all
//!   branch outputs into one stream. Interleaving across branches is
//!   unspecified; order within one branch is preserved.
//! - Branch return types are checked at construction time. A declared `Null`
//!   column acts as a placeholder compatible with any concrete type; the
//!   first concrete declaration wins in `returns()`.

use std::fmt;
use std::thread;

use crate::common::error::{Error, Result};
use crate::exec::data::DataType;
use crate::exec::pipeline::run_stage;
use crate::exec::runner::Runner;
use crate::runtime::queue::{BatchReceiver, BatchSender, batch_queue, drain, duplicate_to};
use crate::runtime::runtime_state::RuntimeState;

pub struct Union {
    branches: Vec<Box<dyn Runner>>,
    returns: Vec<DataType>,
}

impl Union {
    pub fn new(branches: Vec<Box<dyn Runner>>) -> Result<Self> {
        let Some(first) = branches.first() else {
            return Err(Error::exec("union requires at least one branch"));
        };
        let mut returns = first.returns();
        for (i, branch) in branches.iter().enumerate().skip(1) {
            let declared = branch.returns();
            if declared.len() != returns.len() {
                return Err(Error::exec(format!(
                    "union branch {} returns {} columns, branch 0 returns {}",
                    i,
                    declared.len(),
                    returns.len()
                )));
            }
            for (col, ty) in declared.iter().enumerate() {
                if !returns[col].compatible_with(ty) {
                    return Err(Error::exec(format!(
                        "union branch {} column {} has type {}, incompatible with {}",
                        i, col, ty, returns[col]
                    )));
                }
                let placeholder =
                    matches!(returns[col], DataType::Null | DataType::Wildcard);
                let concrete = !matches!(ty, DataType::Null | DataType::Wildcard);
                if placeholder && concrete {
                    returns[col] = ty.clone();
                }
            }
        }
        Ok(Self { branches, returns })
    }
}

impl fmt::Debug for Union {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Union")
            .field("branches", &self.branches.len())
            .field("returns", &self.returns)
            .finish()
    }
}

impl Runner for Union {
    fn returns(&self) -> Vec<DataType> {
        self.returns.clone()
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        thread::scope(|s| {
            let mut branch_txs = Vec::with_capacity(self.branches.len());
            for (i, branch) in self.branches.iter().enumerate() {
                let (tx, rx) = batch_queue();
                branch_txs.push(tx);
                let out = output.clone();
                thread::Builder::new()
                    .name(format!("millrace-union-{}", i))
                    .spawn_scoped(s, move || run_stage(state, branch.as_ref(), rx, out))
                    .expect("spawn union branch thread");
            }
            drop(output);
            let leftovers = input.clone();
            if let Err(err) = duplicate_to(state, input, &branch_txs) {
                state.fail(&err);
                drop(branch_txs);
                drain(&leftovers);
            }
        });
        state.outcome()
    }
}
