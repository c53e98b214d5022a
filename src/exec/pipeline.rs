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
//! - `Pipeline`: sequential composition. Each stage but the last runs on its
//!   own thread; neighbouring stages meet on zero-buffer rendezvous queues,
//!   so the chain carries backpressure end to end.
//! - Failure discipline per stage: record the first hard error, cancel the
//!   shared token, then drain the stage's own input so an upstream producer
//!   blocked mid-send cannot deadlock.
//!
//! `run` returns only after every stage thread has joined; no task outlives
//! the call.

use std::thread;

use crate::common::error::{Error, Result};
use crate::exec::data::DataType;
use crate::exec::runner::{Filterable, Runner, resolve_returns};
use crate::millrace_logging::debug;
use crate::runtime::queue::{BatchReceiver, BatchSender, batch_queue, drain};
use crate::runtime::runtime_state::RuntimeState;

pub struct Pipeline {
    stages: Vec<Box<dyn Runner>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Runner>>) -> Self {
        Self { stages }
    }
}

/// Run one stage and apply the failure discipline around it.
pub(crate) fn run_stage(
    state: &RuntimeState,
    stage: &dyn Runner,
    input: BatchReceiver,
    output: BatchSender,
) {
    let leftovers = input.clone();
    if let Err(err) = stage.run(state, input, output) {
        debug!(err = %err, "stage exited with error, canceling job");
        state.fail(&err);
        drain(&leftovers);
    }
}

impl Runner for Pipeline {
    fn returns(&self) -> Vec<DataType> {
        resolve_returns(&self.stages)
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        let n = self.stages.len();
        if n == 0 {
            return Err(Error::exec("pipeline requires at least one stage"));
        }

        thread::scope(|s| {
            let mut upstream = input;
            for (i, stage) in self.stages[..n - 1].iter().enumerate() {
                let (tx, next_rx) = batch_queue();
                let rx = upstream;
                thread::Builder::new()
                    .name(format!("millrace-stage-{}", i))
                    .spawn_scoped(s, move || run_stage(state, stage.as_ref(), rx, tx))
                    .expect("spawn pipeline stage thread");
                upstream = next_rx;
            }
            // Last stage runs on the caller's own path.
            run_stage(state, self.stages[n - 1].as_ref(), upstream, output);
        });

        state.outcome()
    }

    fn as_filterable(&mut self) -> Option<&mut dyn Filterable> {
        Some(self)
    }
}

impl Filterable for Pipeline {
    /// Push a column filter into the last stage; stages that do not support
    /// filtering keep producing every column.
    fn filter(&mut self, keep: &[bool]) -> Result<()> {
        let arity = self.returns().len();
        if keep.len() != arity {
            return Err(Error::exec(format!(
                "column filter has {} entries, pipeline returns {} columns",
                keep.len(),
                arity
            )));
        }
        if let Some(last) = self.stages.last_mut()
            && let Some(filterable) = last.as_filterable()
        {
            return filterable.filter(keep);
        }
        Ok(())
    }
}
