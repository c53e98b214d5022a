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
//! - `Runner`: the single dataflow-stage contract. A stage consumes its
//!   input stream to exhaustion (or exits on cancellation), emits batches on
//!   its output, and signals end-of-stream by dropping the sender.
//! - Positional wildcard resolution over a stage chain.
//! - `collect`: the in-memory harness local callers and tests use to drive
//!   one runner over a batch vector.
//!
//! `run` is invoked exactly once per physical execution; implementations
//! must be safe to run concurrently with distinct streams.

use std::fmt;
use std::thread;

use crate::common::error::Result;
use crate::exec::data::DataType;
use crate::exec::dataset::Dataset;
use crate::runtime::queue::{BatchReceiver, BatchSender, batch_queue, recv_batch, send_batch};
use crate::runtime::runtime_state::RuntimeState;

/// Optional column-filter capability, used by `Project` for projection
/// pushdown. `keep[i] == false` marks output column `i` as unused.
pub trait Filterable {
    fn filter(&mut self, keep: &[bool]) -> Result<()>;
}

pub trait Runner: Send + Sync {
    /// Static return-type shape. Must not depend on input content; may
    /// contain `Wildcard` entries resolved positionally by the enclosing
    /// composition.
    fn returns(&self) -> Vec<DataType>;

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()>;

    fn as_filterable(&mut self) -> Option<&mut dyn Filterable> {
        None
    }
}

impl fmt::Debug for dyn Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("returns", &self.returns())
            .finish_non_exhaustive()
    }
}

/// Resolve a sequential chain's return list: scanning forward, every
/// `Wildcard` a stage declares is spliced with the previous stage's full
/// resolved list. A wildcard on the first stage stays unresolved for the
/// enclosing composition to fill in.
pub(crate) fn resolve_returns(stages: &[Box<dyn Runner>]) -> Vec<DataType> {
    let mut resolved: Vec<DataType> = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        let declared = stage.returns();
        let mut next = Vec::with_capacity(declared.len());
        for ty in declared {
            if ty.is_wildcard() && i > 0 {
                next.extend(resolved.iter().cloned());
            } else {
                next.push(ty);
            }
        }
        resolved = next;
    }
    resolved
}

/// Run `runner` over `input` and collect its whole output stream.
///
/// Feeds and collects on rendezvous queues so the runner observes the same
/// backpressure as inside a composition. Returns the job outcome resolved
/// against the state's error holder, so an `Ignorable` stop still yields the
/// batches produced before it.
pub fn collect(
    state: &RuntimeState,
    runner: &dyn Runner,
    input: Vec<Dataset>,
) -> Result<Vec<Dataset>> {
    let (in_tx, in_rx) = batch_queue();
    let (out_tx, out_rx) = batch_queue();
    let mut collected = Vec::new();

    thread::scope(|s| {
        let feeder = thread::Builder::new()
            .name("millrace-feed".to_string())
            .spawn_scoped(s, move || {
                for batch in input {
                    if send_batch(state, &in_tx, batch).is_err() {
                        break;
                    }
                }
            })
            .expect("spawn feeder thread");

        let running = thread::Builder::new()
            .name("millrace-run".to_string())
            .spawn_scoped(s, move || runner.run(state, in_rx, out_tx))
            .expect("spawn runner thread");

        while let Ok(Some(batch)) = recv_batch(state, &out_rx) {
            collected.push(batch);
        }

        if let Err(err) = running.join().expect("join runner thread") {
            state.fail(&err);
        }
        let _ = feeder.join();
    });

    state.outcome().map(|_| collected)
}
