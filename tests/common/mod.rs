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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use millrace::common::error::{Error, Result};
use millrace::exec::data::{Data, DataType, SortingCol, StringsData};
use millrace::exec::dataset::Dataset;
use millrace::exec::registry::Registry;
use millrace::exec::runner::Runner;
use millrace::runtime::queue::{BatchReceiver, BatchSender, recv_batch, send_batch};
use millrace::runtime::runtime_state::RuntimeState;
use millrace::service::distributer::Distributer;
use millrace::service::transport::TcpTransport;
use millrace::{PlanNode, millrace_logging};

pub fn strings_batch(values: &[&str]) -> Dataset {
    Dataset::new(vec![
        Box::new(StringsData::from_slice(values)) as Box<dyn Data>
    ])
}

pub fn batch_values(batch: &Dataset) -> Vec<String> {
    batch.column(0).strings()
}

pub fn flatten(batches: &[Dataset]) -> Vec<String> {
    batches.iter().flat_map(|b| batch_values(b)).collect()
}

/// Uppercases column zero.
pub struct UpperRunner;

impl Runner for UpperRunner {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::strings()]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        while let Some(batch) = recv_batch(state, &input)? {
            let upper: Vec<String> = batch_values(&batch)
                .iter()
                .map(|v| v.to_uppercase())
                .collect();
            let refs: Vec<&str> = upper.iter().map(String::as_str).collect();
            send_batch(state, &output, strings_batch(&refs))?;
        }
        Ok(())
    }
}

/// Rewrites every value to `value@node`, exposing where a row executed.
pub struct TagRunner;

impl Runner for TagRunner {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::strings()]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        while let Some(batch) = recv_batch(state, &input)? {
            let tagged: Vec<String> = batch_values(&batch)
                .iter()
                .map(|v| format!("{}@{}", v, state.node()))
                .collect();
            let refs: Vec<&str> = tagged.iter().map(String::as_str).collect();
            send_batch(state, &output, strings_batch(&refs))?;
        }
        Ok(())
    }
}

/// Buffers the whole input and emits it as one sorted batch.
pub struct SortStage {
    pub cols: Vec<SortingCol>,
}

impl Runner for SortStage {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::Wildcard]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        let mut buffered: Option<Dataset> = None;
        while let Some(batch) = recv_batch(state, &input)? {
            buffered = Some(match buffered.take() {
                Some(acc) => acc.append(&batch),
                None => batch,
            });
        }
        if let Some(mut all) = buffered {
            all.sort(&self.cols);
            send_batch(state, &output, all)?;
        }
        Ok(())
    }
}

/// Passes batches through on the master and fails on any other node.
pub struct FailOnWorker;

impl Runner for FailOnWorker {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::Wildcard]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        if !state.is_master() {
            return Err(Error::exec("injected worker failure"));
        }
        while let Some(batch) = recv_batch(state, &input)? {
            send_batch(state, &output, batch)?;
        }
        Ok(())
    }
}

/// Blocks until the job is canceled, then reports the cancellation.
pub struct StallRunner;

impl Runner for StallRunner {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::Wildcard]
    }

    fn run(&self, state: &RuntimeState, _input: BatchReceiver, _output: BatchSender) -> Result<()> {
        let _ = state.cancel_signal().recv();
        Err(Error::Canceled)
    }
}

/// Payload-carrying custom runner: prepends a configured prefix.
#[derive(Serialize, Deserialize)]
pub struct PrefixRunner {
    pub prefix: String,
}

impl PrefixRunner {
    pub fn plan_node(prefix: &str) -> PlanNode {
        let payload = bincode::serde::encode_to_vec(
            &PrefixRunner {
                prefix: prefix.to_string(),
            },
            bincode::config::standard(),
        )
        .expect("encode prefix runner");
        PlanNode::custom("prefix", payload)
    }

    pub fn register(registry: &mut Registry) {
        registry.register_runner("prefix", |payload| {
            let (runner, _): (PrefixRunner, usize) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
            Ok(Box::new(runner) as Box<dyn Runner>)
        });
    }
}

impl Runner for PrefixRunner {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::strings()]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        while let Some(batch) = recv_batch(state, &input)? {
            let prefixed: Vec<String> = batch_values(&batch)
                .iter()
                .map(|v| format!("{}{}", self.prefix, v))
                .collect();
            let refs: Vec<&str> = prefixed.iter().map(String::as_str).collect();
            send_batch(state, &output, strings_batch(&refs))?;
        }
        Ok(())
    }
}

/// Registry with every helper runner the cluster tests ship.
pub fn test_registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry.register_runner("upper", |_| Ok(Box::new(UpperRunner) as Box<dyn Runner>));
    registry.register_runner("tag", |_| Ok(Box::new(TagRunner) as Box<dyn Runner>));
    registry.register_runner("sort0", |_| {
        Ok(Box::new(SortStage {
            cols: vec![SortingCol::ascending(0)],
        }) as Box<dyn Runner>)
    });
    registry.register_runner("fail-on-worker", |_| {
        Ok(Box::new(FailOnWorker) as Box<dyn Runner>)
    });
    registry.register_runner("stall", |_| Ok(Box::new(StallRunner) as Box<dyn Runner>));
    PrefixRunner::register(&mut registry);
    registry
}

/// A local cluster: one broker per node on an ephemeral loopback port. The
/// first broker acts as the master.
pub struct TestCluster {
    pub brokers: Vec<Arc<Distributer>>,
    master_registry: Arc<Registry>,
}

impl TestCluster {
    pub fn start(nodes: usize) -> Self {
        millrace_logging::init();
        let brokers: Vec<Arc<Distributer>> = (0..nodes)
            .map(|_| {
                Distributer::start(
                    Box::new(TcpTransport),
                    "127.0.0.1:0",
                    Arc::new(test_registry()),
                )
                .expect("start broker")
            })
            .collect();
        Self {
            brokers,
            master_registry: Arc::new(test_registry()),
        }
    }

    pub fn peers(&self) -> Vec<String> {
        self.brokers
            .iter()
            .map(|b| b.local_addr().to_string())
            .collect()
    }

    pub fn master(&self) -> &Arc<Distributer> {
        &self.brokers[0]
    }

    /// Distribute `plan` from the master and collect its local output.
    pub fn run(&self, plan: PlanNode, input: Vec<Dataset>) -> Result<Vec<Dataset>> {
        let job = self.master().distribute(plan, self.peers());
        let state = RuntimeState::new(Arc::clone(&self.master_registry));
        millrace::exec::runner::collect(&state, &job, input)
    }

    pub fn shutdown(self) {
        for broker in &self.brokers {
            broker.close();
        }
    }
}
