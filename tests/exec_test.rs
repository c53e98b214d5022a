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
//! Integration tests for local plan composition through the public API.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::common::{
    PrefixRunner, SortStage, UpperRunner, batch_values, flatten, strings_batch, test_registry,
};
use millrace::common::error::{Error, Result};
use millrace::exec::data::{DataType, SortingCol};
use millrace::exec::registry::Registry;
use millrace::exec::runner::{Runner, collect};
use millrace::runtime::queue::{BatchReceiver, BatchSender, recv_batch, send_batch};
use millrace::runtime::runtime_state::RuntimeState;
use millrace::{Pipeline, PlanNode, Project, Union};

mod common;

fn local_state() -> RuntimeState {
    RuntimeState::new(Arc::new(Registry::with_builtins()))
}

/// Emits each input batch without its last row.
struct DropLast;

impl Runner for DropLast {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::strings()]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        while let Some(batch) = recv_batch(state, &input)? {
            let mut values = batch_values(&batch);
            values.pop();
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
            send_batch(state, &output, strings_batch(&refs))?;
        }
        Ok(())
    }
}

/// Forwards the first batch, then stops on purpose.
struct TakeOne;

impl Runner for TakeOne {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::Wildcard]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        if let Some(batch) = recv_batch(state, &input)? {
            send_batch(state, &output, batch)?;
        }
        Err(Error::Ignorable)
    }
}

/// Fails without consuming anything.
struct Boom;

impl Runner for Boom {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::Wildcard]
    }

    fn run(&self, _state: &RuntimeState, _input: BatchReceiver, _output: BatchSender) -> Result<()> {
        Err(Error::exec("boom"))
    }
}

#[test]
fn test_pipeline_chains_stages_in_order() {
    let state = local_state();
    let plan = Pipeline::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(PrefixRunner {
            prefix: ">> ".to_string(),
        }),
    ]);
    let input = vec![strings_batch(&["one", "two"]), strings_batch(&["three"])];
    let out = collect(&state, &plan, input).expect("run pipeline");
    assert_eq!(out.len(), 2);
    assert_eq!(flatten(&out), vec![">> ONE", ">> TWO", ">> THREE"]);
}

#[test]
fn test_union_runs_every_branch_over_the_same_input() {
    let state = local_state();
    let plan = Union::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(PrefixRunner {
            prefix: "p:".to_string(),
        }),
    ])
    .expect("compatible branches");
    let out = collect(&state, &plan, vec![strings_batch(&["a", "b"])]).expect("run union");
    let got: BTreeSet<String> = flatten(&out).into_iter().collect();
    let want: BTreeSet<String> = ["A", "B", "p:a", "p:b"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(got, want);
}

#[test]
fn test_union_rejects_mismatched_branch_shapes() {
    let two_wide = Project::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(UpperRunner),
    ]);
    let err = Union::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(two_wide),
    ])
    .unwrap_err();
    assert!(matches!(err, Error::Exec(_)));
}

#[test]
fn test_project_widens_rows_side_by_side() {
    let state = local_state();
    let plan = Project::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(PrefixRunner {
            prefix: "p:".to_string(),
        }),
    ]);
    let out = collect(&state, &plan, vec![strings_batch(&["x", "y"])]).expect("run project");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].width(), 2);
    assert_eq!(out[0].column(0).strings(), vec!["X", "Y"]);
    assert_eq!(out[0].column(1).strings(), vec!["p:x", "p:y"]);
}

#[test]
fn test_project_rejects_uneven_branch_rows() {
    let state = local_state();
    let plan = Project::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(DropLast),
    ]);
    let err = collect(&state, &plan, vec![strings_batch(&["x", "y"])]).unwrap_err();
    assert_eq!(err, Error::MismatchedRows);
}

#[test]
fn test_pipeline_surfaces_stage_failures() {
    let state = local_state();
    let plan = Pipeline::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(Boom),
    ]);
    let err = collect(&state, &plan, vec![strings_batch(&["x"])]).unwrap_err();
    assert_eq!(err, Error::Exec("boom".to_string()));
}

#[test]
fn test_early_stop_keeps_partial_output() {
    let state = local_state();
    let plan = Pipeline::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(TakeOne),
    ]);
    let input = vec![
        strings_batch(&["a"]),
        strings_batch(&["b"]),
        strings_batch(&["c"]),
    ];
    let out = collect(&state, &plan, input).expect("early stop is not a failure");
    assert_eq!(flatten(&out), vec!["A"]);
}

#[test]
fn test_nested_plan_sorts_union_output() {
    let state = local_state();
    let union = Union::new(vec![
        Box::new(UpperRunner) as Box<dyn Runner>,
        Box::new(PrefixRunner {
            prefix: "p:".to_string(),
        }),
    ])
    .expect("compatible branches");
    let plan = Pipeline::new(vec![
        Box::new(union) as Box<dyn Runner>,
        Box::new(SortStage {
            cols: vec![SortingCol::ascending(0)],
        }),
    ]);
    let out = collect(&state, &plan, vec![strings_batch(&["b", "a"])]).expect("run nested plan");
    assert_eq!(out.len(), 1);
    assert_eq!(flatten(&out), vec!["A", "B", "p:a", "p:b"]);
}

#[test]
fn test_custom_plan_nodes_instantiate_from_the_registry() {
    let registry = test_registry();
    let plan = PlanNode::pipeline(vec![
        PlanNode::custom("upper", Vec::new()),
        PrefixRunner::plan_node("p:"),
    ]);
    let bytes =
        bincode::serde::encode_to_vec(&plan, bincode::config::standard()).expect("encode plan");
    let (decoded, _): (PlanNode, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).expect("decode");
    let runner = decoded.instantiate(&registry).expect("instantiate");

    let state = RuntimeState::new(Arc::new(test_registry()));
    let out = collect(&state, runner.as_ref(), vec![strings_batch(&["q"])]).expect("run plan");
    assert_eq!(flatten(&out), vec!["p:Q"]);
}
