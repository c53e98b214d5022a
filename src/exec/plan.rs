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
//! - `PlanNode`: the serializable plan tree shipped to every peer of a
//!   distributed job. Compositions and exchanges are first-class variants,
//!   caller-defined runners travel as a registry tag plus opaque payload.
//! - `instantiate` turns a node back into a live `Runner` against the
//!   registry of the receiving node.
//!
//! Exchange uids are minted once, by the node constructor on the origin, and
//! shipped verbatim so all peers pair their connections under the same id.

use serde::{Deserialize, Serialize};

use crate::common::error::Result;
use crate::common::types::Uid;
use crate::exec::data::SortingCol;
use crate::exec::exchange::{Exchange, ExchangeKind};
use crate::exec::pipeline::Pipeline;
use crate::exec::project::Project;
use crate::exec::registry::Registry;
use crate::exec::runner::Runner;
use crate::exec::union::Union;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanNode {
    Pipeline(Vec<PlanNode>),
    Project(Vec<PlanNode>),
    Union(Vec<PlanNode>),
    Scatter { uid: Uid },
    Gather { uid: Uid },
    Broadcast { uid: Uid },
    Partition { uid: Uid, cols: Vec<usize> },
    MergeGather { uid: Uid, cols: Vec<SortingCol> },
    Custom { tag: String, payload: Vec<u8> },
}

impl PlanNode {
    pub fn pipeline(stages: Vec<PlanNode>) -> Self {
        PlanNode::Pipeline(stages)
    }

    pub fn project(branches: Vec<PlanNode>) -> Self {
        PlanNode::Project(branches)
    }

    pub fn union(branches: Vec<PlanNode>) -> Self {
        PlanNode::Union(branches)
    }

    pub fn scatter() -> Self {
        PlanNode::Scatter { uid: Uid::new() }
    }

    pub fn gather() -> Self {
        PlanNode::Gather { uid: Uid::new() }
    }

    pub fn broadcast() -> Self {
        PlanNode::Broadcast { uid: Uid::new() }
    }

    pub fn partition(cols: Vec<usize>) -> Self {
        PlanNode::Partition {
            uid: Uid::new(),
            cols,
        }
    }

    pub fn merge_gather(cols: Vec<SortingCol>) -> Self {
        PlanNode::MergeGather {
            uid: Uid::new(),
            cols,
        }
    }

    /// A caller-defined runner. The payload is whatever the decoder
    /// registered under `tag` understands.
    pub fn custom(tag: impl Into<String>, payload: Vec<u8>) -> Self {
        PlanNode::Custom {
            tag: tag.into(),
            payload,
        }
    }

    /// Build the live runner tree for this node. Fails when a custom tag is
    /// unknown to the registry or a union's branches do not line up.
    pub fn instantiate(&self, registry: &Registry) -> Result<Box<dyn Runner>> {
        match self {
            PlanNode::Pipeline(stages) => {
                Ok(Box::new(Pipeline::new(instantiate_all(stages, registry)?)))
            }
            PlanNode::Project(branches) => {
                Ok(Box::new(Project::new(instantiate_all(branches, registry)?)))
            }
            PlanNode::Union(branches) => Ok(Box::new(Union::new(instantiate_all(
                branches, registry,
            )?)?)),
            PlanNode::Scatter { uid } => Ok(Box::new(Exchange::with_uid(ExchangeKind::Scatter, *uid))),
            PlanNode::Gather { uid } => Ok(Box::new(Exchange::with_uid(ExchangeKind::Gather, *uid))),
            PlanNode::Broadcast { uid } => {
                Ok(Box::new(Exchange::with_uid(ExchangeKind::Broadcast, *uid)))
            }
            PlanNode::Partition { uid, cols } => Ok(Box::new(Exchange::with_uid(
                ExchangeKind::Partition { cols: cols.clone() },
                *uid,
            ))),
            PlanNode::MergeGather { uid, cols } => Ok(Box::new(Exchange::with_uid(
                ExchangeKind::MergeGather { cols: cols.clone() },
                *uid,
            ))),
            PlanNode::Custom { tag, payload } => registry.decode_runner(tag, payload),
        }
    }
}

fn instantiate_all(nodes: &[PlanNode], registry: &Registry) -> Result<Vec<Box<dyn Runner>>> {
    nodes.iter().map(|node| node.instantiate(registry)).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::common::error::Error;
    use crate::exec::runner::collect;
    use crate::exec::runner::testing::{Question, Upper, batch_values, strings_batch};
    use crate::runtime::runtime_state::RuntimeState;

    fn registry_with_stubs() -> Registry {
        let mut registry = Registry::with_builtins();
        registry.register_runner("upper", |_| Ok(Box::new(Upper) as Box<dyn Runner>));
        registry.register_runner("question", |_| Ok(Box::new(Question) as Box<dyn Runner>));
        registry
    }

    #[test]
    fn instantiated_pipeline_runs() {
        let registry = registry_with_stubs();
        let plan = PlanNode::pipeline(vec![
            PlanNode::custom("upper", Vec::new()),
            PlanNode::custom("question", Vec::new()),
        ]);
        let runner = plan.instantiate(&registry).expect("instantiate");
        let state = RuntimeState::new(Arc::new(registry));
        let out = collect(&state, runner.as_ref(), vec![strings_batch(&["hello"])])
            .expect("run");
        let got: Vec<String> = out.iter().flat_map(|b| batch_values(b, 0)).collect();
        assert_eq!(got, vec!["is HELLO?"]);
    }

    #[test]
    fn unknown_custom_tag_fails_instantiation() {
        let registry = Registry::with_builtins();
        let plan = PlanNode::custom("no-such-runner", Vec::new());
        let err = plan.instantiate(&registry).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn nested_compositions_instantiate() {
        let registry = registry_with_stubs();
        let plan = PlanNode::pipeline(vec![
            PlanNode::union(vec![
                PlanNode::custom("upper", Vec::new()),
                PlanNode::custom("question", Vec::new()),
            ]),
            PlanNode::custom("question", Vec::new()),
        ]);
        plan.instantiate(&registry).expect("instantiate");
    }

    #[test]
    fn wire_round_trip_preserves_uids() {
        let plan = PlanNode::pipeline(vec![
            PlanNode::scatter(),
            PlanNode::partition(vec![0, 2]),
            PlanNode::merge_gather(vec![SortingCol::descending(1)]),
        ]);
        let bytes = bincode::serde::encode_to_vec(&plan, bincode::config::standard())
            .expect("encode");
        let (back, _): (PlanNode, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .expect("decode");
        assert_eq!(back, plan);
    }

    #[test]
    fn each_construction_mints_a_fresh_uid() {
        let (PlanNode::Scatter { uid: a }, PlanNode::Scatter { uid: b }) =
            (PlanNode::scatter(), PlanNode::scatter())
        else {
            panic!("scatter constructor changed variant");
        };
        assert_ne!(a, b);
    }
}
