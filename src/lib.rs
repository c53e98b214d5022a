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
//! Composable dataflow over columnar batches, local or distributed.
//!
//! Runners exchange `Dataset` batches over rendezvous queues and compose
//! into pipelines, unions and projections. The same plan runs across a
//! cluster through per-node `Distributer` brokers, with scatter, gather,
//! broadcast, partition and merge-gather exchanges moving the batches
//! between peers.

pub mod common;
pub mod exec;
pub mod runtime;
pub mod service;

// Convenience aliases, mirroring the module layout.
pub use common::app_config as millrace_config;
pub use common::logging as millrace_logging;

pub use common::error::{Error, Result};
pub use common::types::Uid;
pub use exec::data::{Data, DataType, SortingCol};
pub use exec::dataset::Dataset;
pub use exec::exchange::{Exchange, ExchangeKind};
pub use exec::pipeline::Pipeline;
pub use exec::plan::PlanNode;
pub use exec::project::Project;
pub use exec::registry::Registry;
pub use exec::runner::{Filterable, Runner};
pub use exec::union::Union;
pub use runtime::queue::{BatchReceiver, BatchSender, batch_queue, recv_batch, send_batch};
pub use runtime::runtime_state::RuntimeState;
pub use service::distributer::Distributer;
pub use service::transport::{TcpTransport, Transport};
