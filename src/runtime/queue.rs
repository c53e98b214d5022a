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
//! - Batch queues between stages: zero-capacity rendezvous channels, so a
//!   send blocks until a receive is ready. This is the engine's only
//!   backpressure mechanism.
//! - Cancel-aware send/receive: every blocking queue operation races the
//!   job's cancel signal via `select!` and exits with `Canceled` when the
//!   token fires.
//! - `drain`: read-and-discard until disconnect, used after a stage error so
//!   an upstream producer blocked mid-send cannot deadlock.
//!
//! End-of-stream is signalled by dropping the sender, never by an in-band
//! marker.

use crossbeam_channel::{Receiver, Sender, bounded, select};

use crate::common::error::{Error, Result};
use crate::exec::dataset::Dataset;
use crate::runtime::runtime_state::RuntimeState;

pub type BatchSender = Sender<Dataset>;
pub type BatchReceiver = Receiver<Dataset>;

/// New rendezvous queue for one stage boundary.
pub fn batch_queue() -> (BatchSender, BatchReceiver) {
    bounded(0)
}

/// Blocking send racing the cancel signal. A disconnected receiver also maps
/// to `Canceled`: the consumer only legally disappears while the job is
/// tearing down.
pub fn send_batch(state: &RuntimeState, tx: &BatchSender, batch: Dataset) -> Result<()> {
    select! {
        send(tx, batch) -> res => res.map_err(|_| Error::Canceled),
        recv(state.cancel_signal()) -> _ => Err(Error::Canceled),
    }
}

/// Blocking receive racing the cancel signal. `Ok(None)` is end-of-stream.
pub fn recv_batch(state: &RuntimeState, rx: &BatchReceiver) -> Result<Option<Dataset>> {
    select! {
        recv(rx) -> res => Ok(res.ok()),
        recv(state.cancel_signal()) -> _ => Err(Error::Canceled),
    }
}

/// Discard everything remaining on `rx` until its senders are gone.
pub fn drain(rx: &BatchReceiver) {
    for _ in rx.iter() {}
}

/// Fan-out loop: copy every batch from `input` to each of `outputs` in turn.
/// Used by the compositions that duplicate one stream to several branches.
pub fn duplicate_to(
    state: &RuntimeState,
    input: BatchReceiver,
    outputs: &[BatchSender],
) -> Result<()> {
    while let Some(batch) = recv_batch(state, &input)? {
        for tx in outputs {
            send_batch(state, tx, batch.clone())?;
        }
    }
    Ok(())
}
