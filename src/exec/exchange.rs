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
//! - The exchange operators: scatter, gather, broadcast, hash-partition and
//!   sorted merge-gather, all one `Runner` parameterized by `ExchangeKind`.
//! - Link management shared by every kind: one bidirectional connection per
//!   remote peer (brokered by rendezvous id), an in-process relay for the
//!   local node, error markers with a grace delay so failures arrive as data
//!   rather than as disconnects.
//! - On cancellation a watchdog closes every link one grace delay later,
//!   which bounds teardown even when a thread is blocked in network I/O.
//!
//! The uid is fixed at construction and shared by all nodes running the same
//! plan, which is what pairs the two ends of each connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select};

use crate::common::config;
use crate::common::error::{Error, Result};
use crate::common::types::Uid;
use crate::exec::data::{DataType, SortingCol};
use crate::exec::dataset::Dataset;
use crate::exec::merge::{BatchSource, merge_sorted};
use crate::exec::registry::Registry;
use crate::exec::runner::Runner;
use crate::millrace_logging::debug;
use crate::runtime::queue::{BatchReceiver, BatchSender, drain, recv_batch, send_batch};
use crate::runtime::runtime_state::RuntimeState;
use crate::service::codec::{DataMessage, ExchangeLink, FramedLink, decode_batch};

const FNV_SEED: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_SEED;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Consistent-hash ring over the target peers, with virtual nodes for
/// spread. For a fixed target list the routing of a key never changes.
pub(crate) struct HashRing {
    points: Vec<(u64, usize)>,
}

impl HashRing {
    pub(crate) fn new(targets: &[String], vnodes: usize) -> Self {
        let vnodes = vnodes.max(1);
        let mut points = Vec::with_capacity(targets.len() * vnodes);
        for (idx, addr) in targets.iter().enumerate() {
            for v in 0..vnodes {
                points.push((fnv1a(format!("{}#{}", addr, v).as_bytes()), idx));
            }
        }
        points.sort_unstable();
        Self { points }
    }

    /// Index of the target owning `key`: first ring point at or after the
    /// key's hash, wrapping to the start.
    pub(crate) fn route(&self, key: &str) -> usize {
        let hash = fnv1a(key.as_bytes());
        let at = self.points.partition_point(|&(point, _)| point < hash);
        let at = if at == self.points.len() { 0 } else { at };
        self.points[at].1
    }
}

/// In-process stand-in for a peer connection when the target is the local
/// node. Bounded, and closable from another thread so blocked operations
/// wake during teardown.
pub(crate) struct Loopback {
    data_tx: Mutex<Option<Sender<DataMessage>>>,
    data_rx: Receiver<DataMessage>,
    closed_tx: Mutex<Option<Sender<()>>>,
    closed_rx: Receiver<()>,
}

impl Loopback {
    pub(crate) fn new(capacity: usize) -> Self {
        let (data_tx, data_rx) = bounded(capacity);
        let (closed_tx, closed_rx) = bounded(0);
        Self {
            data_tx: Mutex::new(Some(data_tx)),
            data_rx,
            closed_tx: Mutex::new(Some(closed_tx)),
            closed_rx,
        }
    }
}

impl ExchangeLink for Loopback {
    fn send_msg(&self, msg: &DataMessage) -> Result<()> {
        let tx = self.data_tx.lock().expect("relay sender lock").clone();
        let Some(tx) = tx else {
            return Err(Error::Transport("relay closed".to_string()));
        };
        select! {
            send(tx, msg.clone()) -> res => {
                res.map_err(|_| Error::Transport("relay closed".to_string()))
            }
            recv(self.closed_rx) -> _ => Err(Error::Transport("relay closed".to_string())),
        }
    }

    fn recv_msg(&self) -> Result<DataMessage> {
        select! {
            recv(self.data_rx) -> res => {
                res.map_err(|_| Error::Transport("connection closed".to_string()))
            }
            recv(self.closed_rx) -> _ => {
                Err(Error::Transport("connection closed".to_string()))
            }
        }
    }

    fn close_send(&self) {
        self.data_tx.lock().expect("relay sender lock").take();
    }

    fn close(&self) {
        self.data_tx.lock().expect("relay sender lock").take();
        self.closed_tx.lock().expect("relay close lock").take();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeKind {
    Scatter,
    Gather,
    Broadcast,
    Partition { cols: Vec<usize> },
    MergeGather { cols: Vec<SortingCol> },
}

impl ExchangeKind {
    /// Send targets and receive sources for this node, in peer order.
    fn routes(&self, node: &str, master: &str, peers: &[String]) -> (Vec<String>, Vec<String>) {
        match self {
            ExchangeKind::Scatter | ExchangeKind::Broadcast | ExchangeKind::Partition { .. } => {
                (peers.to_vec(), peers.to_vec())
            }
            ExchangeKind::Gather | ExchangeKind::MergeGather { .. } => {
                let targets = vec![master.to_string()];
                let sources = if node == master {
                    peers.to_vec()
                } else {
                    Vec::new()
                };
                (targets, sources)
            }
        }
    }
}

pub struct Exchange {
    kind: ExchangeKind,
    uid: Uid,
}

impl Exchange {
    pub fn scatter() -> Self {
        Self::with_uid(ExchangeKind::Scatter, Uid::new())
    }

    pub fn gather() -> Self {
        Self::with_uid(ExchangeKind::Gather, Uid::new())
    }

    pub fn broadcast() -> Self {
        Self::with_uid(ExchangeKind::Broadcast, Uid::new())
    }

    pub fn partition(cols: Vec<usize>) -> Self {
        Self::with_uid(ExchangeKind::Partition { cols }, Uid::new())
    }

    pub fn merge_gather(cols: Vec<SortingCol>) -> Self {
        Self::with_uid(ExchangeKind::MergeGather { cols }, Uid::new())
    }

    /// Rebuild an instance with a uid fixed elsewhere, so every node running
    /// the same plan pairs connections under the same id.
    pub fn with_uid(kind: ExchangeKind, uid: Uid) -> Self {
        Self { kind, uid }
    }

    pub fn kind(&self) -> &ExchangeKind {
        &self.kind
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }
}

/// Split one batch as evenly as possible across the targets, larger slices
/// first in rotation order starting at `start`.
fn scatter_batch(batch: &Dataset, targets: &[Arc<dyn ExchangeLink>], start: usize) -> Result<()> {
    let parts = targets.len();
    let base = batch.len() / parts;
    let extra = batch.len() % parts;
    let mut offset = 0;
    for j in 0..parts {
        let size = base + usize::from(j < extra);
        if size == 0 {
            continue;
        }
        let slice = batch.slice(offset, offset + size);
        offset += size;
        let msg = DataMessage::from_batch(&slice)?;
        targets[(start + j) % parts].send_msg(&msg)?;
    }
    Ok(())
}

/// Sort the batch by the partition columns, then send each run of equal keys
/// as one message to the ring-resolved target. Equal keys from one batch are
/// never split across messages.
fn partition_batch(
    mut batch: Dataset,
    cols: &[usize],
    ring: &HashRing,
    targets: &[Arc<dyn ExchangeLink>],
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let sort_cols: Vec<SortingCol> = cols.iter().map(|&i| SortingCol::ascending(i)).collect();
    batch.sort(&sort_cols);
    let keys = batch.key_strings(cols);
    let mut from = 0;
    for row in 1..=batch.len() {
        if row == batch.len() || keys[row] != keys[from] {
            let slice = batch.slice(from, row);
            let msg = DataMessage::from_batch(&slice)?;
            targets[ring.route(&keys[from])].send_msg(&msg)?;
            from = row;
        }
    }
    Ok(())
}

/// Sending half: route every input batch per kind, then mark every target
/// stream finished.
fn run_send(
    state: &RuntimeState,
    kind: &ExchangeKind,
    input: BatchReceiver,
    target_addrs: &[String],
    targets: &[Arc<dyn ExchangeLink>],
) -> Result<()> {
    match kind {
        ExchangeKind::Scatter => {
            let mut start = 0;
            while let Some(batch) = recv_batch(state, &input)? {
                scatter_batch(&batch, targets, start)?;
                start = (start + 1) % targets.len();
            }
        }
        ExchangeKind::Gather | ExchangeKind::MergeGather { .. } => {
            let Some(master) = targets.first() else {
                return Err(Error::exec("gather has no master target"));
            };
            while let Some(batch) = recv_batch(state, &input)? {
                master.send_msg(&DataMessage::from_batch(&batch)?)?;
            }
        }
        ExchangeKind::Broadcast => {
            while let Some(batch) = recv_batch(state, &input)? {
                let msg = DataMessage::from_batch(&batch)?;
                for link in targets {
                    link.send_msg(&msg)?;
                }
            }
        }
        ExchangeKind::Partition { cols } => {
            let ring = HashRing::new(target_addrs, config::hash_ring_vnodes());
            while let Some(batch) = recv_batch(state, &input)? {
                partition_batch(batch, cols, &ring, targets)?;
            }
        }
    }
    for link in targets {
        link.send_msg(&DataMessage::Eos)?;
        link.close_send();
    }
    Ok(())
}

/// A decoded error marker follows the same propagation rules as a local
/// stage error: the benign sentinels and already-wrapped remote failures
/// pass through, anything else becomes a remote failure.
fn remote_failure(err: Error) -> Error {
    match err {
        Error::Canceled | Error::Ignorable | Error::Remote(_) => err,
        other => Error::Remote(other.to_string()),
    }
}

/// Receiving half for the non-merging kinds: decode batches from one source
/// into the shared output until its `Eos` marker.
fn run_recv(
    state: &RuntimeState,
    link: &dyn ExchangeLink,
    registry: &Registry,
    output: &BatchSender,
) -> Result<()> {
    loop {
        match link.recv_msg()? {
            DataMessage::Batch(columns) => {
                let batch = decode_batch(registry, columns)?;
                send_batch(state, output, batch)?;
            }
            DataMessage::Eos => return Ok(()),
            DataMessage::Error(err) => return Err(remote_failure(err)),
        }
    }
}

/// Pull adapter from one link to the merge algorithm.
struct LinkSource<'a> {
    link: &'a dyn ExchangeLink,
    registry: &'a Registry,
}

impl BatchSource for LinkSource<'_> {
    fn next_batch(&mut self) -> Result<Option<Dataset>> {
        match self.link.recv_msg()? {
            DataMessage::Batch(columns) => Ok(Some(decode_batch(self.registry, columns)?)),
            DataMessage::Eos => Ok(None),
            DataMessage::Error(err) => Err(remote_failure(err)),
        }
    }
}

fn run_merge(
    state: &RuntimeState,
    cols: &[SortingCol],
    source_links: &[Arc<dyn ExchangeLink>],
    output: &BatchSender,
) -> Result<()> {
    let registry = state.registry().as_ref();
    let sources: Vec<Box<dyn BatchSource + '_>> = source_links
        .iter()
        .map(|link| {
            Box::new(LinkSource {
                link: link.as_ref(),
                registry,
            }) as Box<dyn BatchSource + '_>
        })
        .collect();
    merge_sorted(sources, cols, |batch| send_batch(state, output, batch))
}

/// Record a failure unless it is teardown noise: transport errors after the
/// job is already cancelled are expected when links get closed under a
/// blocked thread.
fn note_failure(state: &RuntimeState, err: &Error) {
    match err {
        Error::Transport(_) if state.is_canceled() => {}
        other => state.fail(other),
    }
}

impl Runner for Exchange {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::Wildcard]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        if state.peers().is_empty() {
            return Err(Error::exec("exchange requires a cluster execution context"));
        }
        let (target_addrs, source_addrs) =
            self.kind
                .routes(state.node(), state.master(), state.peers());

        let mut links: HashMap<String, Arc<dyn ExchangeLink>> = HashMap::new();
        for addr in target_addrs.iter().chain(source_addrs.iter()) {
            if links.contains_key(addr) {
                continue;
            }
            let link: Arc<dyn ExchangeLink> = if addr == state.node() {
                Arc::new(Loopback::new(config::relay_buffer_batches()))
            } else {
                let conn = state.distributer()?.connect(state, addr, self.uid)?;
                Arc::new(FramedLink::new(conn)?)
            };
            links.insert(addr.clone(), link);
        }
        let resolve = |addrs: &[String]| -> Result<Vec<Arc<dyn ExchangeLink>>> {
            addrs
                .iter()
                .map(|addr| {
                    links
                        .get(addr)
                        .map(Arc::clone)
                        .ok_or_else(|| Error::exec(format!("no exchange link for {}", addr)))
                })
                .collect()
        };
        let target_links = resolve(&target_addrs)?;
        let source_links = resolve(&source_addrs)?;

        thread::scope(|s| {
            let (done_tx, done_rx) = bounded::<()>(0);

            // Closes every link one grace delay after cancellation, so a
            // thread stuck in network I/O cannot pin the job. Exits silently
            // when all workers finish first.
            let watch: Vec<Arc<dyn ExchangeLink>> = links.values().map(Arc::clone).collect();
            thread::Builder::new()
                .name("millrace-exchange-watch".to_string())
                .spawn_scoped(s, move || {
                    select! {
                        recv(state.cancel_signal()) -> _ => {
                            thread::sleep(Duration::from_millis(config::exchange_close_grace_ms()));
                            for link in &watch {
                                link.close();
                            }
                        }
                        recv(done_rx) -> _ => {}
                    }
                })
                .expect("spawn exchange watchdog thread");

            {
                let kind = &self.kind;
                let targets = target_links.clone();
                let addrs = &target_addrs;
                let worker_done = done_tx.clone();
                let leftovers = input.clone();
                thread::Builder::new()
                    .name("millrace-exchange-send".to_string())
                    .spawn_scoped(s, move || {
                        let _done = worker_done;
                        if let Err(err) = run_send(state, kind, input, addrs, &targets) {
                            note_failure(state, &err);
                            let marker = match state.error() {
                                Some(recorded) => DataMessage::from_error(&recorded),
                                None if state.stopped_early() => {
                                    DataMessage::from_error(&Error::Ignorable)
                                }
                                None => DataMessage::from_error(&err),
                            };
                            debug!(err = %err, "exchange sender stopping, propagating markers");
                            for link in &targets {
                                let _ = link.send_msg(&marker);
                            }
                            thread::sleep(Duration::from_millis(config::exchange_close_grace_ms()));
                            for link in &targets {
                                link.close_send();
                            }
                            drain(&leftovers);
                        }
                    })
                    .expect("spawn exchange sender thread");
            }

            if let ExchangeKind::MergeGather { cols } = &self.kind {
                if !source_links.is_empty()
                    && let Err(err) = run_merge(state, cols, &source_links, &output)
                {
                    note_failure(state, &err);
                }
                drop(output);
            } else {
                for (i, link) in source_links.iter().enumerate() {
                    let out = output.clone();
                    let worker_done = done_tx.clone();
                    let link = Arc::clone(link);
                    let registry = Arc::clone(state.registry());
                    thread::Builder::new()
                        .name(format!("millrace-exchange-recv-{}", i))
                        .spawn_scoped(s, move || {
                            let _done = worker_done;
                            if let Err(err) = run_recv(state, link.as_ref(), registry.as_ref(), &out)
                            {
                                note_failure(state, &err);
                            }
                        })
                        .expect("spawn exchange receiver thread");
                }
                drop(output);
            }
        });

        for link in links.values() {
            link.close();
        }
        state.outcome()
    }
}
