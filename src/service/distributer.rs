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
//! - The per-node connection broker. Listens on one address, and every
//!   inbound connection opens with a `JobEnvelope`: either a complete
//!   plan to execute on this node or a rendezvous request that pairs the
//!   connection with a local exchange.
//! - `connect` resolves which side of an exchange pair dials: the
//!   lexicographically smaller address dials, the larger one waits for the
//!   dialed connection to be parked under `(origin, uid)`. Dialers never
//!   block on the table, so rendezvous waits cannot form a cycle.
//! - `distribute` builds the master-side runner for a whole cluster job:
//!   ships the plan to every other peer, runs the local share, and reads a
//!   completion marker per peer off the job connection. The job connection
//!   doubles as a liveness channel; a shipped job cancels itself when it
//!   drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select};

use crate::common::config;
use crate::common::error::{Error, Result};
use crate::common::types::Uid;
use crate::exec::data::DataType;
use crate::exec::plan::PlanNode;
use crate::exec::registry::Registry;
use crate::exec::runner::Runner;
use crate::millrace_logging::{debug, info};
use crate::runtime::queue::{BatchReceiver, BatchSender, batch_queue, drain};
use crate::runtime::runtime_state::RuntimeState;
use crate::service::codec::{
    DataMessage, ExchangeLink, FramedLink, JobEnvelope, read_frame, write_frame,
};
use crate::service::transport::{Connection, Transport};

/// One rendezvous in flight: the waiter blocks on the condvar until the
/// dialed connection lands in the slot.
#[derive(Default)]
struct PendingSlot {
    conn: Mutex<Option<Box<dyn Connection>>>,
    ready: Condvar,
}

pub struct Distributer {
    transport: Box<dyn Transport>,
    local_addr: String,
    registry: Arc<Registry>,
    pending: Mutex<HashMap<(String, Uid), Arc<PendingSlot>>>,
    stop: AtomicBool,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Distributer {
    /// Bind `addr` and start accepting. Port zero resolves to the bound
    /// port, readable via `local_addr`.
    pub fn start(
        transport: Box<dyn Transport>,
        addr: &str,
        registry: Arc<Registry>,
    ) -> Result<Arc<Self>> {
        let listener = transport.listen(addr)?;
        let local_addr = listener.local_addr()?;
        let broker = Arc::new(Self {
            transport,
            local_addr,
            registry,
            pending: Mutex::new(HashMap::new()),
            stop: AtomicBool::new(false),
            accept_thread: Mutex::new(None),
        });
        info!(addr = %broker.local_addr, "distributer listening");

        // The accept loop holds only a weak reference, so dropping the last
        // user handle tears the broker down.
        let weak: Weak<Distributer> = Arc::downgrade(&broker);
        let handle = thread::Builder::new()
            .name("millrace-accept".to_string())
            .spawn(move || {
                loop {
                    let conn = match listener.accept() {
                        Ok(conn) => conn,
                        Err(err) => {
                            if let Some(broker) = weak.upgrade()
                                && !broker.stop.load(Ordering::Relaxed)
                            {
                                debug!(err = %err, "accept failed, stopping");
                            }
                            break;
                        }
                    };
                    let Some(broker) = weak.upgrade() else { break };
                    if broker.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    thread::Builder::new()
                        .name("millrace-serve".to_string())
                        .spawn(move || {
                            if let Err(err) = broker.serve(conn) {
                                debug!(err = %err, "connection handler ended with error");
                            }
                        })
                        .expect("spawn connection handler thread");
                }
            })
            .expect("spawn accept loop thread");
        broker
            .accept_thread
            .lock()
            .expect("accept handle lock")
            .replace(handle);
        Ok(broker)
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// The master-side runner for one cluster job. `peers` is the full
    /// participant list and must include this node.
    pub fn distribute(self: &Arc<Self>, plan: PlanNode, peers: Vec<String>) -> DistributedJob {
        DistributedJob {
            distributer: Arc::clone(self),
            plan,
            peers,
        }
    }

    /// Broker one exchange connection to `addr` under `uid`. The smaller
    /// address dials and returns immediately; the larger address waits for
    /// the dialed connection to arrive, polling the job's cancel state.
    pub fn connect(
        &self,
        state: &RuntimeState,
        addr: &str,
        uid: Uid,
    ) -> Result<Box<dyn Connection>> {
        if self.local_addr == addr {
            return Err(Error::exec(
                "cannot rendezvous with the local address, use the in-process relay",
            ));
        }
        if self.local_addr.as_str() < addr {
            self.ship(addr, &JobEnvelope::rendezvous(self.local_addr.clone(), uid))
        } else {
            self.await_dial(state, addr, uid)
        }
    }

    /// Stop accepting, join the accept loop and drop any parked
    /// connections. Idempotent.
    pub fn close(&self) {
        if self.stop.swap(true, Ordering::Relaxed) {
            return;
        }
        // A throwaway dial unblocks the accept call.
        if let Ok(conn) = self.transport.dial(&self.local_addr) {
            drop(conn);
        }
        let handle = self
            .accept_thread
            .lock()
            .expect("accept handle lock")
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.pending.lock().expect("pending table lock").clear();
    }

    /// Dial `addr` and put the envelope on the wire.
    fn ship(&self, addr: &str, envelope: &JobEnvelope) -> Result<Box<dyn Connection>> {
        let mut conn = self.transport.dial(addr)?;
        write_frame(conn.as_mut(), &envelope.encode()?)?;
        Ok(conn)
    }

    fn pending_slot(&self, key: &(String, Uid)) -> Arc<PendingSlot> {
        let mut pending = self.pending.lock().expect("pending table lock");
        Arc::clone(pending.entry(key.clone()).or_default())
    }

    /// Wait side of a rendezvous. Blocks until the peer's dial is parked,
    /// the job is canceled, or the broker closes.
    fn await_dial(&self, state: &RuntimeState, addr: &str, uid: Uid) -> Result<Box<dyn Connection>> {
        let key = (addr.to_string(), uid);
        let slot = self.pending_slot(&key);
        let mut parked = slot.conn.lock().expect("pending slot lock");
        loop {
            if let Some(conn) = parked.take() {
                drop(parked);
                self.pending.lock().expect("pending table lock").remove(&key);
                return Ok(conn);
            }
            if state.is_canceled() {
                return Err(Error::Canceled);
            }
            if self.stop.load(Ordering::Relaxed) {
                return Err(Error::Transport("distributer closed".to_string()));
            }
            let (guard, _) = slot
                .ready
                .wait_timeout(parked, Duration::from_millis(config::connect_poll_ms()))
                .expect("pending slot wait");
            parked = guard;
        }
    }

    fn park(&self, origin: String, uid: Uid, conn: Box<dyn Connection>) {
        debug!(origin = %origin, uid = %uid, "parking rendezvous connection");
        let slot = self.pending_slot(&(origin, uid));
        *slot.conn.lock().expect("pending slot lock") = Some(conn);
        slot.ready.notify_all();
    }

    /// Handle one inbound connection: park it if it is a rendezvous, run
    /// the shipped plan and write the completion marker otherwise.
    fn serve(self: &Arc<Self>, mut conn: Box<dyn Connection>) -> Result<()> {
        let JobEnvelope {
            origin,
            plan,
            peers,
            rendezvous,
        } = JobEnvelope::decode(&read_frame(conn.as_mut())?)?;
        if let Some(uid) = rendezvous {
            self.park(origin, uid, conn);
            return Ok(());
        }
        let Some(plan) = plan else {
            return Err(Error::Codec(
                "envelope carries neither a plan nor a rendezvous id".to_string(),
            ));
        };
        debug!(origin = %origin, "executing shipped plan");

        let state = RuntimeState::new(Arc::clone(&self.registry)).with_cluster(
            self.local_addr.clone(),
            origin.clone(),
            peers,
            Arc::clone(self),
        );

        // If the master drops the job connection before completion, the
        // job no longer has a consumer anywhere. Cancel it.
        let mut liveness = conn.try_clone()?;
        let token = state.cancel_token().clone();
        thread::Builder::new()
            .name("millrace-job-sentinel".to_string())
            .spawn(move || {
                let _ = read_frame(liveness.as_mut());
                token.cancel();
            })
            .expect("spawn job sentinel thread");

        let outcome = self.execute(&state, &plan);
        if let Err(err) = &outcome {
            debug!(origin = %origin, err = %err, "shipped plan failed");
        }
        let marker = match &outcome {
            Ok(()) => DataMessage::Eos,
            Err(err) => DataMessage::from_error(err),
        };
        write_frame(conn.as_mut(), &marker.encode()?)
    }

    /// Run a shipped plan to completion. The plan's exchanges are its only
    /// data path here: the local input starts closed and local output is
    /// discarded.
    fn execute(&self, state: &RuntimeState, plan: &PlanNode) -> Result<()> {
        let runner = plan.instantiate(&self.registry)?;
        let (in_tx, in_rx) = batch_queue();
        drop(in_tx);
        let (out_tx, out_rx) = batch_queue();
        thread::scope(|s| {
            thread::Builder::new()
                .name("millrace-drain".to_string())
                .spawn_scoped(s, move || drain(&out_rx))
                .expect("spawn drain thread");
            if let Err(err) = runner.run(state, in_rx, out_tx) {
                state.fail(&err);
            }
        });
        state.outcome()
    }
}

impl Drop for Distributer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Master side of one cluster job: ships the plan, runs the local share
/// against the caller's input and output, and resolves once every peer has
/// acknowledged completion.
pub struct DistributedJob {
    distributer: Arc<Distributer>,
    plan: PlanNode,
    peers: Vec<String>,
}

impl Runner for DistributedJob {
    fn returns(&self) -> Vec<DataType> {
        vec![DataType::Wildcard]
    }

    fn run(&self, state: &RuntimeState, input: BatchReceiver, output: BatchSender) -> Result<()> {
        if self.peers.is_empty() {
            return Err(Error::exec("distributed job needs at least one peer"));
        }
        let local = self.distributer.local_addr().to_string();
        if !self.peers.iter().any(|peer| *peer == local) {
            return Err(Error::exec(format!(
                "peer list must include this node ({})",
                local
            )));
        }
        let cluster = state.with_cluster(
            local.clone(),
            local.clone(),
            self.peers.clone(),
            Arc::clone(&self.distributer),
        );
        let runner = self.plan.instantiate(cluster.registry())?;

        // Ship before running the local share, so every peer is working by
        // the time the exchanges rendezvous.
        let mut remote_links: Vec<(String, Arc<FramedLink>)> = Vec::new();
        for peer in &self.peers {
            if *peer == local {
                continue;
            }
            let envelope = JobEnvelope::job(local.clone(), self.plan.clone(), self.peers.clone());
            let conn = self.distributer.ship(peer, &envelope)?;
            remote_links.push((peer.clone(), Arc::new(FramedLink::new(conn)?)));
        }

        thread::scope(|s| {
            let cluster_ref = &cluster;
            let (done_tx, done_rx) = bounded::<()>(0);

            let watch: Vec<Arc<FramedLink>> =
                remote_links.iter().map(|(_, link)| Arc::clone(link)).collect();
            thread::Builder::new()
                .name("millrace-job-watch".to_string())
                .spawn_scoped(s, move || {
                    select! {
                        recv(cluster_ref.cancel_signal()) -> _ => {
                            thread::sleep(Duration::from_millis(config::exchange_close_grace_ms()));
                            for link in &watch {
                                link.close();
                            }
                        }
                        recv(done_rx) -> _ => {}
                    }
                })
                .expect("spawn job watchdog thread");

            for (i, (peer, link)) in remote_links.iter().enumerate() {
                let worker_done = done_tx.clone();
                let link = Arc::clone(link);
                let peer = peer.clone();
                thread::Builder::new()
                    .name(format!("millrace-monitor-{}", i))
                    .spawn_scoped(s, move || {
                        let _done = worker_done;
                        match link.recv_msg() {
                            Ok(DataMessage::Eos) => {}
                            Ok(DataMessage::Error(err)) => {
                                if !err.is_benign() {
                                    cluster_ref
                                        .fail(&Error::Remote(format!("{}: {}", peer, err)));
                                }
                            }
                            Ok(DataMessage::Batch(_)) => {
                                cluster_ref.fail(&Error::Codec(format!(
                                    "unexpected batch on the job channel from {}",
                                    peer
                                )));
                            }
                            Err(err) => {
                                if !cluster_ref.is_canceled() {
                                    cluster_ref
                                        .fail(&Error::Transport(format!("{}: {}", peer, err)));
                                }
                            }
                        }
                    })
                    .expect("spawn job monitor thread");
            }

            let leftovers = input.clone();
            if let Err(err) = runner.run(cluster_ref, input, output) {
                debug!(err = %err, "local share of distributed plan failed");
                cluster_ref.fail(&err);
                drain(&leftovers);
            }
        });

        for (_, link) in &remote_links {
            link.close();
        }
        cluster.outcome()
    }
}
