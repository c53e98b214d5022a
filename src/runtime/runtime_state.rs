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
//! - `RuntimeState`: the per-job execution context threaded through every
//!   `Runner::run` call. Carries this node's identity, the master address,
//!   the full peer set, the broker handle, the decode registry, and the
//!   shared cancel token and first-error holder.
//! - `RuntimeErrorState`: single-assignment first-error slot, read only
//!   after all tasks of the job have joined.
//! - `CancelToken`: job-wide cancellation observable from blocked queue
//!   operations via a closable channel.
//!
//! One cancel token and one error holder exist per composed job; states
//! derived with `with_cluster` share both with their parent.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::common::error::{Error, Result};
use crate::exec::registry::Registry;
use crate::service::distributer::Distributer;

/// Cancellation signal for one composed job.
///
/// Cancelling drops the held sender, which disconnects every clone of the
/// signal receiver; blocked `select!` arms on that receiver wake immediately.
#[derive(Clone)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
    keeper: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            keeper: Arc::new(Mutex::new(Some(tx))),
            signal: rx,
        }
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        if let Ok(mut keeper) = self.keeper.lock() {
            keeper.take();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Channel that disconnects when the token is cancelled. Nothing is ever
    /// sent on it; a `recv` arm firing means cancellation.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<Error>>,
    stopped_early: AtomicBool,
}

impl RuntimeErrorState {
    pub fn set_error(&self, err: Error) {
        let mut guard = self.error.lock().expect("runtime error lock");
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<Error> {
        self.error.lock().expect("runtime error lock").clone()
    }

    fn mark_stopped_early(&self) {
        self.stopped_early.store(true, Ordering::Release);
    }

    pub(crate) fn stopped_early(&self) -> bool {
        self.stopped_early.load(Ordering::Acquire)
    }
}

/// Per-job execution context.
///
/// Local jobs use `RuntimeState::new`; the broker derives the distributed
/// form with `with_cluster` when it executes a shipped plan or originates
/// one.
pub struct RuntimeState {
    node: String,
    master: String,
    peers: Vec<String>,
    distributer: Option<Arc<Distributer>>,
    registry: Arc<Registry>,
    error_state: Arc<RuntimeErrorState>,
    cancel: CancelToken,
}

impl RuntimeState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            node: String::new(),
            master: String::new(),
            peers: Vec::new(),
            distributer: None,
            registry,
            error_state: Arc::new(RuntimeErrorState::default()),
            cancel: CancelToken::new(),
        }
    }

    /// Derive the context for a distributed execution on this node. Shares
    /// the cancel token and error holder with `self` so the whole job stays
    /// one cancellation domain.
    pub fn with_cluster(
        &self,
        node: impl Into<String>,
        master: impl Into<String>,
        peers: Vec<String>,
        distributer: Arc<Distributer>,
    ) -> Self {
        Self {
            node: node.into(),
            master: master.into(),
            peers,
            distributer: Some(distributer),
            registry: Arc::clone(&self.registry),
            error_state: Arc::clone(&self.error_state),
            cancel: self.cancel.clone(),
        }
    }

    /// Cluster-shaped state without a broker, for exercising exchange logic
    /// on a single in-process node.
    #[cfg(test)]
    pub(crate) fn cluster_for_tests(
        registry: Arc<Registry>,
        node: &str,
        master: &str,
        peers: Vec<String>,
    ) -> Self {
        Self {
            node: node.to_string(),
            master: master.to_string(),
            peers,
            distributer: None,
            registry,
            error_state: Arc::new(RuntimeErrorState::default()),
            cancel: CancelToken::new(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn is_master(&self) -> bool {
        self.node == self.master
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn distributer(&self) -> Result<&Arc<Distributer>> {
        self.distributer
            .as_ref()
            .ok_or_else(|| Error::exec("no distributer attached to this runtime state"))
    }

    pub fn error_state(&self) -> Arc<RuntimeErrorState> {
        Arc::clone(&self.error_state)
    }

    pub fn error(&self) -> Option<Error> {
        self.error_state.error()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn cancel_signal(&self) -> &Receiver<()> {
        self.cancel.signal()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Whether the job was cancelled by an intentional early stop rather
    /// than a failure.
    pub(crate) fn stopped_early(&self) -> bool {
        self.error_state.stopped_early()
    }

    /// Record a stage failure and cancel the job. First hard error wins;
    /// the benign sentinels cancel without being recorded, and `Ignorable`
    /// additionally marks the job as stopped on purpose.
    pub fn fail(&self, err: &Error) {
        match err {
            Error::Ignorable => self.error_state.mark_stopped_early(),
            Error::Canceled => {}
            other => self.error_state.set_error(other.clone()),
        }
        self.cancel.cancel();
    }

    /// Job outcome, valid once every task has joined: the recorded first
    /// error, or `Canceled` when the token fired without a hard error and
    /// the stop was not an intentional early termination.
    pub fn outcome(&self) -> Result<()> {
        if let Some(err) = self.error_state.error() {
            return Err(err);
        }
        if self.cancel.is_canceled() && !self.error_state.stopped_early() {
            return Err(Error::Canceled);
        }
        Ok(())
    }
}

impl fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeState")
            .field("node", &self.node)
            .field("master", &self.master)
            .field("peers", &self.peers)
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}
