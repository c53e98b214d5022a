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
//! - Wire formats: the job envelope carried by broker connections and the
//!   data messages carried by exchange connections, bincode-serialized behind
//!   a u32 little-endian length prefix per frame.
//! - `ExchangeLink`: the message-level send/receive contract exchange
//!   operators run against, implemented here for framed network connections
//!   (`FramedLink`) and by the in-process relay in `exec::exchange`.
//!
//! End-of-stream on a link is the explicit `Eos` marker. A disconnect
//! without one is reported as a transport error, which is what makes the
//! sender-side error markers observable ordering-wise.

use std::io::{Read, Write};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::common::error::{Error, Result};
use crate::common::types::Uid;
use crate::exec::data::Data;
use crate::exec::dataset::Dataset;
use crate::exec::plan::PlanNode;
use crate::exec::registry::Registry;
use crate::service::transport::Connection;

/// Hard cap on a single frame. Anything larger is a protocol breach, not a
/// legitimate batch.
pub const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

pub fn write_frame(w: &mut dyn Write, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_BYTES as usize {
        return Err(Error::Codec(format!(
            "refusing to write {} byte frame, limit is {}",
            payload.len(),
            MAX_FRAME_BYTES
        )));
    }
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame(r: &mut dyn Read) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)
        .map_err(|_| Error::Transport("connection closed".to_string()))?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(Error::Codec(format!(
            "incoming frame of {} bytes exceeds limit {}",
            len, MAX_FRAME_BYTES
        )));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)
        .map_err(|_| Error::Transport("connection closed".to_string()))?;
    Ok(payload)
}

/// First frame on every broker connection. Either a complete job to execute
/// (`plan` set) or a rendezvous request to park (`rendezvous` set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub origin: String,
    pub plan: Option<PlanNode>,
    pub peers: Vec<String>,
    pub rendezvous: Option<Uid>,
}

impl JobEnvelope {
    pub fn job(origin: impl Into<String>, plan: PlanNode, peers: Vec<String>) -> Self {
        Self {
            origin: origin.into(),
            plan: Some(plan),
            peers,
            rendezvous: None,
        }
    }

    pub fn rendezvous(origin: impl Into<String>, uid: Uid) -> Self {
        Self {
            origin: origin.into(),
            plan: None,
            peers: Vec::new(),
            rendezvous: Some(uid),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (envelope, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(envelope)
    }
}

/// One encoded column: registry tag plus the column's own payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireColumn {
    pub tag: String,
    pub payload: Vec<u8>,
}

/// Unit of traffic on an exchange link. The terminal error marker carries
/// the error value itself so canceled/ignorable exits stay benign on the
/// receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataMessage {
    Batch(Vec<WireColumn>),
    Eos,
    Error(Error),
}

impl DataMessage {
    pub fn from_batch(batch: &Dataset) -> Result<Self> {
        let mut columns = Vec::with_capacity(batch.width());
        for col in batch.columns() {
            let data_type = col.data_type();
            let tag = data_type.tag().ok_or_else(|| {
                Error::Codec(format!(
                    "column of type {} cannot be sent over the wire",
                    data_type
                ))
            })?;
            columns.push(WireColumn {
                tag: tag.to_string(),
                payload: col.encode()?,
            });
        }
        Ok(DataMessage::Batch(columns))
    }

    pub fn from_error(err: &Error) -> Self {
        DataMessage::Error(err.clone())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(msg)
    }
}

pub fn decode_batch(registry: &Registry, columns: Vec<WireColumn>) -> Result<Dataset> {
    let mut decoded: Vec<Box<dyn Data>> = Vec::with_capacity(columns.len());
    for col in columns {
        decoded.push(registry.decode_data(&col.tag, &col.payload)?);
    }
    Ok(Dataset::new(decoded))
}

/// Message-level view of one exchange connection. Implementations must be
/// shareable between one sending and one receiving thread.
pub trait ExchangeLink: Send + Sync {
    fn send_msg(&self, msg: &DataMessage) -> Result<()>;

    fn recv_msg(&self) -> Result<DataMessage>;

    /// Signal that no further messages will be sent. Receives stay usable.
    fn close_send(&self);

    /// Tear the link down entirely, waking a blocked receiver.
    fn close(&self);
}

/// Length-prefixed link over a real connection. The two directions are
/// independent clones of the stream, each behind its own lock.
pub struct FramedLink {
    writer: Mutex<Box<dyn Connection>>,
    reader: Mutex<Box<dyn Connection>>,
    ctrl: Box<dyn Connection>,
}

impl FramedLink {
    pub fn new(conn: Box<dyn Connection>) -> Result<Self> {
        let writer = conn.try_clone()?;
        let reader = conn.try_clone()?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            ctrl: conn,
        })
    }
}

impl ExchangeLink for FramedLink {
    fn send_msg(&self, msg: &DataMessage) -> Result<()> {
        let bytes = msg.encode()?;
        let mut writer = self.writer.lock().expect("link writer lock");
        write_frame(&mut **writer, &bytes)
    }

    fn recv_msg(&self) -> Result<DataMessage> {
        let bytes = {
            let mut reader = self.reader.lock().expect("link reader lock");
            read_frame(&mut **reader)?
        };
        DataMessage::decode(&bytes)
    }

    fn close_send(&self) {
        let _ = self.ctrl.shutdown_write();
    }

    fn close(&self) {
        let _ = self.ctrl.shutdown();
    }
}
