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
//! Error taxonomy shared by every layer of the engine.
//!
//! All variants are cloneable so the per-job first-error holder can hand out
//! copies to every composition that asks. Two variants are sentinels rather
//! than failures: `Canceled` marks an exit forced by the shared cancel token,
//! and `Ignorable` marks a stage that chose to stop early and must not fail
//! the job.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Serde derives let a failing sender ship the error value itself as the
/// terminal stream marker, so the benign variants survive the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    /// Dial, accept, read or write failure on a peer connection.
    #[error("transport: {0}")]
    Transport(String),

    /// Frame or envelope (de)serialization failure.
    #[error("codec: {0}")]
    Codec(String),

    /// A stage's run failed.
    #[error("{0}")]
    Exec(String),

    /// Failure shipped in-band from a peer as a terminal stream marker.
    #[error("remote failure: {0}")]
    Remote(String),

    /// Sibling branches produced batches of unequal length.
    #[error("mismatched number of rows")]
    MismatchedRows,

    /// The shared cancel token fired while this operation was blocked.
    #[error("job canceled")]
    Canceled,

    /// Voluntary early stop; compositions treat this as success.
    #[error("ignorable termination")]
    Ignorable,
}

impl Error {
    pub fn exec(msg: impl Into<String>) -> Self {
        Error::Exec(msg.into())
    }

    /// True for the sentinels that never count as job failures on their own.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::Canceled | Error::Ignorable)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::Codec(err.to_string())
    }
}
