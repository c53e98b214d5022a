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
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rendezvous identifier shared by both ends of one logical exchange.
///
/// Generated once when the exchange is placed into a plan and preserved
/// through serialization, so every peer's copy of the plan carries the same
/// id. Stored as a split u64 pair to stay `Copy` and cheap to hash as a
/// pending-table key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Uid {
    pub hi: u64,
    pub lo: u64,
}

impl Uid {
    pub fn new() -> Self {
        let (hi, lo) = Uuid::new_v4().as_u64_pair();
        Self { hi, lo }
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_u64_pair(self.hi, self.lo))
    }
}
