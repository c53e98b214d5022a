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
//! Explicit decode registry, constructed by the caller and passed through
//! the runtime state. Maps string tags to decoders for caller-defined
//! runners (the `Custom` plan node) and for column payloads arriving off
//! the wire. No global state; registration order does not matter.

use std::collections::HashMap;
use std::fmt;

use crate::common::error::{Error, Result};
use crate::exec::data::{Data, NULL_TYPE_TAG, NullData, STRINGS_TYPE_TAG, StringsData};
use crate::exec::runner::Runner;

type RunnerDecoder = Box<dyn Fn(&[u8]) -> Result<Box<dyn Runner>> + Send + Sync>;
type DataDecoder = Box<dyn Fn(&[u8]) -> Result<Box<dyn Data>> + Send + Sync>;

pub struct Registry {
    runners: HashMap<String, RunnerDecoder>,
    data: HashMap<String, DataDecoder>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
            data: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in column types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_data(STRINGS_TYPE_TAG, |bytes| StringsData::decode(bytes));
        registry.register_data(NULL_TYPE_TAG, |bytes| NullData::decode(bytes));
        registry
    }

    pub fn register_runner(
        &mut self,
        tag: impl Into<String>,
        decode: impl Fn(&[u8]) -> Result<Box<dyn Runner>> + Send + Sync + 'static,
    ) {
        self.runners.insert(tag.into(), Box::new(decode));
    }

    pub fn register_data(
        &mut self,
        tag: impl Into<String>,
        decode: impl Fn(&[u8]) -> Result<Box<dyn Data>> + Send + Sync + 'static,
    ) {
        self.data.insert(tag.into(), Box::new(decode));
    }

    pub fn decode_runner(&self, tag: &str, payload: &[u8]) -> Result<Box<dyn Runner>> {
        let decode = self
            .runners
            .get(tag)
            .ok_or_else(|| Error::Codec(format!("no runner registered for tag '{}'", tag)))?;
        decode(payload)
    }

    pub fn decode_data(&self, tag: &str, payload: &[u8]) -> Result<Box<dyn Data>> {
        let decode = self
            .data
            .get(tag)
            .ok_or_else(|| Error::Codec(format!("no column type registered for tag '{}'", tag)))?;
        decode(payload)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut runners: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        runners.sort_unstable();
        let mut data: Vec<&str> = self.data.keys().map(String::as_str).collect();
        data.sort_unstable();
        f.debug_struct("Registry")
            .field("runners", &runners)
            .field("data", &data)
            .finish()
    }
}
