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
//! Typed accessors over the loaded config. Every accessor falls back to the
//! built-in default when no config file is present.

use crate::millrace_config::config as millrace_app_config;

pub(crate) fn log_filter() -> String {
    millrace_app_config()
        .ok()
        .map(|c| {
            c.log_filter
                .clone()
                .unwrap_or_else(|| c.log_level.clone())
        })
        .unwrap_or_else(|| "info".to_string())
}

pub(crate) fn exchange_close_grace_ms() -> u64 {
    millrace_app_config()
        .ok()
        .map(|c| c.runtime.exchange_close_grace_ms)
        .unwrap_or(100)
}

pub(crate) fn relay_buffer_batches() -> usize {
    millrace_app_config()
        .ok()
        .map(|c| c.runtime.relay_buffer_batches)
        .unwrap_or(8)
}

pub(crate) fn connect_poll_ms() -> u64 {
    millrace_app_config()
        .ok()
        .map(|c| c.runtime.connect_poll_ms)
        .unwrap_or(100)
}

pub(crate) fn hash_ring_vnodes() -> usize {
    millrace_app_config()
        .ok()
        .map(|c| c.runtime.hash_ring_vnodes)
        .unwrap_or(16)
}
