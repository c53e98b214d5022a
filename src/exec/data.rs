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
//! - `Data`: the abstract column contract everything in the engine flows
//!   through. Columns are immutable in flight; the only in-place mutations
//!   are row swaps (sorting), null marking, and `copy_at` on builder
//!   batches owned by a single task.
//! - `DataType`: column type descriptor, including the two pseudo-types
//!   (`Wildcard`, `Any`) legal only in static `returns()` declarations.
//! - `SortingCol`: one key of a multi-key row order.
//! - Built-in columns: `StringsData` (the canonical concrete column) and
//!   `NullData` (placeholder emitted by elided branches).
//!
//! Cross-column operations (`less_other`, `append`, `copy_at`) require both
//! sides to be the same concrete type; mixing types is a caller contract
//! breach and panics rather than returning an error.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::Result;

pub const NULL_TYPE_TAG: &str = "null";
pub const STRINGS_TYPE_TAG: &str = "strings";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Resolved positionally to the previous stage's full return list.
    Wildcard,
    /// Matches any concrete type during static compatibility checks.
    Any,
    /// All-null placeholder column type.
    Null,
    /// Concrete type, identified by its registry tag.
    Named(String),
}

impl DataType {
    pub fn named(tag: impl Into<String>) -> Self {
        DataType::Named(tag.into())
    }

    pub fn strings() -> Self {
        DataType::Named(STRINGS_TYPE_TAG.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, DataType::Wildcard)
    }

    /// Registry tag for wire encoding. Pseudo-types have none: they must
    /// never describe live data.
    pub fn tag(&self) -> Option<&str> {
        match self {
            DataType::Named(tag) => Some(tag),
            DataType::Null => Some(NULL_TYPE_TAG),
            DataType::Wildcard | DataType::Any => None,
        }
    }

    /// Static compatibility for union-style checks: `Any` and `Null` match
    /// anything, and an unresolved `Wildcard` defers judgement.
    pub fn compatible_with(&self, other: &DataType) -> bool {
        match (self, other) {
            (DataType::Any, _) | (_, DataType::Any) => true,
            (DataType::Null, _) | (_, DataType::Null) => true,
            (DataType::Wildcard, _) | (_, DataType::Wildcard) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Wildcard => write!(f, "wildcard"),
            DataType::Any => write!(f, "any"),
            DataType::Null => write!(f, "null"),
            DataType::Named(tag) => write!(f, "{}", tag),
        }
    }
}

/// One key of a multi-key total order over a Dataset's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortingCol {
    pub index: usize,
    pub desc: bool,
}

impl SortingCol {
    pub fn ascending(index: usize) -> Self {
        Self { index, desc: false }
    }

    pub fn descending(index: usize) -> Self {
        Self { index, desc: true }
    }
}

/// Abstract column of a single type.
pub trait Data: fmt::Debug + Send + Sync {
    fn data_type(&self) -> DataType;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row order within this column. Nulls sort before values.
    fn less(&self, i: usize, j: usize) -> bool;

    /// Row `i` of self against row `j` of `other` (same concrete type).
    fn less_other(&self, i: usize, other: &dyn Data, j: usize) -> bool;

    /// In-place row swap.
    fn swap(&mut self, i: usize, j: usize);

    /// Derived column over rows `[from, to)`.
    fn slice(&self, from: usize, to: usize) -> Box<dyn Data>;

    /// New column: self's rows followed by `other`'s (same concrete type).
    fn append(&self, other: &dyn Data) -> Box<dyn Data>;

    /// New column repeating all rows `times` times.
    fn duplicate(&self, times: usize) -> Box<dyn Data>;

    fn is_null(&self, i: usize) -> bool;

    fn mark_null(&mut self, i: usize);

    /// Overwrite row `to_row` with row `from_row` of `from` (same concrete
    /// type). Only legal on builder columns owned by a single task.
    fn copy_at(&mut self, from: &dyn Data, from_row: usize, to_row: usize);

    /// Value equality, including null positions. Differing concrete types
    /// compare unequal.
    fn equal(&self, other: &dyn Data) -> bool;

    /// Render every row; nulls render empty.
    fn strings(&self) -> Vec<String>;

    /// Serialized payload for the wire, paired with `data_type().tag()`.
    fn encode(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;

    fn clone_data(&self) -> Box<dyn Data>;
}

impl Clone for Box<dyn Data> {
    fn clone(&self) -> Self {
        self.clone_data()
    }
}

/// String column with per-row null marks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringsData {
    values: Vec<String>,
    nulls: Vec<bool>,
}

impl StringsData {
    pub fn new(values: Vec<String>) -> Self {
        let nulls = vec![false; values.len()];
        Self { values, nulls }
    }

    pub fn from_slice(values: &[&str]) -> Self {
        Self::new(values.iter().map(|s| s.to_string()).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn decode(bytes: &[u8]) -> Result<Box<dyn Data>> {
        let (col, _) =
            bincode::serde::decode_from_slice::<StringsData, _>(bytes, bincode::config::standard())?;
        Ok(Box::new(col))
    }

    fn expect_same(other: &dyn Data) -> &StringsData {
        other
            .as_any()
            .downcast_ref::<StringsData>()
            .expect("strings column paired with a different column type")
    }
}

impl Data for StringsData {
    fn data_type(&self) -> DataType {
        DataType::strings()
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn less(&self, i: usize, j: usize) -> bool {
        match (self.nulls[i], self.nulls[j]) {
            (true, true) => false,
            (true, false) => true,
            (false, true) => false,
            (false, false) => self.values[i] < self.values[j],
        }
    }

    fn less_other(&self, i: usize, other: &dyn Data, j: usize) -> bool {
        let other = Self::expect_same(other);
        match (self.nulls[i], other.nulls[j]) {
            (true, true) => false,
            (true, false) => true,
            (false, true) => false,
            (false, false) => self.values[i] < other.values[j],
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.values.swap(i, j);
        self.nulls.swap(i, j);
    }

    fn slice(&self, from: usize, to: usize) -> Box<dyn Data> {
        Box::new(StringsData {
            values: self.values[from..to].to_vec(),
            nulls: self.nulls[from..to].to_vec(),
        })
    }

    fn append(&self, other: &dyn Data) -> Box<dyn Data> {
        let other = Self::expect_same(other);
        let mut values = self.values.clone();
        values.extend_from_slice(&other.values);
        let mut nulls = self.nulls.clone();
        nulls.extend_from_slice(&other.nulls);
        Box::new(StringsData { values, nulls })
    }

    fn duplicate(&self, times: usize) -> Box<dyn Data> {
        let mut values = Vec::with_capacity(self.values.len() * times);
        let mut nulls = Vec::with_capacity(self.nulls.len() * times);
        for _ in 0..times {
            values.extend_from_slice(&self.values);
            nulls.extend_from_slice(&self.nulls);
        }
        Box::new(StringsData { values, nulls })
    }

    fn is_null(&self, i: usize) -> bool {
        self.nulls[i]
    }

    fn mark_null(&mut self, i: usize) {
        self.nulls[i] = true;
        self.values[i].clear();
    }

    fn copy_at(&mut self, from: &dyn Data, from_row: usize, to_row: usize) {
        let from = Self::expect_same(from);
        self.values[to_row] = from.values[from_row].clone();
        self.nulls[to_row] = from.nulls[from_row];
    }

    fn equal(&self, other: &dyn Data) -> bool {
        match other.as_any().downcast_ref::<StringsData>() {
            Some(other) => self.values == other.values && self.nulls == other.nulls,
            None => false,
        }
    }

    fn strings(&self) -> Vec<String> {
        self.values
            .iter()
            .zip(&self.nulls)
            .map(|(v, null)| if *null { String::new() } else { v.clone() })
            .collect()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_data(&self) -> Box<dyn Data> {
        Box::new(self.clone())
    }
}

/// Zero-storage column of `len` nulls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NullData {
    len: usize,
}

impl NullData {
    pub fn new(len: usize) -> Self {
        Self { len }
    }

    pub fn decode(bytes: &[u8]) -> Result<Box<dyn Data>> {
        let (col, _) =
            bincode::serde::decode_from_slice::<NullData, _>(bytes, bincode::config::standard())?;
        Ok(Box::new(col))
    }
}

impl Data for NullData {
    fn data_type(&self) -> DataType {
        DataType::Null
    }

    fn len(&self) -> usize {
        self.len
    }

    fn less(&self, _i: usize, _j: usize) -> bool {
        false
    }

    fn less_other(&self, _i: usize, _other: &dyn Data, _j: usize) -> bool {
        false
    }

    fn swap(&mut self, _i: usize, _j: usize) {}

    fn slice(&self, from: usize, to: usize) -> Box<dyn Data> {
        Box::new(NullData { len: to - from })
    }

    fn append(&self, other: &dyn Data) -> Box<dyn Data> {
        Box::new(NullData {
            len: self.len + other.len(),
        })
    }

    fn duplicate(&self, times: usize) -> Box<dyn Data> {
        Box::new(NullData {
            len: self.len * times,
        })
    }

    fn is_null(&self, _i: usize) -> bool {
        true
    }

    fn mark_null(&mut self, _i: usize) {}

    fn copy_at(&mut self, _from: &dyn Data, _from_row: usize, _to_row: usize) {}

    fn equal(&self, other: &dyn Data) -> bool {
        match other.as_any().downcast_ref::<NullData>() {
            Some(other) => self.len == other.len,
            None => false,
        }
    }

    fn strings(&self) -> Vec<String> {
        vec![String::new(); self.len]
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_data(&self) -> Box<dyn Data> {
        Box::new(*self)
    }
}
