// Copyright [2026] [VeriDB Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Domain model of the VeriDB transaction log: entries, references, sorted
//! sets, transaction headers, canonical digests for both header versions,
//! and the composite dual-proof check that advances the trusted state.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod codec;
pub mod digest;
pub mod dual;
pub mod error;
pub mod metadata;
pub mod schema;
pub mod state;

pub use veridb_verifier::{Hash32, EMPTY_DIGEST};
