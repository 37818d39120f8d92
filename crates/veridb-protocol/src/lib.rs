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

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

pub mod pb {
    pub mod v1 {
        tonic::include_proto!("veridb.v1");
    }

    pub use v1::*;
}

pub const PROTOCOL_SEMVER: &str = "1.0.0";

/// Metadata key carrying the server-assigned session id on every
/// authenticated RPC.
///
/// This header name is a wire-level contract shared with the server. Do not
/// modify without a coordinated protocol version bump.
pub const SESSION_ID_HEADER: &str = "sessionid";

/// Substrings the server embeds in `Status` messages for the two lookup
/// failures clients are expected to translate into typed errors.
pub const KEY_NOT_FOUND_MSG: &str = "key not found";
pub const TX_NOT_FOUND_MSG: &str = "tx not found";

/// User permission codes accepted by `CreateUser`.
pub const PERMISSION_READ: u32 = 1;
pub const PERMISSION_READ_WRITE: u32 = 2;
pub const PERMISSION_ADMIN: u32 = 254;
