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

//! Verifying client for VeriDB, an immutable key-value and sorted-set
//! database with an append-only, Merkle-backed transaction log.
//!
//! Every verified operation proves the server's answer against the locally
//! trusted state (a transaction id plus its accumulated hash) and only then
//! advances and persists that state. Plain operations skip the proofs and
//! trust the transport.
//!
//! ```no_run
//! use veridb_client::{Client, ClientOptions};
//!
//! # async fn example() -> veridb_client::Result<()> {
//! let client = Client::new(ClientOptions::default());
//! client.open().await?;
//! client.verified_set(b"k1", b"v1").await?;
//! let entry = client.verified_get(b"k1").await?;
//! assert_eq!(entry.value, b"v1");
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod client;
mod error;
mod heartbeat;
mod options;
mod pool;
mod session;
mod store;

pub use client::Client;
pub use error::{Error, Result};
pub use options::ClientOptions;
pub use pool::{Connection, ConnectionPool, PoolOptions};
pub use session::{Session, SessionKind, SessionManager};
pub use store::{deployment_key, CacheStateStore, DeploymentInfo, FileStateStore, StateStore};

pub use veridb_core::metadata::KvMetadata;
pub use veridb_core::schema::{Entry, Reference, Tx, TxEntry, TxHeader, ZEntry};
pub use veridb_core::state::TrustedState;
pub use veridb_protocol::pb;
