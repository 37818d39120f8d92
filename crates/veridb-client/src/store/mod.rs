// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Durable storage of the latest verified state, isolated per server
//! deployment.

use crate::error::Result;
use crate::session::Session;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use veridb_core::state::TrustedState;
use veridb_verifier::sha256;

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::CacheStateStore;

/// Identity record binding a deployment directory to one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub label: String,
    #[serde(rename = "serveruuid")]
    pub server_uuid: String,
}

/// Pluggable persistence of `TrustedState`.
///
/// `set_state` is monotone: a state whose `txId` is not strictly greater
/// than the stored one for the same database is silently discarded.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(&self, database: &str) -> Result<Option<TrustedState>>;

    async fn set_state(&self, session: &Session, state: &TrustedState) -> Result<()>;

    async fn deployment_info(&self) -> Result<Option<DeploymentInfo>>;

    async fn create_deployment_info(&self, session: &Session) -> Result<DeploymentInfo>;

    /// Looks for an existing deployment owned by `server_uuid` and rebinds
    /// the store to it. Returns the adopted record, if any.
    async fn adopt_deployment(&self, server_uuid: &str) -> Result<Option<DeploymentInfo>>;
}

/// Short filesystem-safe identity of a gRPC address: base-64 of its SHA-256,
/// uppercased, url-safe substitutions, padding dropped, truncated to 30
/// characters.
#[must_use]
pub fn deployment_key(address: &str) -> String {
    let digest = sha256(address.as_bytes());
    let mut key = STANDARD
        .encode(digest)
        .to_uppercase()
        .replace('+', "-")
        .replace('/', "_")
        .replace('=', "");
    key.truncate(30);
    key
}
