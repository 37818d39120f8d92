// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use crate::session::Session;
use crate::store::{DeploymentInfo, StateStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use veridb_core::state::TrustedState;

/// In-memory store for shared or stateless deployments. Same monotone
/// contract as the file store, no disk footprint.
#[derive(Default)]
pub struct CacheStateStore {
    label: String,
    states: RwLock<HashMap<String, TrustedState>>,
    deployment: RwLock<Option<DeploymentInfo>>,
}

impl CacheStateStore {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            states: RwLock::new(HashMap::new()),
            deployment: RwLock::new(None),
        }
    }
}

#[async_trait]
impl StateStore for CacheStateStore {
    async fn get_state(&self, database: &str) -> Result<Option<TrustedState>> {
        Ok(self.states.read().get(database).cloned())
    }

    async fn set_state(&self, _session: &Session, state: &TrustedState) -> Result<()> {
        let mut states = self.states.write();
        match states.get(&state.database) {
            Some(current) if state.tx_id <= current.tx_id => {}
            _ => {
                states.insert(state.database.clone(), state.clone());
            }
        }
        Ok(())
    }

    async fn deployment_info(&self) -> Result<Option<DeploymentInfo>> {
        Ok(self.deployment.read().clone())
    }

    async fn create_deployment_info(&self, session: &Session) -> Result<DeploymentInfo> {
        let info = DeploymentInfo {
            label: self.label.clone(),
            server_uuid: session.server_uuid.clone(),
        };
        *self.deployment.write() = Some(info.clone());
        Ok(info)
    }

    async fn adopt_deployment(&self, server_uuid: &str) -> Result<Option<DeploymentInfo>> {
        Ok(self
            .deployment
            .read()
            .clone()
            .filter(|info| info.server_uuid == server_uuid))
    }
}
