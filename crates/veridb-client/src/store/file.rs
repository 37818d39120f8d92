// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::session::Session;
use crate::store::{deployment_key, DeploymentInfo, StateStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use veridb_core::state::TrustedState;

const DEPLOYMENT_INFO_FILE: &str = "deploymentinfo";

/// Default store: one directory per deployment key under a configurable
/// root, one JSON file per database.
pub struct FileStateStore {
    root: PathBuf,
    label: String,
    deployment_dir: RwLock<PathBuf>,
    get_lock: Mutex<()>,
    set_lock: Mutex<()>,
    create_lock: Mutex<()>,
}

impl FileStateStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, address: &str) -> Self {
        let root = root.into();
        let deployment_dir = root.join(deployment_key(address));
        Self {
            root,
            label: address.to_string(),
            deployment_dir: RwLock::new(deployment_dir),
            get_lock: Mutex::new(()),
            set_lock: Mutex::new(()),
            create_lock: Mutex::new(()),
        }
    }

    fn state_path(&self, database: &str) -> PathBuf {
        self.deployment_dir
            .read()
            .join(format!("state_{database}"))
    }

    fn info_path(&self) -> PathBuf {
        self.deployment_dir.read().join(DEPLOYMENT_INFO_FILE)
    }

    async fn read_state_file(&self, database: &str) -> Result<Option<TrustedState>> {
        let path = self.state_path(database);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| Error::corrupted(format!("state file {}: {err}", path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::state_io(
                format!("reading state file {}", path.display()),
                err,
            )),
        }
    }

    async fn read_info_file(path: &Path) -> Result<Option<DeploymentInfo>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| Error::corrupted(format!("deployment info {}: {err}", path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::state_io(
                format!("reading deployment info {}", path.display()),
                err,
            )),
        }
    }

    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Write-to-temp then rename. If the rename is refused while the target
    /// exists (no atomic overwrite on this platform), move the old file
    /// aside, rename the new one into place, and drop the intermediate.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::state_io(format!("creating {}", parent.display()), err))?;
        }

        let tmp = Self::sibling(path, ".tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|err| Error::state_io(format!("writing {}", tmp.display()), err))?;

        match tokio::fs::rename(&tmp, path).await {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                if tokio::fs::try_exists(path).await.unwrap_or(false) {
                    let aside = Self::sibling(path, ".old");
                    tokio::fs::rename(path, &aside).await.map_err(|err| {
                        Error::state_io(format!("moving aside {}", path.display()), err)
                    })?;
                    tokio::fs::rename(&tmp, path).await.map_err(|err| {
                        Error::state_io(format!("replacing {}", path.display()), err)
                    })?;
                    let _ = tokio::fs::remove_file(&aside).await;
                    Ok(())
                } else {
                    Err(Error::state_io(
                        format!("renaming into {}", path.display()),
                        rename_err,
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_state(&self, database: &str) -> Result<Option<TrustedState>> {
        let _guard = self.get_lock.lock().await;
        self.read_state_file(database).await
    }

    async fn set_state(&self, _session: &Session, state: &TrustedState) -> Result<()> {
        let _guard = self.set_lock.lock().await;

        if let Some(current) = self.read_state_file(&state.database).await? {
            if state.tx_id <= current.tx_id {
                tracing::debug!(
                    database = %state.database,
                    stored = current.tx_id,
                    offered = state.tx_id,
                    "discarding non-advancing state"
                );
                return Ok(());
            }
        }

        let bytes = serde_json::to_vec(state)
            .map_err(|err| Error::invalid_operation(format!("encoding state: {err}")))?;
        Self::write_atomic(&self.state_path(&state.database), &bytes).await
    }

    async fn deployment_info(&self) -> Result<Option<DeploymentInfo>> {
        Self::read_info_file(&self.info_path()).await
    }

    async fn create_deployment_info(&self, session: &Session) -> Result<DeploymentInfo> {
        let _guard = self.create_lock.lock().await;
        let info = DeploymentInfo {
            label: self.label.clone(),
            server_uuid: session.server_uuid.clone(),
        };
        let bytes = serde_json::to_vec(&info)
            .map_err(|err| Error::invalid_operation(format!("encoding deployment info: {err}")))?;
        Self::write_atomic(&self.info_path(), &bytes).await?;
        Ok(info)
    }

    async fn adopt_deployment(&self, server_uuid: &str) -> Result<Option<DeploymentInfo>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::state_io(
                    format!("scanning {}", self.root.display()),
                    err,
                ))
            }
        };

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|err| Error::state_io(format!("scanning {}", self.root.display()), err))?
        {
            let candidate = entry.path().join(DEPLOYMENT_INFO_FILE);
            let Some(info) = Self::read_info_file(&candidate).await.unwrap_or(None) else {
                continue;
            };
            if info.server_uuid == server_uuid {
                tracing::debug!(dir = %entry.path().display(), "adopted existing deployment");
                *self.deployment_dir.write() = entry.path();
                return Ok(Some(info));
            }
        }
        Ok(None)
    }
}
