// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

use ed25519_dalek::VerifyingKey;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration. All fields have working defaults for a local
/// server.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_url: String,
    pub server_port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub heartbeat_interval: Duration,
    pub connection_shutdown_timeout: Duration,
    /// Enforce that the deployment directory on disk belongs to the server
    /// identified by the session's uuid.
    pub deployment_info_check: bool,
    /// Public key validating server state signatures. Without it, signatures
    /// are accepted as-is.
    pub server_signing_key: Option<VerifyingKey>,
    /// Applied to every RPC as a gRPC deadline when set.
    pub rpc_timeout: Option<Duration>,
    /// Root directory of the file-based state store.
    pub state_dir: PathBuf,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_url: "localhost".to_string(),
            server_port: 3322,
            username: "immudb".to_string(),
            password: "immudb".to_string(),
            database: "defaultdb".to_string(),
            heartbeat_interval: Duration::from_secs(60),
            connection_shutdown_timeout: Duration::from_secs(2),
            deployment_info_check: true,
            server_signing_key: None,
            rpc_timeout: None,
            state_dir: PathBuf::from("veridb-states"),
        }
    }
}

impl ClientOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_server(mut self, url: impl Into<String>, port: u16) -> Self {
        self.server_url = url.into();
        self.server_port = port;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_deployment_info_check(mut self, check: bool) -> Self {
        self.deployment_info_check = check;
        self
    }

    #[must_use]
    pub fn with_server_signing_key(mut self, key: VerifyingKey) -> Self {
        self.server_signing_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// The gRPC address: `http://<lowercased-host>:<port>` unless the host
    /// already carries a scheme.
    #[must_use]
    pub fn grpc_address(&self) -> String {
        if self.server_url.contains("://") {
            self.server_url.clone()
        } else {
            format!("http://{}:{}", self.server_url.to_lowercase(), self.server_port)
        }
    }
}
