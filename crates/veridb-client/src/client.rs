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

//! The client façade: session lifecycle, heartbeat, plain and verified
//! operations, and the authenticated-state cache.

use crate::error::{Error, Result};
use crate::heartbeat::{self, Heartbeat};
use crate::options::ClientOptions;
use crate::pool::{Connection, ConnectionPool};
use crate::session::{Session, SessionManager};
use crate::store::{FileStateStore, StateStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tonic::transport::Channel;
use tonic::Request;
use veridb_core::codec::{encode_zadd_key, wrap_with_prefix, SET_KEY_PREFIX};
use veridb_core::digest::entry_spec_digest;
use veridb_core::dual::verify_dual_proof;
use veridb_core::schema::{DualProof, Entry, InclusionProof, Reference, Tx, TxHeader, ZEntry};
use veridb_core::state::TrustedState;
use veridb_protocol::pb;
use veridb_protocol::pb::ledger_client::LedgerClient;
use veridb_protocol::SESSION_ID_HEADER;
use veridb_verifier::{verify_inclusion, Hash32, EMPTY_DIGEST};

/// Persists through the store, then publishes in memory, under one lock, so
/// readers never observe a state that was not durably written first.
struct StateCache {
    store: Arc<dyn StateStore>,
    cached: Mutex<HashMap<String, TrustedState>>,
}

impl StateCache {
    fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, database: &str) -> Result<Option<TrustedState>> {
        let mut cached = self.cached.lock().await;
        if let Some(state) = cached.get(database) {
            return Ok(Some(state.clone()));
        }
        if let Some(state) = self.store.get_state(database).await? {
            cached.insert(database.to_string(), state.clone());
            return Ok(Some(state));
        }
        Ok(None)
    }

    async fn advance(&self, session: &Session, state: &TrustedState) -> Result<()> {
        let mut cached = self.cached.lock().await;
        self.store.set_state(session, state).await?;
        match cached.get(&state.database) {
            Some(current) if state.tx_id <= current.tx_id => {}
            _ => {
                cached.insert(state.database.clone(), state.clone());
            }
        }
        Ok(())
    }
}

/// A verifying client bound to one server address.
///
/// A single instance may be shared between tasks once a session is open;
/// `open`/`close` serialize against each other and against themselves.
pub struct Client {
    options: ClientOptions,
    address: String,
    pool: Arc<ConnectionPool>,
    sessions: SessionManager,
    connection: Mutex<Option<Arc<Connection>>>,
    session: RwLock<Option<Session>>,
    current_db: RwLock<String>,
    state: StateCache,
    session_setup: Mutex<()>,
    heartbeat: Mutex<Option<Heartbeat>>,
    keepalive_ticks: parking_lot::Mutex<Option<watch::Receiver<u64>>>,
}

impl Client {
    /// A client using the process-wide pool and the file state store.
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        let address = options.grpc_address();
        let store: Arc<dyn StateStore> =
            Arc::new(FileStateStore::new(&options.state_dir, &address));
        Self::with_parts(options, ConnectionPool::global(), store)
    }

    /// Full dependency injection: explicit pool and state store.
    #[must_use]
    pub fn with_parts(
        options: ClientOptions,
        pool: Arc<ConnectionPool>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let address = options.grpc_address();
        let database = options.database.clone();
        Self {
            options,
            address,
            pool,
            sessions: SessionManager::new(),
            connection: Mutex::new(None),
            session: RwLock::new(None),
            current_db: RwLock::new(database),
            state: StateCache::new(store),
            session_setup: Mutex::new(()),
            heartbeat: Mutex::new(None),
            keepalive_ticks: parking_lot::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Observer of heartbeat activity; the value increments after every
    /// keep-alive attempt.
    #[must_use]
    pub fn keepalive_ticks(&self) -> Option<watch::Receiver<u64>> {
        self.keepalive_ticks.lock().clone()
    }

    // Session lifecycle ------------------------------------------------------

    /// Opens a session with the credentials and database from the options.
    pub async fn open(&self) -> Result<()> {
        let username = self.options.username.clone();
        let password = self.options.password.clone();
        let database = self.options.database.clone();
        self.open_as(&username, &password, &database).await
    }

    /// Opens a session, binds the deployment identity, validates the local
    /// state against the server, and starts the heartbeat.
    pub async fn open_as(&self, username: &str, password: &str, database: &str) -> Result<()> {
        let _setup = self.session_setup.lock().await;

        if self.session.read().is_some() {
            return Err(Error::invalid_operation("a session is already open"));
        }

        let connection = self.pool.acquire(&self.address).await?;
        *self.connection.lock().await = Some(connection.clone());

        let session = match self
            .sessions
            .open(&connection, username, password, database)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                self.drop_connection().await;
                return Err(err);
            }
        };

        *self.current_db.write() = database.to_string();

        let setup = async {
            self.ensure_deployment(&session).await?;
            self.validate_state_at_open(&connection, &session, database)
                .await
        };
        if let Err(err) = setup.await {
            let _ = self.sessions.close(&connection, &session).await;
            self.drop_connection().await;
            return Err(err);
        }

        self.start_heartbeat(&connection, &session).await?;
        *self.session.write() = Some(session);
        tracing::info!(database, "session open");
        Ok(())
    }

    /// Stops the heartbeat, closes the session, and releases the
    /// connection. Safe to call repeatedly; later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        let _setup = self.session_setup.lock().await;

        if let Some(hb) = self.heartbeat.lock().await.take() {
            hb.stop(self.options.connection_shutdown_timeout).await;
        }
        *self.keepalive_ticks.lock() = None;

        let session = self.session.write().take();
        let connection = self.connection.lock().await.take();

        if let (Some(session), Some(connection)) = (&session, &connection) {
            if let Err(err) = self.sessions.close(connection, session).await {
                tracing::warn!(error = %err, "close-session rpc failed");
            }
        }
        if let Some(connection) = connection {
            self.pool.release(&connection);
        }
        Ok(())
    }

    /// Swaps the pooled connection without touching the session.
    pub async fn reconnect(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if let Some(old) = guard.take() {
            self.pool.release(&old);
        }
        *guard = Some(self.pool.acquire(&self.address).await?);
        Ok(())
    }

    async fn drop_connection(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            self.pool.release(&connection);
        }
    }

    async fn start_heartbeat(&self, connection: &Connection, session: &Session) -> Result<()> {
        let (ticks_tx, ticks_rx) = watch::channel(0u64);
        let header = self.sessions.header_value(session)?;
        let hb = heartbeat::start(
            connection.channel(),
            header,
            self.options.heartbeat_interval,
            ticks_tx,
        );
        *self.heartbeat.lock().await = Some(hb);
        *self.keepalive_ticks.lock() = Some(ticks_rx);
        Ok(())
    }

    async fn ensure_deployment(&self, session: &Session) -> Result<()> {
        match self.state.store.deployment_info().await? {
            Some(info) if info.server_uuid == session.server_uuid => Ok(()),
            Some(info) => {
                if self.options.deployment_info_check {
                    Err(Error::verification(format!(
                        "deployment is bound to server {} but the session reports {}",
                        info.server_uuid, session.server_uuid
                    )))
                } else {
                    tracing::warn!(
                        bound = %info.server_uuid,
                        session = %session.server_uuid,
                        "deployment identity mismatch ignored"
                    );
                    Ok(())
                }
            }
            None => {
                if self
                    .state
                    .store
                    .adopt_deployment(&session.server_uuid)
                    .await?
                    .is_none()
                {
                    self.state.store.create_deployment_info(session).await?;
                }
                Ok(())
            }
        }
    }

    async fn validate_state_at_open(
        &self,
        connection: &Arc<Connection>,
        session: &Session,
        database: &str,
    ) -> Result<()> {
        let server_state = self.fetch_server_state(connection, session).await?;

        let Some(local) = self.state.get(database).await? else {
            return self.state.advance(session, &server_state).await;
        };
        if local.tx_id == 0 {
            return self.state.advance(session, &server_state).await;
        }
        if server_state.tx_id == local.tx_id {
            if server_state.tx_hash != local.tx_hash {
                return Err(Error::verification(
                    "server state diverges from the locally trusted state",
                ));
            }
            return Ok(());
        }

        let (source, target) = if local.tx_id < server_state.tx_id {
            (local, server_state)
        } else {
            (server_state, local)
        };

        let request = pb::VerifiableTxRequest {
            tx: target.tx_id,
            prove_since_tx: source.tx_id,
        };
        let response = match self
            .ledger(connection)
            .verifiable_tx_by_id(self.with_session(request, session)?)
            .await
        {
            Ok(response) => response.into_inner(),
            Err(status) => {
                return Err(match Error::from(status) {
                    Error::TxNotFound => {
                        Error::verification("server cannot prove the locally trusted state")
                    }
                    other => other,
                })
            }
        };

        let dual_pb = response
            .dual_proof
            .ok_or_else(|| Error::corrupted("missing dual proof"))?;
        let dual = DualProof::try_from(&dual_pb)?;
        if !verify_dual_proof(
            &dual,
            source.tx_id,
            target.tx_id,
            &source.tx_hash,
            &target.tx_hash,
        ) {
            return Err(Error::verification(
                "dual proof between local and server state",
            ));
        }
        self.state.advance(session, &target).await
    }

    // Authenticated state ----------------------------------------------------

    /// The locally trusted state of the active database. Fetched from the
    /// server (and persisted) the first time, served locally afterwards.
    pub async fn state(&self) -> Result<TrustedState> {
        let (connection, session) = self.rpc_parts().await?;
        let database = self.current_db.read().clone();
        self.trusted_state(&connection, &session, &database).await
    }

    async fn trusted_state(
        &self,
        connection: &Arc<Connection>,
        session: &Session,
        database: &str,
    ) -> Result<TrustedState> {
        if let Some(state) = self.state.get(database).await? {
            return Ok(state);
        }
        let server_state = self.fetch_server_state(connection, session).await?;
        self.state.advance(session, &server_state).await?;
        Ok(server_state)
    }

    async fn fetch_server_state(
        &self,
        connection: &Arc<Connection>,
        session: &Session,
    ) -> Result<TrustedState> {
        let response = self
            .ledger(connection)
            .current_state(self.with_session(pb::CurrentStateRequest {}, session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        let state = TrustedState::from_pb(&response)?;
        if let Some(key) = &self.options.server_signing_key {
            state.check_signature(key)?;
        }
        Ok(state)
    }

    async fn advance_state(
        &self,
        session: &Session,
        database: &str,
        target_tx_id: u64,
        target_alh: Hash32,
        signature: Option<pb::Signature>,
    ) -> Result<()> {
        let state = TrustedState::new(database, target_tx_id, target_alh)
            .with_signature(signature.map(|s| s.signature));
        if let Some(key) = &self.options.server_signing_key {
            state.check_signature(key)?;
        }
        self.state.advance(session, &state).await
    }

    // RPC plumbing -----------------------------------------------------------

    fn ledger(&self, connection: &Connection) -> LedgerClient<Channel> {
        LedgerClient::new(connection.channel())
    }

    fn with_session<T>(&self, message: T, session: &Session) -> Result<Request<T>> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert(SESSION_ID_HEADER, self.sessions.header_value(session)?);
        if let Some(timeout) = self.options.rpc_timeout {
            request.set_timeout(timeout);
        }
        Ok(request)
    }

    async fn rpc_parts(&self) -> Result<(Arc<Connection>, Session)> {
        let session = self
            .session
            .read()
            .clone()
            .ok_or_else(|| Error::invalid_operation("no open session"))?;
        let connection = self
            .connection
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::invalid_operation("connection has been released"))?;
        Ok((connection, session))
    }

    // Plain operations -------------------------------------------------------

    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<TxHeader> {
        self.set_all(vec![(key.to_vec(), value.to_vec())]).await
    }

    pub async fn set_all(&self, kvs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<TxHeader> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::SetRequest {
            kvs: kvs
                .into_iter()
                .map(|(key, value)| pb::KeyValue {
                    key,
                    value,
                    metadata: None,
                })
                .collect(),
            no_wait: false,
        };
        let header = self
            .ledger(&connection)
            .set(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(TxHeader::try_from(&header)?)
    }

    pub async fn get(&self, key: &[u8]) -> Result<Entry> {
        self.get_with(pb::KeyRequest {
            key: key.to_vec(),
            ..Default::default()
        })
        .await
    }

    pub async fn get_with(&self, request: pb::KeyRequest) -> Result<Entry> {
        let (connection, session) = self.rpc_parts().await?;
        let entry = self
            .ledger(&connection)
            .get(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(Entry::try_from(&entry)?)
    }

    pub async fn get_all(&self, keys: Vec<Vec<u8>>) -> Result<Vec<Entry>> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::KeyListRequest { keys, since_tx: 0 };
        let entries = self
            .ledger(&connection)
            .get_all(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        entries
            .entries
            .iter()
            .map(|e| Entry::try_from(e).map_err(Error::from))
            .collect()
    }

    pub async fn delete(&self, keys: Vec<Vec<u8>>) -> Result<TxHeader> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::DeleteKeysRequest {
            keys,
            since_tx: 0,
            no_wait: false,
        };
        let header = self
            .ledger(&connection)
            .delete(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(TxHeader::try_from(&header)?)
    }

    pub async fn scan(&self, request: pb::ScanRequest) -> Result<Vec<Entry>> {
        let (connection, session) = self.rpc_parts().await?;
        let entries = self
            .ledger(&connection)
            .scan(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        entries
            .entries
            .iter()
            .map(|e| Entry::try_from(e).map_err(Error::from))
            .collect()
    }

    pub async fn history(&self, request: pb::HistoryRequest) -> Result<Vec<Entry>> {
        let (connection, session) = self.rpc_parts().await?;
        let entries = self
            .ledger(&connection)
            .history(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        entries
            .entries
            .iter()
            .map(|e| Entry::try_from(e).map_err(Error::from))
            .collect()
    }

    pub async fn set_reference(
        &self,
        key: &[u8],
        referenced_key: &[u8],
        at_tx: u64,
    ) -> Result<TxHeader> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::ReferenceRequest {
            key: key.to_vec(),
            referenced_key: referenced_key.to_vec(),
            at_tx,
            bound_ref: at_tx > 0,
            no_wait: false,
        };
        let header = self
            .ledger(&connection)
            .set_reference(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(TxHeader::try_from(&header)?)
    }

    pub async fn z_add(&self, set: &[u8], score: f64, key: &[u8], at_tx: u64) -> Result<TxHeader> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::ZAddRequest {
            set: set.to_vec(),
            score,
            key: key.to_vec(),
            at_tx,
            bound_ref: at_tx > 0,
            no_wait: false,
        };
        let header = self
            .ledger(&connection)
            .z_add(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(TxHeader::try_from(&header)?)
    }

    pub async fn z_scan(&self, request: pb::ZScanRequest) -> Result<Vec<ZEntry>> {
        let (connection, session) = self.rpc_parts().await?;
        let entries = self
            .ledger(&connection)
            .z_scan(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        entries
            .entries
            .iter()
            .map(|e| ZEntry::try_from(e).map_err(Error::from))
            .collect()
    }

    pub async fn tx_by_id(&self, tx: u64) -> Result<Tx> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::TxRequest {
            tx,
            since_tx: 0,
            no_wait: false,
        };
        let tx = self
            .ledger(&connection)
            .tx_by_id(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(Tx::try_from(&tx)?)
    }

    pub async fn tx_scan(&self, request: pb::TxScanRequest) -> Result<Vec<Tx>> {
        let (connection, session) = self.rpc_parts().await?;
        let list = self
            .ledger(&connection)
            .tx_scan(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        list.txs
            .iter()
            .map(|t| Tx::try_from(t).map_err(Error::from))
            .collect()
    }

    // Verified operations ----------------------------------------------------

    pub async fn verified_set(&self, key: &[u8], value: &[u8]) -> Result<TxHeader> {
        self.verified_set_all(vec![(key.to_vec(), value.to_vec())])
            .await
    }

    pub async fn verified_set_all(&self, kvs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<TxHeader> {
        let (connection, session) = self.rpc_parts().await?;
        let database = self.current_db.read().clone();
        let local = self.trusted_state(&connection, &session, &database).await?;

        let request = pb::VerifiableSetRequest {
            set_request: Some(pb::SetRequest {
                kvs: kvs
                    .iter()
                    .map(|(key, value)| pb::KeyValue {
                        key: key.clone(),
                        value: value.clone(),
                        metadata: None,
                    })
                    .collect(),
                no_wait: false,
            }),
            prove_since_tx: local.tx_id,
        };
        let response = self
            .ledger(&connection)
            .verifiable_set(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();

        let tx_pb = response
            .tx
            .ok_or_else(|| Error::corrupted("missing transaction"))?;
        let tx = Tx::try_from(&tx_pb)?;
        if tx.header.nentries as usize != kvs.len() {
            return Err(Error::corrupted(
                "unexpected number of entries in the written transaction",
            ));
        }

        for (key, value) in &kvs {
            let entry = Entry {
                tx: tx.header.id,
                key: key.clone(),
                value: value.clone(),
                metadata: None,
                referenced_by: None,
                revision: 0,
            };
            let digest = entry.digest_for(tx.header.version)?;
            let encoded_key = wrap_with_prefix(SET_KEY_PREFIX, key);
            let proof = tx
                .inclusion_proof(&encoded_key)?
                .ok_or_else(|| Error::corrupted("written key missing from the transaction"))?;
            if !verify_inclusion(
                proof.leaf as usize,
                proof.width as usize,
                &proof.terms,
                &digest,
                &tx.header.eh,
            ) {
                return Err(Error::verification("inclusion proof for a written entry"));
            }
        }

        self.verify_write_dual_proof(&response.dual_proof, &tx.header, &local)?;
        self.advance_state(
            &session,
            &database,
            tx.header.id,
            tx.header.alh(),
            response.signature,
        )
        .await?;
        Ok(tx.header)
    }

    pub async fn verified_get(&self, key: &[u8]) -> Result<Entry> {
        self.verified_get_with(pb::KeyRequest {
            key: key.to_vec(),
            ..Default::default()
        })
        .await
    }

    pub async fn verified_get_with(&self, key_request: pb::KeyRequest) -> Result<Entry> {
        let (connection, session) = self.rpc_parts().await?;
        let database = self.current_db.read().clone();
        let local = self.trusted_state(&connection, &session, &database).await?;

        let request = pb::VerifiableGetRequest {
            key_request: Some(key_request),
            prove_since_tx: local.tx_id,
        };
        let response = self
            .ledger(&connection)
            .verifiable_get(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();

        let entry_pb = response
            .entry
            .ok_or_else(|| Error::corrupted("missing entry"))?;
        let entry = Entry::try_from(&entry_pb)?;
        let vtx = response
            .verifiable_tx
            .ok_or_else(|| Error::corrupted("missing verifiable transaction"))?;
        let dual_pb = vtx
            .dual_proof
            .ok_or_else(|| Error::corrupted("missing dual proof"))?;
        let dual = DualProof::try_from(&dual_pb)?;
        let inclusion_pb = response
            .inclusion_proof
            .ok_or_else(|| Error::corrupted("missing inclusion proof"))?;
        let inclusion = InclusionProof::try_from(&inclusion_pb)?;

        // The transaction holding the proven entry: the reference's when the
        // read was resolved through one.
        let entry_tx = entry.referenced_by.as_ref().map_or(entry.tx, |r| r.tx);

        let (eh, version, source_id, source_alh, target_id, target_alh) =
            if local.tx_id <= entry_tx {
                let target = &dual.target_tx_header;
                (
                    target.eh,
                    target.version,
                    local.tx_id,
                    local.tx_hash,
                    entry_tx,
                    target.alh(),
                )
            } else {
                let source = &dual.source_tx_header;
                (
                    source.eh,
                    source.version,
                    entry_tx,
                    source.alh(),
                    local.tx_id,
                    local.tx_hash,
                )
            };

        let digest = entry.digest_for(version)?;
        if !verify_inclusion(
            inclusion.leaf as usize,
            inclusion.width as usize,
            &inclusion.terms,
            &digest,
            &eh,
        ) {
            return Err(Error::verification("inclusion proof for the entry"));
        }

        let (source_id, source_alh) = if local.tx_id == 0 {
            (target_id, target_alh)
        } else {
            (source_id, source_alh)
        };
        if !verify_dual_proof(&dual, source_id, target_id, &source_alh, &target_alh) {
            return Err(Error::verification("dual proof for the entry transaction"));
        }

        self.advance_state(&session, &database, target_id, target_alh, vtx.signature)
            .await?;
        Ok(entry)
    }

    pub async fn verified_set_reference(
        &self,
        key: &[u8],
        referenced_key: &[u8],
        at_tx: u64,
    ) -> Result<TxHeader> {
        let (connection, session) = self.rpc_parts().await?;
        let database = self.current_db.read().clone();
        let local = self.trusted_state(&connection, &session, &database).await?;

        let request = pb::VerifiableReferenceRequest {
            reference_request: Some(pb::ReferenceRequest {
                key: key.to_vec(),
                referenced_key: referenced_key.to_vec(),
                at_tx,
                bound_ref: at_tx > 0,
                no_wait: false,
            }),
            prove_since_tx: local.tx_id,
        };
        let response = self
            .ledger(&connection)
            .verifiable_set_reference(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();

        let tx_pb = response
            .tx
            .ok_or_else(|| Error::corrupted("missing transaction"))?;
        let tx = Tx::try_from(&tx_pb)?;
        if tx.header.nentries != 1 {
            return Err(Error::corrupted(
                "reference transaction must hold exactly one entry",
            ));
        }

        let entry = Entry {
            tx: tx.header.id,
            key: referenced_key.to_vec(),
            value: Vec::new(),
            metadata: None,
            referenced_by: Some(Reference {
                tx: tx.header.id,
                key: key.to_vec(),
                at_tx,
                metadata: None,
                revision: 0,
            }),
            revision: 0,
        };
        let digest = entry.digest_for(tx.header.version)?;
        let encoded_key = wrap_with_prefix(SET_KEY_PREFIX, key);
        let proof = tx
            .inclusion_proof(&encoded_key)?
            .ok_or_else(|| Error::corrupted("reference key missing from the transaction"))?;
        if !verify_inclusion(
            proof.leaf as usize,
            proof.width as usize,
            &proof.terms,
            &digest,
            &tx.header.eh,
        ) {
            return Err(Error::verification("inclusion proof for the reference"));
        }

        self.verify_write_dual_proof(&response.dual_proof, &tx.header, &local)?;
        self.advance_state(
            &session,
            &database,
            tx.header.id,
            tx.header.alh(),
            response.signature,
        )
        .await?;
        Ok(tx.header)
    }

    pub async fn verified_z_add(
        &self,
        set: &[u8],
        score: f64,
        key: &[u8],
        at_tx: u64,
    ) -> Result<TxHeader> {
        let (connection, session) = self.rpc_parts().await?;
        let database = self.current_db.read().clone();
        let local = self.trusted_state(&connection, &session, &database).await?;

        let request = pb::VerifiableZAddRequest {
            z_add_request: Some(pb::ZAddRequest {
                set: set.to_vec(),
                score,
                key: key.to_vec(),
                at_tx,
                bound_ref: at_tx > 0,
                no_wait: false,
            }),
            prove_since_tx: local.tx_id,
        };
        let response = self
            .ledger(&connection)
            .verifiable_z_add(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();

        let tx_pb = response
            .tx
            .ok_or_else(|| Error::corrupted("missing transaction"))?;
        let tx = Tx::try_from(&tx_pb)?;
        if tx.header.nentries != 1 {
            return Err(Error::corrupted(
                "sorted-set transaction must hold exactly one entry",
            ));
        }

        let encoded_key = wrap_with_prefix(SET_KEY_PREFIX, key);
        let zkey = encode_zadd_key(set, score, &encoded_key, at_tx);
        let digest = entry_spec_digest(tx.header.version, None, &zkey, &EMPTY_DIGEST)?;
        let proof = tx
            .inclusion_proof(&zkey)?
            .ok_or_else(|| Error::corrupted("sorted-set key missing from the transaction"))?;
        if !verify_inclusion(
            proof.leaf as usize,
            proof.width as usize,
            &proof.terms,
            &digest,
            &tx.header.eh,
        ) {
            return Err(Error::verification("inclusion proof for the sorted-set entry"));
        }

        self.verify_write_dual_proof(&response.dual_proof, &tx.header, &local)?;
        self.advance_state(
            &session,
            &database,
            tx.header.id,
            tx.header.alh(),
            response.signature,
        )
        .await?;
        Ok(tx.header)
    }

    pub async fn verified_tx_by_id(&self, tx_id: u64) -> Result<Tx> {
        let (connection, session) = self.rpc_parts().await?;
        let database = self.current_db.read().clone();
        let local = self.trusted_state(&connection, &session, &database).await?;

        let request = pb::VerifiableTxRequest {
            tx: tx_id,
            prove_since_tx: local.tx_id,
        };
        let response = self
            .ledger(&connection)
            .verifiable_tx_by_id(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();

        let tx_pb = response
            .tx
            .ok_or_else(|| Error::corrupted("missing transaction"))?;
        let tx = Tx::try_from(&tx_pb)?;
        let dual_pb = response
            .dual_proof
            .ok_or_else(|| Error::corrupted("missing dual proof"))?;
        let dual = DualProof::try_from(&dual_pb)?;

        let (source_id, source_alh, target_id, target_alh) = if local.tx_id <= tx.header.id {
            (local.tx_id, local.tx_hash, tx.header.id, tx.header.alh())
        } else {
            (tx.header.id, tx.header.alh(), local.tx_id, local.tx_hash)
        };
        let (source_id, source_alh) = if local.tx_id == 0 {
            (target_id, target_alh)
        } else {
            (source_id, source_alh)
        };
        if !verify_dual_proof(&dual, source_id, target_id, &source_alh, &target_alh) {
            return Err(Error::verification("dual proof for the fetched transaction"));
        }

        self.advance_state(&session, &database, target_id, target_alh, response.signature)
            .await?;
        Ok(tx)
    }

    fn verify_write_dual_proof(
        &self,
        dual_pb: &Option<pb::DualProof>,
        header: &TxHeader,
        local: &TrustedState,
    ) -> Result<()> {
        let dual_pb = dual_pb
            .as_ref()
            .ok_or_else(|| Error::corrupted("missing dual proof"))?;
        let dual = DualProof::try_from(dual_pb)?;
        let target_alh = header.alh();
        let (source_id, source_alh) = if local.tx_id == 0 {
            (header.id, target_alh)
        } else {
            (local.tx_id, local.tx_hash)
        };
        if !verify_dual_proof(&dual, source_id, header.id, &source_alh, &target_alh) {
            return Err(Error::verification("dual proof for the written transaction"));
        }
        Ok(())
    }

    // Maintenance and administration -----------------------------------------

    pub async fn health(&self) -> Result<pb::HealthResponse> {
        let (connection, session) = self.rpc_parts().await?;
        Ok(self
            .ledger(&connection)
            .health(self.with_session(pb::HealthRequest {}, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner())
    }

    pub async fn flush_index(&self, cleanup_percentage: f32, synced: bool) -> Result<()> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::FlushIndexRequest {
            cleanup_percentage,
            synced,
        };
        self.ledger(&connection)
            .flush_index(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    pub async fn compact_index(&self) -> Result<()> {
        let (connection, session) = self.rpc_parts().await?;
        self.ledger(&connection)
            .compact_index(self.with_session(pb::CompactIndexRequest {}, &session)?)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    /// Returns whether the database already existed.
    pub async fn create_database(&self, name: &str, if_not_exists: bool) -> Result<bool> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::CreateDatabaseRequest {
            name: name.to_string(),
            if_not_exists,
        };
        let response = self
            .ledger(&connection)
            .create_database_v2(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(response.already_existed)
    }

    pub async fn use_database(&self, name: &str) -> Result<()> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::Database {
            database_name: name.to_string(),
        };
        self.ledger(&connection)
            .use_database(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?;
        *self.current_db.write() = name.to_string();
        Ok(())
    }

    pub async fn database_list(&self) -> Result<Vec<pb::DatabaseInfo>> {
        let (connection, session) = self.rpc_parts().await?;
        Ok(self
            .ledger(&connection)
            .database_list_v2(self.with_session(pb::DatabaseListRequest {}, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner()
            .databases)
    }

    pub async fn list_users(&self) -> Result<Vec<pb::User>> {
        let (connection, session) = self.rpc_parts().await?;
        Ok(self
            .ledger(&connection)
            .list_users(self.with_session(pb::ListUsersRequest {}, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner()
            .users)
    }

    pub async fn create_user(
        &self,
        user: &str,
        password: &str,
        permission: u32,
        database: &str,
    ) -> Result<()> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::CreateUserRequest {
            user: user.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
            permission,
            database: database.to_string(),
        };
        self.ledger(&connection)
            .create_user(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        user: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::ChangePasswordRequest {
            user: user.as_bytes().to_vec(),
            old_password: old_password.as_bytes().to_vec(),
            new_password: new_password.as_bytes().to_vec(),
        };
        self.ledger(&connection)
            .change_password(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    // SQL passthrough --------------------------------------------------------

    pub async fn sql_exec(
        &self,
        sql: &str,
        params: Vec<pb::NamedParam>,
    ) -> Result<pb::SqlExecResponse> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::SqlExecRequest {
            sql: sql.to_string(),
            params,
            no_wait: false,
        };
        Ok(self
            .ledger(&connection)
            .sql_exec(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner())
    }

    pub async fn sql_query(
        &self,
        sql: &str,
        params: Vec<pb::NamedParam>,
    ) -> Result<pb::SqlQueryResponse> {
        let (connection, session) = self.rpc_parts().await?;
        let request = pb::SqlQueryRequest {
            sql: sql.to_string(),
            params,
        };
        Ok(self
            .ledger(&connection)
            .sql_query(self.with_session(request, &session)?)
            .await
            .map_err(Error::from)?
            .into_inner())
    }
}
