// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Session lifecycle against the server's login RPCs.

use crate::error::{Error, Result};
use crate::pool::Connection;
use parking_lot::Mutex;
use std::collections::HashMap;
use tonic::metadata::AsciiMetadataValue;
use tonic::Request;
use veridb_protocol::pb;
use veridb_protocol::pb::ledger_client::LedgerClient;
use veridb_protocol::SESSION_ID_HEADER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Read,
    ReadWrite,
}

/// Authenticated context assigned by the server; identifies all subsequent
/// RPCs via the session header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub server_uuid: String,
    pub kind: SessionKind,
    pub sql_tx_id: Option<String>,
}

/// Credential scratch buffer cleared when it leaves scope.
struct Scratch(Vec<u8>);

impl Scratch {
    fn utf8(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }

    fn to_vec(&self) -> Vec<u8> {
        self.0.clone()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

/// Tracks live session records by server-assigned id and caches the last
/// constructed session header value.
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    header_cache: Mutex<Option<(String, AsciiMetadataValue)>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(
        &self,
        connection: &Connection,
        username: &str,
        password: &str,
        database: &str,
    ) -> Result<Session> {
        let user = Scratch::utf8(username);
        let pass = Scratch::utf8(password);
        let request = pb::OpenSessionRequest {
            username: user.to_vec(),
            password: pass.to_vec(),
            database_name: database.to_string(),
        };

        let mut client = LedgerClient::new(connection.channel());
        let response = client
            .open_session(request)
            .await
            .map_err(Error::from)?
            .into_inner();

        let session = Session {
            id: response.session_id,
            server_uuid: response.server_uuid,
            kind: SessionKind::ReadWrite,
            sql_tx_id: None,
        };
        if session.id.is_empty() {
            return Err(Error::corrupted("server returned an empty session id"));
        }
        tracing::debug!(session_id = %session.id, server_uuid = %session.server_uuid, "session opened");
        self.sessions.lock().insert(session.id.clone(), session.clone());
        Ok(session)
    }

    pub async fn close(&self, connection: &Connection, session: &Session) -> Result<()> {
        let mut request = Request::new(pb::CloseSessionRequest {});
        request
            .metadata_mut()
            .insert(SESSION_ID_HEADER, self.header_value(session)?);

        let mut client = LedgerClient::new(connection.channel());
        client.close_session(request).await.map_err(Error::from)?;

        self.sessions.lock().remove(&session.id);
        let mut cache = self.header_cache.lock();
        if cache.as_ref().is_some_and(|(id, _)| id == &session.id) {
            *cache = None;
        }
        tracing::debug!(session_id = %session.id, "session closed");
        Ok(())
    }

    /// The `sessionid` header value for a session, cached per id.
    pub fn header_value(&self, session: &Session) -> Result<AsciiMetadataValue> {
        let mut cache = self.header_cache.lock();
        if let Some((id, value)) = cache.as_ref() {
            if id == &session.id {
                return Ok(value.clone());
            }
        }
        let value: AsciiMetadataValue = session
            .id
            .parse()
            .map_err(|_| Error::invalid_operation("session id is not a valid header value"))?;
        *cache = Some((session.id.clone(), value.clone()));
        Ok(value)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
