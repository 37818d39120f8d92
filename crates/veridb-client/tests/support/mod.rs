// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-process ledger server used by the integration tests.
//!
//! Maintains a real transaction log: an `Alh` chain, the binary log over
//! previous transactions, and per-transaction entry trees, so every
//! verifiable RPC answers with proofs the client must actually check.

#![allow(dead_code)]

use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use veridb_client::pb;
use veridb_client::pb::ledger_server::{Ledger, LedgerServer};
use veridb_core::codec::{
    encode_zadd_key, wrap_reference_value_at, wrap_with_prefix, PLAIN_VALUE_PREFIX, SET_KEY_PREFIX,
};
use veridb_core::metadata::KvMetadata;
use veridb_core::schema::{entry_tree_root, Tx, TxEntry, TxHeader};
use veridb_core::state::TrustedState;
use veridb_protocol::SESSION_ID_HEADER;
use veridb_verifier::{leaf_digest, node_hash, sha256, Hash32, EMPTY_DIGEST};

// Binary-log math (generation side; the client only verifies) ---------------

fn mth(leaves: &[Hash32]) -> Hash32 {
    match leaves.len() {
        0 => EMPTY_DIGEST,
        1 => leaves[0],
        n => {
            let k = 1usize << (usize::BITS - 1 - (n - 1).leading_zeros());
            node_hash(&mth(&leaves[..k]), &mth(&leaves[k..]))
        }
    }
}

fn subroot(leaves: &[Hash32], level: u32, p: u64) -> Hash32 {
    let lo = (p << level) as usize;
    let hi = (((p + 1) << level) as usize).min(leaves.len());
    mth(&leaves[lo..hi])
}

fn range_inclusion_terms(leaves: &[Hash32], i: u64) -> Vec<Hash32> {
    let j = leaves.len() as u64;
    let mut terms = Vec::new();
    let mut i1 = i - 1;
    let mut j1 = j - 1;
    let mut level = 0u32;
    while j1 > 0 {
        if i1 % 2 == 1 {
            terms.push(subroot(leaves, level, i1 - 1));
        } else if i1 < j1 {
            terms.push(subroot(leaves, level, i1 + 1));
        }
        i1 >>= 1;
        j1 >>= 1;
        level += 1;
    }
    terms
}

fn last_inclusion_terms(leaves: &[Hash32]) -> Vec<Hash32> {
    let mut terms = Vec::new();
    let mut i1 = leaves.len() as u64 - 1;
    let mut level = 0u32;
    while i1 > 0 {
        if i1 % 2 == 1 {
            terms.push(subroot(leaves, level, i1 - 1));
        }
        i1 >>= 1;
        level += 1;
    }
    terms
}

fn consistency_terms(leaves: &[Hash32], old: usize, include_self: bool) -> Vec<Hash32> {
    let n = leaves.len();
    if old == n {
        if include_self {
            return Vec::new();
        }
        return vec![mth(leaves)];
    }
    let k = 1usize << (usize::BITS - 1 - (n - 1).leading_zeros());
    if old <= k {
        let mut proof = consistency_terms(&leaves[..k], old, include_self);
        proof.push(mth(&leaves[k..]));
        proof
    } else {
        let mut proof = consistency_terms(&leaves[k..], old - k, false);
        proof.push(mth(&leaves[..k]));
        proof
    }
}

// Stored entries -------------------------------------------------------------

#[derive(Clone)]
enum StoredKind {
    Plain {
        key: Vec<u8>,
        value: Vec<u8>,
        deleted: bool,
    },
    Reference {
        key: Vec<u8>,
        target: Vec<u8>,
        at_tx: u64,
    },
    SortedSet,
}

#[derive(Clone)]
struct StoredEntry {
    kind: StoredKind,
    encoded_key: Vec<u8>,
    encoded_value: Vec<u8>,
    metadata: Option<KvMetadata>,
}

struct TxRecord {
    header: TxHeader,
    inner: Hash32,
    alh: Hash32,
    entries: Vec<StoredEntry>,
}

impl TxRecord {
    fn to_tx(&self) -> Tx {
        Tx {
            header: self.header.clone(),
            entries: self
                .entries
                .iter()
                .map(|e| TxEntry {
                    key: e.encoded_key.clone(),
                    metadata: e.metadata.clone(),
                    v_len: e.encoded_value.len() as i32,
                    h_value: sha256(&e.encoded_value),
                })
                .collect(),
        }
    }

    fn to_pb(&self) -> pb::Tx {
        pb::Tx {
            header: Some(pb::TxHeader::from(&self.header)),
            entries: self
                .entries
                .iter()
                .map(|e| pb::TxEntry {
                    key: e.encoded_key.clone(),
                    metadata: e.metadata.as_ref().map(KvMetadata::to_pb),
                    v_len: e.encoded_value.len() as i32,
                    h_value: sha256(&e.encoded_value).to_vec(),
                })
                .collect(),
        }
    }
}

struct LedgerCore {
    database: String,
    server_uuid: String,
    header_version: u16,
    signing_key: Option<SigningKey>,
    txs: Vec<TxRecord>,
    bl_leaves: Vec<Hash32>,
    // plain key -> (tx id, entry index) history, newest last
    index: BTreeMap<Vec<u8>, Vec<(u64, usize)>>,
    databases: HashSet<String>,
    next_session: u64,
    corrupt_next_inclusion: bool,
}

impl LedgerCore {
    fn commit(&mut self, entries: Vec<StoredEntry>) -> u64 {
        let id = self.txs.len() as u64 + 1;
        if id > 1 {
            let prev = &self.txs[(id - 2) as usize];
            self.bl_leaves.push(leaf_digest(&prev.alh));
        }
        let bl_tx_id = id - 1;
        let bl_root = if bl_tx_id == 0 {
            [0u8; 32]
        } else {
            mth(&self.bl_leaves[..bl_tx_id as usize])
        };
        let prev_alh = if id == 1 {
            [0u8; 32]
        } else {
            self.txs[(id - 2) as usize].alh
        };

        let leaves: Vec<Hash32> = entries
            .iter()
            .map(|e| {
                let tx_entry = TxEntry {
                    key: e.encoded_key.clone(),
                    metadata: e.metadata.clone(),
                    v_len: e.encoded_value.len() as i32,
                    h_value: sha256(&e.encoded_value),
                };
                leaf_digest(&tx_entry.digest(self.header_version).expect("digest"))
            })
            .collect();

        let header = TxHeader {
            version: self.header_version,
            id,
            prev_alh,
            ts: 1_700_000_000_000_000 + id as i64,
            nentries: entries.len() as i32,
            eh: entry_tree_root(&leaves),
            bl_tx_id,
            bl_root,
        };
        let inner = header.inner_hash();
        let alh = header.alh();

        for (idx, entry) in entries.iter().enumerate() {
            match &entry.kind {
                StoredKind::Plain { key, deleted, .. } => {
                    if *deleted {
                        self.index.remove(key);
                    } else {
                        self.index.entry(key.clone()).or_default().push((id, idx));
                    }
                }
                StoredKind::Reference { key, .. } => {
                    self.index.entry(key.clone()).or_default().push((id, idx));
                }
                StoredKind::SortedSet => {}
            }
        }

        self.txs.push(TxRecord {
            header,
            inner,
            alh,
            entries,
        });
        id
    }

    fn state(&self) -> pb::DatabaseState {
        let (tx_id, tx_hash) = match self.txs.last() {
            Some(last) => (last.header.id, last.alh),
            None => (0, [0u8; 32]),
        };
        let signature = self.signing_key.as_ref().map(|key| {
            let payload = TrustedState::new(self.database.clone(), tx_id, tx_hash).signing_payload();
            pb::Signature {
                public_key: key.verifying_key().to_bytes().to_vec(),
                signature: key.sign(&payload).to_bytes().to_vec(),
            }
        });
        pb::DatabaseState {
            db: self.database.clone(),
            tx_id,
            tx_hash: tx_hash.to_vec(),
            signature,
        }
    }

    fn signature_for(&self, tx_id: u64, alh: &Hash32) -> Option<pb::Signature> {
        self.signing_key.as_ref().map(|key| {
            let payload = TrustedState::new(self.database.clone(), tx_id, *alh).signing_payload();
            pb::Signature {
                public_key: key.verifying_key().to_bytes().to_vec(),
                signature: key.sign(&payload).to_bytes().to_vec(),
            }
        })
    }

    fn record(&self, id: u64) -> Result<&TxRecord, Status> {
        if id == 0 || id as usize > self.txs.len() {
            return Err(Status::not_found("tx not found"));
        }
        Ok(&self.txs[(id - 1) as usize])
    }

    fn dual_proof(&self, source_id: u64, target_id: u64) -> Result<pb::DualProof, Status> {
        let source = self.record(source_id)?;
        let target = self.record(target_id)?;
        let j = target.header.bl_tx_id;
        let bl = &self.bl_leaves[..j as usize];

        let inclusion = if source_id < j {
            range_inclusion_terms(bl, source_id)
        } else {
            Vec::new()
        };
        let consistency = if source.header.bl_tx_id > 0 {
            if source.header.bl_tx_id == j {
                Vec::new()
            } else {
                consistency_terms(bl, source.header.bl_tx_id as usize, false)
            }
        } else {
            Vec::new()
        };
        let last_inclusion = if j > 0 {
            last_inclusion_terms(bl)
        } else {
            Vec::new()
        };
        let target_bl_tx_alh = if j > 0 {
            self.txs[(j - 1) as usize].alh
        } else {
            [0u8; 32]
        };

        let (linear_source, linear_source_alh) = if source_id < j {
            (j, target_bl_tx_alh)
        } else {
            (source_id, source.alh)
        };
        let mut linear_terms = vec![linear_source_alh.to_vec()];
        for k in linear_source + 1..=target_id {
            linear_terms.push(self.txs[(k - 1) as usize].inner.to_vec());
        }

        Ok(pb::DualProof {
            source_tx_header: Some(pb::TxHeader::from(&source.header)),
            target_tx_header: Some(pb::TxHeader::from(&target.header)),
            inclusion_proof: inclusion.iter().map(|t| t.to_vec()).collect(),
            consistency_proof: consistency.iter().map(|t| t.to_vec()).collect(),
            target_bl_tx_alh: target_bl_tx_alh.to_vec(),
            last_inclusion_proof: last_inclusion.iter().map(|t| t.to_vec()).collect(),
            linear_proof: Some(pb::LinearProof {
                source_tx_id: linear_source,
                target_tx_id: target_id,
                terms: linear_terms,
            }),
        })
    }

    fn effective_source(&self, prove_since_tx: u64, target_id: u64) -> u64 {
        if prove_since_tx == 0 {
            target_id
        } else {
            prove_since_tx
        }
    }

    fn lookup(&self, key: &[u8]) -> Result<(u64, StoredEntry, u64), Status> {
        let versions = self
            .index
            .get(key)
            .ok_or_else(|| Status::not_found("key not found"))?;
        let (tx, idx) = *versions.last().ok_or_else(|| Status::not_found("key not found"))?;
        let entry = self.txs[(tx - 1) as usize].entries[idx].clone();
        Ok((tx, entry, versions.len() as u64))
    }

    fn resolve_entry(&self, key: &[u8]) -> Result<pb::Entry, Status> {
        let (tx, stored, revision) = self.lookup(key)?;
        match stored.kind {
            StoredKind::Plain { key, value, .. } => Ok(pb::Entry {
                tx,
                key,
                value,
                referenced_by: None,
                metadata: stored.metadata.as_ref().map(KvMetadata::to_pb),
                revision,
            }),
            StoredKind::Reference {
                key: ref_key,
                target,
                at_tx,
            } => {
                let (target_tx, target_entry, target_revision) = self.lookup(&target)?;
                let StoredKind::Plain { key, value, .. } = target_entry.kind else {
                    return Err(Status::not_found("key not found"));
                };
                Ok(pb::Entry {
                    tx: target_tx,
                    key,
                    value,
                    referenced_by: Some(pb::Reference {
                        tx,
                        key: ref_key,
                        at_tx,
                        metadata: None,
                        revision: 0,
                    }),
                    metadata: None,
                    revision: target_revision,
                })
            }
            StoredKind::SortedSet => Err(Status::not_found("key not found")),
        }
    }
}

/// Handle to an in-process ledger server instance.
#[derive(Clone)]
pub struct TestLedger {
    core: Arc<Mutex<LedgerCore>>,
}

impl TestLedger {
    pub fn new(database: &str, server_uuid: &str) -> Self {
        let mut databases = HashSet::new();
        databases.insert(database.to_string());
        Self {
            core: Arc::new(Mutex::new(LedgerCore {
                database: database.to_string(),
                server_uuid: server_uuid.to_string(),
                header_version: 1,
                signing_key: None,
                txs: Vec::new(),
                bl_leaves: Vec::new(),
                index: BTreeMap::new(),
                databases,
                next_session: 0,
                corrupt_next_inclusion: false,
            })),
        }
    }

    pub fn with_signing_key(self, key: SigningKey) -> Self {
        self.core.lock().signing_key = Some(key);
        self
    }

    /// Next `VerifiableGet` answers with one flipped bit in the first
    /// inclusion-proof term.
    pub fn corrupt_next_inclusion_proof(&self) {
        self.core.lock().corrupt_next_inclusion = true;
    }

    pub fn tx_count(&self) -> u64 {
        self.core.lock().txs.len() as u64
    }

    /// Commits a plain key-value transaction directly, bypassing a client.
    pub fn seed(&self, key: &[u8], value: &[u8]) -> u64 {
        self.core.lock().commit(vec![plain_entry(key, value)])
    }
}

fn plain_entry(key: &[u8], value: &[u8]) -> StoredEntry {
    StoredEntry {
        kind: StoredKind::Plain {
            key: key.to_vec(),
            value: value.to_vec(),
            deleted: false,
        },
        encoded_key: wrap_with_prefix(SET_KEY_PREFIX, key),
        encoded_value: wrap_with_prefix(PLAIN_VALUE_PREFIX, value),
        metadata: None,
    }
}

fn require_session<T>(request: &Request<T>) -> Result<(), Status> {
    if request.metadata().get(SESSION_ID_HEADER).is_none() {
        return Err(Status::unauthenticated("missing session"));
    }
    Ok(())
}

#[tonic::async_trait]
impl Ledger for TestLedger {
    async fn open_session(
        &self,
        request: Request<pb::OpenSessionRequest>,
    ) -> Result<Response<pb::OpenSessionResponse>, Status> {
        let req = request.into_inner();
        if req.username.is_empty() || req.password.is_empty() {
            return Err(Status::unauthenticated("invalid credentials"));
        }
        let mut core = self.core.lock();
        core.next_session += 1;
        Ok(Response::new(pb::OpenSessionResponse {
            session_id: format!("session-{}", core.next_session),
            server_uuid: core.server_uuid.clone(),
        }))
    }

    async fn close_session(
        &self,
        request: Request<pb::CloseSessionRequest>,
    ) -> Result<Response<pb::CloseSessionResponse>, Status> {
        require_session(&request)?;
        Ok(Response::new(pb::CloseSessionResponse {}))
    }

    async fn keep_alive(
        &self,
        request: Request<pb::KeepAliveRequest>,
    ) -> Result<Response<pb::KeepAliveResponse>, Status> {
        require_session(&request)?;
        Ok(Response::new(pb::KeepAliveResponse {}))
    }

    async fn current_state(
        &self,
        request: Request<pb::CurrentStateRequest>,
    ) -> Result<Response<pb::DatabaseState>, Status> {
        require_session(&request)?;
        Ok(Response::new(self.core.lock().state()))
    }

    async fn set(
        &self,
        request: Request<pb::SetRequest>,
    ) -> Result<Response<pb::TxHeader>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let entries: Vec<StoredEntry> = req
            .kvs
            .iter()
            .map(|kv| plain_entry(&kv.key, &kv.value))
            .collect();
        if entries.is_empty() {
            return Err(Status::invalid_argument("empty transaction"));
        }
        let mut core = self.core.lock();
        let id = core.commit(entries);
        Ok(Response::new(pb::TxHeader::from(&core.record(id)?.header)))
    }

    async fn verifiable_set(
        &self,
        request: Request<pb::VerifiableSetRequest>,
    ) -> Result<Response<pb::VerifiableTx>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let set = req
            .set_request
            .ok_or_else(|| Status::invalid_argument("missing set request"))?;
        let entries: Vec<StoredEntry> = set
            .kvs
            .iter()
            .map(|kv| plain_entry(&kv.key, &kv.value))
            .collect();
        if entries.is_empty() {
            return Err(Status::invalid_argument("empty transaction"));
        }
        let mut core = self.core.lock();
        let id = core.commit(entries);
        let source = core.effective_source(req.prove_since_tx, id);
        let dual = core.dual_proof(source, id)?;
        let alh = core.record(id)?.alh;
        let signature = core.signature_for(id, &alh);
        Ok(Response::new(pb::VerifiableTx {
            tx: Some(core.record(id)?.to_pb()),
            dual_proof: Some(dual),
            signature,
        }))
    }

    async fn get(&self, request: Request<pb::KeyRequest>) -> Result<Response<pb::Entry>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        Ok(Response::new(self.core.lock().resolve_entry(&req.key)?))
    }

    async fn verifiable_get(
        &self,
        request: Request<pb::VerifiableGetRequest>,
    ) -> Result<Response<pb::VerifiableEntry>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let key_request = req
            .key_request
            .ok_or_else(|| Status::invalid_argument("missing key request"))?;

        let mut core = self.core.lock();
        let entry = core.resolve_entry(&key_request.key)?;
        let entry_tx = entry
            .referenced_by
            .as_ref()
            .map_or(entry.tx, |r| r.tx);

        let (source, target) = if req.prove_since_tx <= entry_tx {
            (core.effective_source(req.prove_since_tx, entry_tx), entry_tx)
        } else {
            (entry_tx, req.prove_since_tx)
        };
        let dual = core.dual_proof(source, target)?;

        let record = core.record(entry_tx)?;
        let proven_key = match &entry.referenced_by {
            Some(reference) => wrap_with_prefix(SET_KEY_PREFIX, &reference.key),
            None => wrap_with_prefix(SET_KEY_PREFIX, &entry.key),
        };
        let proof = record
            .to_tx()
            .inclusion_proof(&proven_key)
            .map_err(|_| Status::internal("digest failure"))?
            .ok_or_else(|| Status::internal("entry missing from its transaction"))?;
        let mut terms: Vec<Vec<u8>> = proof.terms.iter().map(|t| t.to_vec()).collect();
        if core.corrupt_next_inclusion {
            core.corrupt_next_inclusion = false;
            if let Some(first) = terms.first_mut() {
                first[0] ^= 0x01;
            }
        }

        let target_alh = core.record(target)?.alh;
        let signature = core.signature_for(target, &target_alh);
        Ok(Response::new(pb::VerifiableEntry {
            entry: Some(entry),
            verifiable_tx: Some(pb::VerifiableTx {
                tx: Some(core.record(target)?.to_pb()),
                dual_proof: Some(dual),
                signature,
            }),
            inclusion_proof: Some(pb::InclusionProof {
                leaf: proof.leaf,
                width: proof.width,
                terms,
            }),
        }))
    }

    async fn get_all(
        &self,
        request: Request<pb::KeyListRequest>,
    ) -> Result<Response<pb::Entries>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let core = self.core.lock();
        let mut entries = Vec::new();
        for key in &req.keys {
            if let Ok(entry) = core.resolve_entry(key) {
                entries.push(entry);
            }
        }
        Ok(Response::new(pb::Entries { entries }))
    }

    async fn delete(
        &self,
        request: Request<pb::DeleteKeysRequest>,
    ) -> Result<Response<pb::TxHeader>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let mut core = self.core.lock();
        let mut entries = Vec::new();
        for key in &req.keys {
            if core.index.get(key).is_none() {
                return Err(Status::not_found("key not found"));
            }
            entries.push(StoredEntry {
                kind: StoredKind::Plain {
                    key: key.clone(),
                    value: Vec::new(),
                    deleted: true,
                },
                encoded_key: wrap_with_prefix(SET_KEY_PREFIX, key),
                encoded_value: wrap_with_prefix(PLAIN_VALUE_PREFIX, b""),
                metadata: Some(KvMetadata::new().with_deleted(true)),
            });
        }
        let id = core.commit(entries);
        Ok(Response::new(pb::TxHeader::from(&core.record(id)?.header)))
    }

    async fn set_reference(
        &self,
        request: Request<pb::ReferenceRequest>,
    ) -> Result<Response<pb::TxHeader>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let mut core = self.core.lock();
        if core.index.get(&req.referenced_key).is_none() {
            return Err(Status::not_found("key not found"));
        }
        let entry = reference_entry(&req.key, &req.referenced_key, req.at_tx);
        let id = core.commit(vec![entry]);
        Ok(Response::new(pb::TxHeader::from(&core.record(id)?.header)))
    }

    async fn verifiable_set_reference(
        &self,
        request: Request<pb::VerifiableReferenceRequest>,
    ) -> Result<Response<pb::VerifiableTx>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let reference = req
            .reference_request
            .ok_or_else(|| Status::invalid_argument("missing reference request"))?;
        let mut core = self.core.lock();
        if core.index.get(&reference.referenced_key).is_none() {
            return Err(Status::not_found("key not found"));
        }
        let entry = reference_entry(&reference.key, &reference.referenced_key, reference.at_tx);
        let id = core.commit(vec![entry]);
        let source = core.effective_source(req.prove_since_tx, id);
        let dual = core.dual_proof(source, id)?;
        let alh = core.record(id)?.alh;
        let signature = core.signature_for(id, &alh);
        Ok(Response::new(pb::VerifiableTx {
            tx: Some(core.record(id)?.to_pb()),
            dual_proof: Some(dual),
            signature,
        }))
    }

    async fn scan(
        &self,
        request: Request<pb::ScanRequest>,
    ) -> Result<Response<pb::Entries>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let core = self.core.lock();
        let mut entries: Vec<pb::Entry> = core
            .index
            .keys()
            .filter(|key| req.prefix.is_empty() || key.starts_with(&req.prefix))
            .filter_map(|key| core.resolve_entry(key).ok())
            .collect();
        if req.desc {
            entries.reverse();
        }
        if req.limit > 0 {
            entries.truncate(req.limit as usize);
        }
        Ok(Response::new(pb::Entries { entries }))
    }

    async fn history(
        &self,
        request: Request<pb::HistoryRequest>,
    ) -> Result<Response<pb::Entries>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let core = self.core.lock();
        let versions = core
            .index
            .get(&req.key)
            .ok_or_else(|| Status::not_found("key not found"))?;
        let mut entries = Vec::new();
        for (revision, (tx, idx)) in versions.iter().enumerate() {
            let stored = &core.txs[(*tx - 1) as usize].entries[*idx];
            if let StoredKind::Plain { key, value, .. } = &stored.kind {
                entries.push(pb::Entry {
                    tx: *tx,
                    key: key.clone(),
                    value: value.clone(),
                    referenced_by: None,
                    metadata: None,
                    revision: revision as u64 + 1,
                });
            }
        }
        if req.desc {
            entries.reverse();
        }
        if req.limit > 0 {
            entries.truncate(req.limit as usize);
        }
        Ok(Response::new(pb::Entries { entries }))
    }

    async fn z_add(
        &self,
        request: Request<pb::ZAddRequest>,
    ) -> Result<Response<pb::TxHeader>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let mut core = self.core.lock();
        let entry = zadd_entry(&req.set, req.score, &req.key, req.at_tx);
        let id = core.commit(vec![entry]);
        Ok(Response::new(pb::TxHeader::from(&core.record(id)?.header)))
    }

    async fn verifiable_z_add(
        &self,
        request: Request<pb::VerifiableZAddRequest>,
    ) -> Result<Response<pb::VerifiableTx>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let zadd = req
            .z_add_request
            .ok_or_else(|| Status::invalid_argument("missing zadd request"))?;
        let mut core = self.core.lock();
        let entry = zadd_entry(&zadd.set, zadd.score, &zadd.key, zadd.at_tx);
        let id = core.commit(vec![entry]);
        let source = core.effective_source(req.prove_since_tx, id);
        let dual = core.dual_proof(source, id)?;
        let alh = core.record(id)?.alh;
        let signature = core.signature_for(id, &alh);
        Ok(Response::new(pb::VerifiableTx {
            tx: Some(core.record(id)?.to_pb()),
            dual_proof: Some(dual),
            signature,
        }))
    }

    async fn z_scan(
        &self,
        request: Request<pb::ZScanRequest>,
    ) -> Result<Response<pb::ZEntries>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let core = self.core.lock();
        let mut entries = Vec::new();
        for record in &core.txs {
            for stored in &record.entries {
                if !matches!(stored.kind, StoredKind::SortedSet) {
                    continue;
                }
                // zkey layout: prefix, set length, set, score bits, key
                // length, encoded key, at_tx.
                let zkey = &stored.encoded_key;
                let set_len = u64::from_be_bytes(zkey[1..9].try_into().expect("set len")) as usize;
                let set = &zkey[9..9 + set_len];
                if set != req.set {
                    continue;
                }
                let mut pos = 9 + set_len;
                let score =
                    f64::from_bits(u64::from_be_bytes(zkey[pos..pos + 8].try_into().expect("score")));
                pos += 8;
                let key_len =
                    u64::from_be_bytes(zkey[pos..pos + 8].try_into().expect("key len")) as usize;
                pos += 8;
                let plain_key = zkey[pos + 1..pos + key_len].to_vec();
                pos += key_len;
                let at_tx = u64::from_be_bytes(zkey[pos..pos + 8].try_into().expect("at_tx"));
                if let Ok(entry) = core.resolve_entry(&plain_key) {
                    entries.push(pb::ZEntry {
                        set: set.to_vec(),
                        key: plain_key,
                        entry: Some(entry),
                        score,
                        at_tx,
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.score.total_cmp(&b.score));
        if req.desc {
            entries.reverse();
        }
        if req.limit > 0 {
            entries.truncate(req.limit as usize);
        }
        Ok(Response::new(pb::ZEntries { entries }))
    }

    async fn tx_by_id(&self, request: Request<pb::TxRequest>) -> Result<Response<pb::Tx>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let core = self.core.lock();
        Ok(Response::new(core.record(req.tx)?.to_pb()))
    }

    async fn verifiable_tx_by_id(
        &self,
        request: Request<pb::VerifiableTxRequest>,
    ) -> Result<Response<pb::VerifiableTx>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let core = self.core.lock();
        let target_record = core.record(req.tx)?;
        let id = target_record.header.id;
        let (source, target) = if req.prove_since_tx <= id {
            (core.effective_source(req.prove_since_tx, id), id)
        } else {
            (id, req.prove_since_tx)
        };
        let dual = core.dual_proof(source, target)?;
        let alh = core.record(target)?.alh;
        let signature = core.signature_for(target, &alh);
        Ok(Response::new(pb::VerifiableTx {
            tx: Some(core.record(req.tx)?.to_pb()),
            dual_proof: Some(dual),
            signature,
        }))
    }

    async fn tx_scan(
        &self,
        request: Request<pb::TxScanRequest>,
    ) -> Result<Response<pb::TxList>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let core = self.core.lock();
        let mut txs: Vec<pb::Tx> = core
            .txs
            .iter()
            .filter(|record| record.header.id >= req.initial_tx)
            .map(TxRecord::to_pb)
            .collect();
        if req.desc {
            txs.reverse();
        }
        if req.limit > 0 {
            txs.truncate(req.limit as usize);
        }
        Ok(Response::new(pb::TxList { txs }))
    }

    async fn flush_index(
        &self,
        request: Request<pb::FlushIndexRequest>,
    ) -> Result<Response<pb::FlushIndexResponse>, Status> {
        require_session(&request)?;
        Ok(Response::new(pb::FlushIndexResponse {
            database: self.core.lock().database.clone(),
        }))
    }

    async fn compact_index(
        &self,
        request: Request<pb::CompactIndexRequest>,
    ) -> Result<Response<pb::CompactIndexResponse>, Status> {
        require_session(&request)?;
        Ok(Response::new(pb::CompactIndexResponse {}))
    }

    async fn create_database_v2(
        &self,
        request: Request<pb::CreateDatabaseRequest>,
    ) -> Result<Response<pb::CreateDatabaseResponse>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        let mut core = self.core.lock();
        let already_existed = !core.databases.insert(req.name.clone());
        if already_existed && !req.if_not_exists {
            return Err(Status::already_exists("database already exists"));
        }
        Ok(Response::new(pb::CreateDatabaseResponse {
            name: req.name,
            already_existed,
        }))
    }

    async fn use_database(
        &self,
        request: Request<pb::Database>,
    ) -> Result<Response<pb::UseDatabaseResponse>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        if !self.core.lock().databases.contains(&req.database_name) {
            return Err(Status::not_found("database does not exist"));
        }
        Ok(Response::new(pb::UseDatabaseResponse {
            token: String::new(),
        }))
    }

    async fn database_list_v2(
        &self,
        request: Request<pb::DatabaseListRequest>,
    ) -> Result<Response<pb::DatabaseListResponse>, Status> {
        require_session(&request)?;
        let core = self.core.lock();
        let mut names: Vec<String> = core.databases.iter().cloned().collect();
        names.sort();
        Ok(Response::new(pb::DatabaseListResponse {
            databases: names
                .into_iter()
                .map(|name| pb::DatabaseInfo { name, loaded: true })
                .collect(),
        }))
    }

    async fn health(
        &self,
        request: Request<pb::HealthRequest>,
    ) -> Result<Response<pb::HealthResponse>, Status> {
        require_session(&request)?;
        Ok(Response::new(pb::HealthResponse {
            status: true,
            version: "test".to_string(),
        }))
    }

    async fn list_users(
        &self,
        request: Request<pb::ListUsersRequest>,
    ) -> Result<Response<pb::UserList>, Status> {
        require_session(&request)?;
        Ok(Response::new(pb::UserList {
            users: vec![pb::User {
                user: b"immudb".to_vec(),
                permissions: vec![],
                created_by: String::new(),
                created_at: String::new(),
                active: true,
            }],
        }))
    }

    async fn create_user(
        &self,
        request: Request<pb::CreateUserRequest>,
    ) -> Result<Response<pb::CreateUserResponse>, Status> {
        require_session(&request)?;
        Ok(Response::new(pb::CreateUserResponse {}))
    }

    async fn change_password(
        &self,
        request: Request<pb::ChangePasswordRequest>,
    ) -> Result<Response<pb::ChangePasswordResponse>, Status> {
        require_session(&request)?;
        Ok(Response::new(pb::ChangePasswordResponse {}))
    }

    async fn sql_exec(
        &self,
        request: Request<pb::SqlExecRequest>,
    ) -> Result<Response<pb::SqlExecResponse>, Status> {
        require_session(&request)?;
        let core = self.core.lock();
        let header = core.txs.last().map(|record| pb::TxHeader::from(&record.header));
        Ok(Response::new(pb::SqlExecResponse {
            txs: vec![pb::CommittedSqlTx {
                header,
                updated_rows: 1,
            }],
        }))
    }

    async fn sql_query(
        &self,
        request: Request<pb::SqlQueryRequest>,
    ) -> Result<Response<pb::SqlQueryResponse>, Status> {
        require_session(&request)?;
        let req = request.into_inner();
        Ok(Response::new(pb::SqlQueryResponse {
            columns: vec![pb::Column {
                name: "params".to_string(),
                r#type: "INTEGER".to_string(),
            }],
            rows: vec![pb::Row {
                values: vec![pb::SqlValue {
                    value: Some(pb::sql_value::Value::N(req.params.len() as i64)),
                }],
            }],
        }))
    }
}

fn reference_entry(key: &[u8], referenced_key: &[u8], at_tx: u64) -> StoredEntry {
    StoredEntry {
        kind: StoredKind::Reference {
            key: key.to_vec(),
            target: referenced_key.to_vec(),
            at_tx,
        },
        encoded_key: wrap_with_prefix(SET_KEY_PREFIX, key),
        encoded_value: wrap_reference_value_at(referenced_key, at_tx),
        metadata: None,
    }
}

fn zadd_entry(set: &[u8], score: f64, key: &[u8], at_tx: u64) -> StoredEntry {
    let encoded_member = wrap_with_prefix(SET_KEY_PREFIX, key);
    StoredEntry {
        kind: StoredKind::SortedSet,
        encoded_key: encode_zadd_key(set, score, &encoded_member, at_tx),
        encoded_value: Vec::new(),
        metadata: None,
    }
}

/// Binds an ephemeral port and serves the ledger on it.
pub async fn start_ledger(ledger: TestLedger) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let incoming = TcpListenerStream::new(listener);
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(LedgerServer::new(ledger))
            .serve_with_incoming(incoming)
            .await
            .expect("server run");
    });
    (addr, handle)
}
