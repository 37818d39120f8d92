// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Domain entities mirroring the wire messages, with canonical hashing for
//! transaction headers and local inclusion proofs over a transaction's
//! entry tree.

use crate::codec::{put_u16_be, put_u32_be, put_u64_be};
use crate::error::{ConversionError, DigestError};
use crate::metadata::KvMetadata;
use veridb_protocol::pb;
use veridb_verifier::{leaf_digest, node_hash, sha256, Hash32, EMPTY_DIGEST};

/// Authenticated summary of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHeader {
    pub version: u16,
    pub id: u64,
    pub prev_alh: Hash32,
    pub ts: i64,
    pub nentries: i32,
    pub eh: Hash32,
    pub bl_tx_id: u64,
    pub bl_root: Hash32,
}

impl TxHeader {
    /// Version-dependent inner hash.
    ///
    /// Both layouts start with the timestamp and the header version; v1
    /// reserves a zero u16 for a future transaction-metadata length and
    /// widens the entry count to u32.
    #[must_use]
    pub fn inner_hash(&self) -> Hash32 {
        match self.version {
            0 => {
                let mut buf = [0u8; 8 + 2 + 2 + 32 + 8 + 32];
                put_u64_be(&mut buf, 0, self.ts as u64);
                put_u16_be(&mut buf, 8, self.version);
                put_u16_be(&mut buf, 10, self.nentries as u16);
                buf[12..44].copy_from_slice(&self.eh);
                put_u64_be(&mut buf, 44, self.bl_tx_id);
                buf[52..84].copy_from_slice(&self.bl_root);
                sha256(&buf)
            }
            _ => {
                let mut buf = [0u8; 8 + 2 + 2 + 4 + 32 + 8 + 32];
                put_u64_be(&mut buf, 0, self.ts as u64);
                put_u16_be(&mut buf, 8, self.version);
                put_u16_be(&mut buf, 10, 0);
                put_u32_be(&mut buf, 12, self.nentries as u32);
                buf[16..48].copy_from_slice(&self.eh);
                put_u64_be(&mut buf, 48, self.bl_tx_id);
                buf[56..88].copy_from_slice(&self.bl_root);
                sha256(&buf)
            }
        }
    }

    /// Accumulated linear hash: `sha256(u64_be(id) || prev_alh || inner)`.
    #[must_use]
    pub fn alh(&self) -> Hash32 {
        let mut buf = [0u8; 8 + 32 + 32];
        put_u64_be(&mut buf, 0, self.id);
        buf[8..40].copy_from_slice(&self.prev_alh);
        buf[40..72].copy_from_slice(&self.inner_hash());
        sha256(&buf)
    }
}

/// One entry of a fetched transaction: the stored (encoded) key plus the
/// hash of the stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEntry {
    pub key: Vec<u8>,
    pub metadata: Option<KvMetadata>,
    pub v_len: i32,
    pub h_value: Hash32,
}

impl TxEntry {
    pub fn digest(&self, version: u16) -> Result<Hash32, DigestError> {
        crate::digest::entry_spec_digest(version, self.metadata.as_ref(), &self.key, &self.h_value)
    }
}

/// A fetched transaction: header plus entry summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub header: TxHeader,
    pub entries: Vec<TxEntry>,
}

impl Tx {
    fn entry_leaves(&self) -> Result<Vec<Hash32>, DigestError> {
        self.entries
            .iter()
            .map(|e| e.digest(self.header.version).map(|d| leaf_digest(&d)))
            .collect()
    }

    /// Builds the inclusion proof for the entry stored under `encoded_key`
    /// from the transaction's own entry tree. Returns `None` when no entry
    /// carries that key.
    pub fn inclusion_proof(&self, encoded_key: &[u8]) -> Result<Option<InclusionProof>, DigestError> {
        let Some(index) = self.entries.iter().position(|e| e.key == encoded_key) else {
            return Ok(None);
        };
        let leaves = self.entry_leaves()?;
        Ok(Some(InclusionProof {
            leaf: index as i32,
            width: leaves.len() as i32,
            terms: entry_tree_path(&leaves, index),
        }))
    }
}

/// Root of a transaction entry tree: adjacent pairs hashed upward, an odd
/// tail node carried unchanged.
#[must_use]
pub fn entry_tree_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return EMPTY_DIGEST;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = pair_up(&level);
    }
    level[0]
}

fn pair_up(level: &[Hash32]) -> Vec<Hash32> {
    level
        .chunks(2)
        .map(|pair| {
            if pair.len() == 2 {
                node_hash(&pair[0], &pair[1])
            } else {
                pair[0]
            }
        })
        .collect()
}

fn entry_tree_path(leaves: &[Hash32], index: usize) -> Vec<Hash32> {
    let mut terms = Vec::new();
    let mut level = leaves.to_vec();
    let mut i = index;
    while level.len() > 1 {
        if i % 2 == 1 {
            terms.push(level[i - 1]);
        } else if i + 1 < level.len() {
            terms.push(level[i + 1]);
        }
        level = pair_up(&level);
        i /= 2;
    }
    terms
}

/// A key-value entry as resolved by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub tx: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub metadata: Option<KvMetadata>,
    pub referenced_by: Option<Reference>,
    pub revision: u64,
}

impl Entry {
    pub fn digest_for(&self, version: u16) -> Result<Hash32, DigestError> {
        crate::digest::entry_digest(self, version)
    }
}

/// A reference entry pointing at another key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub tx: u64,
    pub key: Vec<u8>,
    pub at_tx: u64,
    pub metadata: Option<KvMetadata>,
    pub revision: u64,
}

/// A sorted-set member together with its resolved entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ZEntry {
    pub set: Vec<u8>,
    pub key: Vec<u8>,
    pub score: f64,
    pub at_tx: u64,
    pub entry: Entry,
}

/// Merkle path locating one entry inside a transaction's entry tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub leaf: i32,
    pub width: i32,
    pub terms: Vec<Hash32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearProof {
    pub source_tx_id: u64,
    pub target_tx_id: u64,
    pub terms: Vec<Hash32>,
}

/// Composite proof linking two transactions of the same log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualProof {
    pub source_tx_header: TxHeader,
    pub target_tx_header: TxHeader,
    pub inclusion_proof: Vec<Hash32>,
    pub consistency_proof: Vec<Hash32>,
    pub target_bl_tx_alh: Hash32,
    pub last_inclusion_proof: Vec<Hash32>,
    pub linear_proof: LinearProof,
}

// Wire conversions -----------------------------------------------------------

/// Accepts either an exactly-32-byte digest or an empty field (the server
/// omits all-zero hashes).
pub fn digest32(bytes: &[u8]) -> Result<Hash32, ConversionError> {
    if bytes.is_empty() {
        return Ok([0u8; 32]);
    }
    bytes.try_into().map_err(|_| ConversionError::MalformedDigest)
}

pub fn terms32(terms: &[Vec<u8>]) -> Result<Vec<Hash32>, ConversionError> {
    terms.iter().map(|t| digest32(t)).collect()
}

impl TryFrom<&pb::TxHeader> for TxHeader {
    type Error = ConversionError;

    fn try_from(pb: &pb::TxHeader) -> Result<Self, Self::Error> {
        Ok(Self {
            version: u16::try_from(pb.version).map_err(|_| ConversionError::OutOfRange("version"))?,
            id: pb.id,
            prev_alh: digest32(&pb.prev_alh)?,
            ts: pb.ts,
            nentries: pb.nentries,
            eh: digest32(&pb.eh)?,
            bl_tx_id: pb.bl_tx_id,
            bl_root: digest32(&pb.bl_root)?,
        })
    }
}

impl From<&TxHeader> for pb::TxHeader {
    fn from(hdr: &TxHeader) -> Self {
        Self {
            version: i32::from(hdr.version),
            id: hdr.id,
            prev_alh: hdr.prev_alh.to_vec(),
            ts: hdr.ts,
            nentries: hdr.nentries,
            eh: hdr.eh.to_vec(),
            bl_tx_id: hdr.bl_tx_id,
            bl_root: hdr.bl_root.to_vec(),
        }
    }
}

impl TryFrom<&pb::TxEntry> for TxEntry {
    type Error = ConversionError;

    fn try_from(pb: &pb::TxEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            key: pb.key.clone(),
            metadata: pb.metadata.as_ref().map(KvMetadata::from_pb),
            v_len: pb.v_len,
            h_value: digest32(&pb.h_value)?,
        })
    }
}

impl TryFrom<&pb::Tx> for Tx {
    type Error = ConversionError;

    fn try_from(pb: &pb::Tx) -> Result<Self, Self::Error> {
        let header = pb
            .header
            .as_ref()
            .ok_or(ConversionError::MissingField("header"))?;
        Ok(Self {
            header: TxHeader::try_from(header)?,
            entries: pb.entries.iter().map(TxEntry::try_from).collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<&pb::Reference> for Reference {
    type Error = ConversionError;

    fn try_from(pb: &pb::Reference) -> Result<Self, Self::Error> {
        Ok(Self {
            tx: pb.tx,
            key: pb.key.clone(),
            at_tx: pb.at_tx,
            metadata: pb.metadata.as_ref().map(KvMetadata::from_pb),
            revision: pb.revision,
        })
    }
}

impl TryFrom<&pb::Entry> for Entry {
    type Error = ConversionError;

    fn try_from(pb: &pb::Entry) -> Result<Self, Self::Error> {
        Ok(Self {
            tx: pb.tx,
            key: pb.key.clone(),
            value: pb.value.clone(),
            metadata: pb.metadata.as_ref().map(KvMetadata::from_pb),
            referenced_by: pb
                .referenced_by
                .as_ref()
                .map(Reference::try_from)
                .transpose()?,
            revision: pb.revision,
        })
    }
}

impl TryFrom<&pb::ZEntry> for ZEntry {
    type Error = ConversionError;

    fn try_from(pb: &pb::ZEntry) -> Result<Self, Self::Error> {
        let entry = pb
            .entry
            .as_ref()
            .ok_or(ConversionError::MissingField("entry"))?;
        Ok(Self {
            set: pb.set.clone(),
            key: pb.key.clone(),
            score: pb.score,
            at_tx: pb.at_tx,
            entry: Entry::try_from(entry)?,
        })
    }
}

impl TryFrom<&pb::InclusionProof> for InclusionProof {
    type Error = ConversionError;

    fn try_from(pb: &pb::InclusionProof) -> Result<Self, Self::Error> {
        Ok(Self {
            leaf: pb.leaf,
            width: pb.width,
            terms: terms32(&pb.terms)?,
        })
    }
}

impl TryFrom<&pb::LinearProof> for LinearProof {
    type Error = ConversionError;

    fn try_from(pb: &pb::LinearProof) -> Result<Self, Self::Error> {
        Ok(Self {
            source_tx_id: pb.source_tx_id,
            target_tx_id: pb.target_tx_id,
            terms: terms32(&pb.terms)?,
        })
    }
}

impl TryFrom<&pb::DualProof> for DualProof {
    type Error = ConversionError;

    fn try_from(pb: &pb::DualProof) -> Result<Self, Self::Error> {
        let source = pb
            .source_tx_header
            .as_ref()
            .ok_or(ConversionError::MissingField("source_tx_header"))?;
        let target = pb
            .target_tx_header
            .as_ref()
            .ok_or(ConversionError::MissingField("target_tx_header"))?;
        let linear = pb
            .linear_proof
            .as_ref()
            .ok_or(ConversionError::MissingField("linear_proof"))?;
        Ok(Self {
            source_tx_header: TxHeader::try_from(source)?,
            target_tx_header: TxHeader::try_from(target)?,
            inclusion_proof: terms32(&pb.inclusion_proof)?,
            consistency_proof: terms32(&pb.consistency_proof)?,
            target_bl_tx_alh: digest32(&pb.target_bl_tx_alh)?,
            last_inclusion_proof: terms32(&pb.last_inclusion_proof)?,
            linear_proof: LinearProof::try_from(linear)?,
        })
    }
}
