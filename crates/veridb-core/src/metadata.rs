// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Canonical byte form of per-entry key-value metadata.

use crate::error::MetadataError;
use veridb_protocol::pb;

const DELETED_ATTR_CODE: u8 = 0x00;
const EXPIRES_AT_ATTR_CODE: u8 = 0x01;
const NON_INDEXABLE_ATTR_CODE: u8 = 0x02;

/// Attributes attached to a key-value entry.
///
/// The serialized form is part of the version-1 digest preimage, so the
/// write order is fixed: `deleted`, `nonIndexable`, `expiresAt`. The reader
/// accepts attributes in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvMetadata {
    deleted: bool,
    non_indexable: bool,
    expires_at: Option<i64>,
}

impl KvMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    #[must_use]
    pub fn with_non_indexable(mut self, non_indexable: bool) -> Self {
        self.non_indexable = non_indexable;
        self
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn deleted(&self) -> bool {
        self.deleted
    }

    #[must_use]
    pub fn non_indexable(&self) -> bool {
        self.non_indexable
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Length of [`Self::serialize`] without materializing it.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        usize::from(self.deleted)
            + usize::from(self.non_indexable)
            + if self.expires_at.is_some() { 9 } else { 0 }
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        if self.deleted {
            out.push(DELETED_ATTR_CODE);
        }
        if self.non_indexable {
            out.push(NON_INDEXABLE_ATTR_CODE);
        }
        if let Some(expires_at) = self.expires_at {
            out.push(EXPIRES_AT_ATTR_CODE);
            out.extend_from_slice(&expires_at.to_be_bytes());
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut md = Self::default();
        let mut pos = 0;
        while pos < bytes.len() {
            match bytes[pos] {
                DELETED_ATTR_CODE => {
                    md.deleted = true;
                    pos += 1;
                }
                NON_INDEXABLE_ATTR_CODE => {
                    md.non_indexable = true;
                    pos += 1;
                }
                EXPIRES_AT_ATTR_CODE => {
                    let end = pos + 9;
                    if end > bytes.len() {
                        return Err(MetadataError::Truncated);
                    }
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&bytes[pos + 1..end]);
                    md.expires_at = Some(i64::from_be_bytes(raw));
                    pos = end;
                }
                other => return Err(MetadataError::UnknownAttribute(other)),
            }
        }
        Ok(md)
    }

    #[must_use]
    pub fn from_pb(pb: &pb::KvMetadata) -> Self {
        Self {
            deleted: pb.deleted,
            non_indexable: pb.non_indexable,
            expires_at: pb.expiration.as_ref().map(|e| e.expires_at),
        }
    }

    #[must_use]
    pub fn to_pb(&self) -> pb::KvMetadata {
        pb::KvMetadata {
            deleted: self.deleted,
            non_indexable: self.non_indexable,
            expiration: self.expires_at.map(|expires_at| pb::Expiration { expires_at }),
        }
    }
}
