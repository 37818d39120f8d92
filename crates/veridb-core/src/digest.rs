// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Canonical entry digests for both transaction-header versions.

use crate::codec::{
    wrap_reference_value_at, wrap_with_prefix, PLAIN_VALUE_PREFIX, SET_KEY_PREFIX,
};
use crate::error::DigestError;
use crate::metadata::KvMetadata;
use crate::schema::Entry;
use veridb_verifier::{sha256, Hash32};

/// Digest of an encoded entry given the hash of its encoded value.
///
/// v0 hashes `encoded_key || value_hash` and predates metadata; v1 length-
/// prefixes the serialized metadata and the key.
pub fn entry_spec_digest(
    version: u16,
    metadata: Option<&KvMetadata>,
    encoded_key: &[u8],
    value_hash: &Hash32,
) -> Result<Hash32, DigestError> {
    match version {
        0 => {
            if metadata.is_some() {
                return Err(DigestError::MetadataUnsupported);
            }
            let mut buf = Vec::with_capacity(encoded_key.len() + 32);
            buf.extend_from_slice(encoded_key);
            buf.extend_from_slice(value_hash);
            Ok(sha256(&buf))
        }
        1 => {
            let md_bytes = metadata.map(KvMetadata::serialize).unwrap_or_default();
            let mut buf = Vec::with_capacity(2 + md_bytes.len() + 2 + encoded_key.len() + 32);
            buf.extend_from_slice(&(md_bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(&md_bytes);
            buf.extend_from_slice(&(encoded_key.len() as u16).to_be_bytes());
            buf.extend_from_slice(encoded_key);
            buf.extend_from_slice(value_hash);
            Ok(sha256(&buf))
        }
        v => Err(DigestError::UnsupportedVersion(v)),
    }
}

/// Digest of a resolved entry as stored by the server.
///
/// A plain entry digests its own key and value; an entry resolved through a
/// reference digests the reference's key, the reference-wrapped target key,
/// and the reference's metadata.
pub fn entry_digest(entry: &Entry, version: u16) -> Result<Hash32, DigestError> {
    let (encoded_key, encoded_value, metadata) = match &entry.referenced_by {
        None => (
            wrap_with_prefix(SET_KEY_PREFIX, &entry.key),
            wrap_with_prefix(PLAIN_VALUE_PREFIX, &entry.value),
            entry.metadata.as_ref(),
        ),
        Some(reference) => (
            wrap_with_prefix(SET_KEY_PREFIX, &reference.key),
            wrap_reference_value_at(&entry.key, reference.at_tx),
            reference.metadata.as_ref(),
        ),
    };
    entry_spec_digest(version, metadata, &encoded_key, &sha256(&encoded_value))
}
