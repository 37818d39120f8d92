// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Big-endian codec helpers and the storage key/value wrapping scheme.

/// First byte of every plain key as stored by the server.
pub const SET_KEY_PREFIX: u8 = 0;
/// First byte of every sorted-set key as stored by the server.
pub const SORTED_SET_KEY_PREFIX: u8 = 1;
/// First byte of a plain value.
pub const PLAIN_VALUE_PREFIX: u8 = 0;
/// First byte of a reference value.
pub const REFERENCE_VALUE_PREFIX: u8 = 1;

pub fn put_u16_be(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn put_u32_be(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn put_u64_be(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

/// `prefix || data`.
#[must_use]
pub fn wrap_with_prefix(prefix: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + data.len());
    out.push(prefix);
    out.extend_from_slice(data);
    out
}

/// Reference value form: `REFERENCE_VALUE_PREFIX || u64_be(at_tx) ||
/// referenced_key`. Total length is `9 + referenced_key.len()`.
#[must_use]
pub fn wrap_reference_value_at(referenced_key: &[u8], at_tx: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + referenced_key.len());
    out.push(REFERENCE_VALUE_PREFIX);
    out.extend_from_slice(&at_tx.to_be_bytes());
    out.extend_from_slice(referenced_key);
    out
}

/// Canonical sorted-set member key:
/// `SORTED_SET_KEY_PREFIX || u64_be(|set|) || set || u64_be(bits(score)) ||
/// u64_be(|encoded_key|) || encoded_key || u64_be(at_tx)`.
#[must_use]
pub fn encode_zadd_key(set: &[u8], score: f64, encoded_key: &[u8], at_tx: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + set.len() + 8 + 8 + encoded_key.len() + 8);
    out.push(SORTED_SET_KEY_PREFIX);
    out.extend_from_slice(&(set.len() as u64).to_be_bytes());
    out.extend_from_slice(set);
    out.extend_from_slice(&score.to_bits().to_be_bytes());
    out.extend_from_slice(&(encoded_key.len() as u64).to_be_bytes());
    out.extend_from_slice(encoded_key);
    out.extend_from_slice(&at_tx.to_be_bytes());
    out
}
