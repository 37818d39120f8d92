// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Proof verification primitives for the VeriDB transaction log.
//!
//! Everything in this crate is pure math over 32-byte SHA-256 digests: the
//! entry-tree inclusion walk, the binary-log inclusion and consistency walks,
//! the last-inclusion special case, and the linear `Alh` chain. Verifiers
//! return `bool`; callers translate failures into their own error taxonomy.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use sha2::{Digest, Sha256};

pub type Hash32 = [u8; 32];

pub const LEAF_PREFIX: u8 = 0;
pub const NODE_PREFIX: u8 = 1;

/// SHA-256 of the empty input. Reused for null/empty inputs instead of
/// hashing again.
pub const EMPTY_DIGEST: Hash32 = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9,
    0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52,
    0xb8, 0x55,
];

#[must_use]
pub fn sha256(bytes: &[u8]) -> Hash32 {
    if bytes.is_empty() {
        return EMPTY_DIGEST;
    }
    let mut h = Sha256::new();
    h.update(bytes);
    h.finalize().into()
}

/// `sha256(LEAF_PREFIX || digest)` — the leaf form of a digest inside any of
/// the Merkle structures.
#[must_use]
pub fn leaf_digest(digest: &Hash32) -> Hash32 {
    let mut buf = [0u8; 33];
    buf[0] = LEAF_PREFIX;
    buf[1..].copy_from_slice(digest);
    sha256(&buf)
}

#[must_use]
pub fn node_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut buf = [0u8; 65];
    buf[0] = NODE_PREFIX;
    buf[1..33].copy_from_slice(left);
    buf[33..65].copy_from_slice(right);
    sha256(&buf)
}

/// Verifies that `digest` sits at position `leaf` of a transaction entry
/// tree of `width` leaves whose root is `root`.
///
/// The walk consumes one term per level; once the running index meets the
/// rightmost index every remaining term hashes from the left.
#[must_use]
pub fn verify_inclusion(
    leaf: usize,
    width: usize,
    terms: &[Hash32],
    digest: &Hash32,
    root: &Hash32,
) -> bool {
    if width == 0 || leaf >= width {
        return false;
    }

    let mut h = leaf_digest(digest);
    let mut i = leaf;
    let mut r = width - 1;

    for t in terms {
        if i % 2 == 0 && i != r {
            h = node_hash(&h, t);
        } else {
            h = node_hash(t, &h);
        }
        i /= 2;
        r /= 2;
    }

    i == r && &h == root
}

/// Verifies that the pre-hashed leaf `i_leaf` is included at 1-based
/// position `i` of a binary log holding `j` leaves rooted at `j_root`.
#[must_use]
pub fn verify_inclusion_at(
    i: u64,
    j: u64,
    terms: &[Hash32],
    i_leaf: &Hash32,
    j_root: &Hash32,
) -> bool {
    if i > j || i == 0 || (i < j && terms.is_empty()) {
        return false;
    }

    let mut c = *i_leaf;
    let mut i1 = i - 1;
    let mut j1 = j - 1;

    for h in terms {
        if i1 % 2 == 0 && i1 != j1 {
            c = node_hash(&c, h);
        } else {
            c = node_hash(h, &c);
        }
        i1 >>= 1;
        j1 >>= 1;
    }

    &c == j_root
}

/// Verifies that the pre-hashed leaf `i_leaf` is the last (1-based position
/// `i`) leaf of a binary log rooted at `root`. The last leaf only ever has
/// left siblings, so every term hashes from the left.
#[must_use]
pub fn verify_last_inclusion(i: u64, terms: &[Hash32], i_leaf: &Hash32, root: &Hash32) -> bool {
    if i == 0 {
        return false;
    }

    let mut c = *i_leaf;
    for h in terms {
        c = node_hash(h, &c);
    }

    &c == root
}

/// Verifies that a binary log of `i` leaves rooted at `i_root` is a prefix
/// of one with `j` leaves rooted at `j_root`.
#[must_use]
pub fn verify_consistency(
    i: u64,
    j: u64,
    terms: &[Hash32],
    i_root: &Hash32,
    j_root: &Hash32,
) -> bool {
    if i > j || i == 0 {
        return false;
    }
    if i == j {
        return terms.is_empty() && i_root == j_root;
    }
    if terms.is_empty() {
        return false;
    }

    let mut fn_idx = i - 1;
    let mut sn_idx = j - 1;
    while fn_idx & 1 == 1 {
        fn_idx >>= 1;
        sn_idx >>= 1;
    }

    let mut ci_root = terms[0];
    let mut cj_root = terms[0];

    for h in &terms[1..] {
        if fn_idx & 1 == 1 || fn_idx == sn_idx {
            ci_root = node_hash(h, &ci_root);
            cj_root = node_hash(h, &cj_root);
            while fn_idx & 1 == 0 && fn_idx != 0 {
                fn_idx >>= 1;
                sn_idx >>= 1;
            }
        } else {
            cj_root = node_hash(&cj_root, h);
        }
        fn_idx >>= 1;
        sn_idx >>= 1;
    }

    &ci_root == i_root && &cj_root == j_root
}

/// Verifies the linear `Alh` chain between two transactions.
///
/// `terms[0]` must equal the source `Alh`; each following term is the inner
/// hash of the next transaction in the chain.
#[must_use]
pub fn verify_linear_proof(
    source_tx_id: u64,
    target_tx_id: u64,
    terms: &[Hash32],
    source_alh: &Hash32,
    target_alh: &Hash32,
) -> bool {
    if source_tx_id == 0 || source_tx_id > target_tx_id {
        return false;
    }
    if terms.is_empty() || &terms[0] != source_alh {
        return false;
    }
    if terms.len() as u64 != target_tx_id - source_tx_id + 1 {
        return false;
    }

    let mut calc = terms[0];
    for (k, term) in terms.iter().enumerate().skip(1) {
        let mut buf = [0u8; 8 + 64];
        buf[..8].copy_from_slice(&(source_tx_id + k as u64).to_be_bytes());
        buf[8..40].copy_from_slice(&calc);
        buf[40..].copy_from_slice(term);
        calc = sha256(&buf);
    }

    &calc == target_alh
}
