// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! The composite dual-proof check linking the locally trusted transaction to
//! a newer one returned by the server.

use crate::schema::DualProof;
use veridb_verifier::{
    leaf_digest, verify_consistency, verify_inclusion_at, verify_last_inclusion,
    verify_linear_proof, Hash32,
};

/// Verifies a dual proof between `(source_tx_id, source_alh)` and
/// `(target_tx_id, target_alh)`.
///
/// On success the caller may trust `(target_tx_id, target_alh)` as its new
/// state. Any failing sub-check returns `false`; the caller maps that to a
/// verification error and leaves its state untouched.
#[must_use]
pub fn verify_dual_proof(
    proof: &DualProof,
    source_tx_id: u64,
    target_tx_id: u64,
    source_alh: &Hash32,
    target_alh: &Hash32,
) -> bool {
    let source = &proof.source_tx_header;
    let target = &proof.target_tx_header;

    if source.id != source_tx_id || target.id != target_tx_id {
        return false;
    }
    if source_tx_id == 0 || source_tx_id > target_tx_id {
        return false;
    }
    if &source.alh() != source_alh || &target.alh() != target_alh {
        return false;
    }

    if source_tx_id < target.bl_tx_id
        && !verify_inclusion_at(
            source_tx_id,
            target.bl_tx_id,
            &proof.inclusion_proof,
            &leaf_digest(source_alh),
            &target.bl_root,
        )
    {
        return false;
    }

    if source.bl_tx_id > 0
        && !verify_consistency(
            source.bl_tx_id,
            target.bl_tx_id,
            &proof.consistency_proof,
            &source.bl_root,
            &target.bl_root,
        )
    {
        return false;
    }

    if target.bl_tx_id > 0
        && !verify_last_inclusion(
            target.bl_tx_id,
            &proof.last_inclusion_proof,
            &leaf_digest(&proof.target_bl_tx_alh),
            &target.bl_root,
        )
    {
        return false;
    }

    let (linear_source_id, linear_source_alh) = if source_tx_id < target.bl_tx_id {
        (target.bl_tx_id, &proof.target_bl_tx_alh)
    } else {
        (source_tx_id, source_alh)
    };

    if proof.linear_proof.source_tx_id != linear_source_id
        || proof.linear_proof.target_tx_id != target_tx_id
    {
        return false;
    }

    verify_linear_proof(
        linear_source_id,
        target_tx_id,
        &proof.linear_proof.terms,
        linear_source_alh,
        target_alh,
    )
}
