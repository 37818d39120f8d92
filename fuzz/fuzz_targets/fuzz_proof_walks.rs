// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

#![no_main]

use libfuzzer_sys::fuzz_target;
use veridb_verifier::{
    verify_consistency, verify_inclusion, verify_inclusion_at, verify_last_inclusion,
    verify_linear_proof, Hash32,
};

// The walks must never panic or overflow, whatever positions and terms an
// adversarial server sends.
fuzz_target!(|data: &[u8]| {
    if data.len() < 18 {
        return;
    }
    let i = u64::from_le_bytes(data[0..8].try_into().unwrap()) % (1 << 48);
    let j = u64::from_le_bytes(data[8..16].try_into().unwrap()) % (1 << 48);
    let leaf_hint = data[16];
    let width_hint = data[17];

    let mut terms: Vec<Hash32> = Vec::new();
    let mut rest = &data[18..];
    while rest.len() >= 32 && terms.len() < 64 {
        let mut term = [0u8; 32];
        term.copy_from_slice(&rest[..32]);
        terms.push(term);
        rest = &rest[32..];
    }

    let digest = terms.first().copied().unwrap_or([7u8; 32]);
    let root = terms.last().copied().unwrap_or([9u8; 32]);

    let _ = verify_inclusion(
        leaf_hint as usize,
        width_hint as usize,
        &terms,
        &digest,
        &root,
    );
    let _ = verify_inclusion_at(i, j, &terms, &digest, &root);
    let _ = verify_last_inclusion(i, &terms, &digest, &root);
    let _ = verify_consistency(i, j, &terms, &digest, &root);
    let _ = verify_linear_proof(i, j, &terms, &digest, &root);
});
