// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

#![no_main]

use libfuzzer_sys::fuzz_target;
use veridb_core::metadata::KvMetadata;

fuzz_target!(|data: &[u8]| {
    if let Ok(metadata) = KvMetadata::deserialize(data) {
        let canonical = metadata.serialize();
        assert_eq!(canonical.len(), metadata.serialized_len());
        let reparsed = KvMetadata::deserialize(&canonical).expect("canonical form must parse");
        assert_eq!(reparsed, metadata);
    }
});
