// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures while rebuilding canonical digests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("metadata is not supported by header version 0")]
    MetadataUnsupported,

    #[error("unsupported header version {0}")]
    UnsupportedVersion(u16),
}

/// Failures while decoding the canonical metadata byte form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("unknown metadata attribute code {0:#04x}")]
    UnknownAttribute(u8),

    #[error("truncated metadata attribute")]
    Truncated,
}

/// Failures while converting wire messages into domain values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("digest field must be 32 bytes")]
    MalformedDigest,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` out of range")]
    OutOfRange(&'static str),
}

/// Failures while checking a server state signature.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateSignatureError {
    #[error("state carries no signature")]
    MissingSignature,

    #[error("malformed signature encoding")]
    MalformedSignature,

    #[error("state signature verification failed")]
    SignatureVerification,
}
