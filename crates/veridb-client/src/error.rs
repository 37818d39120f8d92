// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;
use veridb_core::error::{ConversionError, DigestError, MetadataError, StateSignatureError};
use veridb_protocol::{KEY_NOT_FOUND_MSG, TX_NOT_FOUND_MSG};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the client.
///
/// Verification failures are final for the operation and never advance the
/// trusted state; transport errors are surfaced as-is except for the two
/// well-known lookup failures, which are translated into typed variants.
#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found")]
    KeyNotFound,

    #[error("tx not found")]
    TxNotFound,

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("invalid operation: {reason}")]
    InvalidOperation {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("transport error: {0}")]
    Transport(tonic::Status),
}

impl Error {
    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        Self::CorruptedData(reason.into())
    }

    pub(crate) fn verification(reason: impl Into<String>) -> Self {
        Self::Verification(reason.into())
    }

    pub(crate) fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn state_io(reason: impl Into<String>, source: std::io::Error) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
            source: Some(source),
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let message = status.message();
        if message.contains(KEY_NOT_FOUND_MSG) {
            Self::KeyNotFound
        } else if message.contains(TX_NOT_FOUND_MSG) {
            Self::TxNotFound
        } else {
            Self::Transport(status)
        }
    }
}

impl From<ConversionError> for Error {
    fn from(err: ConversionError) -> Self {
        Self::CorruptedData(err.to_string())
    }
}

impl From<DigestError> for Error {
    fn from(err: DigestError) -> Self {
        match err {
            DigestError::MetadataUnsupported => Self::invalid_operation(err.to_string()),
            DigestError::UnsupportedVersion(_) => Self::CorruptedData(err.to_string()),
        }
    }
}

impl From<MetadataError> for Error {
    fn from(err: MetadataError) -> Self {
        Self::CorruptedData(err.to_string())
    }
}

impl From<StateSignatureError> for Error {
    fn from(err: StateSignatureError) -> Self {
        Self::Verification(err.to_string())
    }
}
