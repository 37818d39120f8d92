// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! The locally trusted state of one database: the newest transaction whose
//! `Alh` this client has verified, plus the server signature over it.

use crate::error::{ConversionError, StateSignatureError};
use crate::schema::digest32;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use veridb_protocol::pb;
use veridb_verifier::Hash32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedState {
    pub database: String,
    #[serde(rename = "txId")]
    pub tx_id: u64,
    #[serde(rename = "txHash", with = "base64_hash")]
    pub tx_hash: Hash32,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub signature: Option<Vec<u8>>,
}

impl TrustedState {
    #[must_use]
    pub fn new(database: impl Into<String>, tx_id: u64, tx_hash: Hash32) -> Self {
        Self {
            database: database.into(),
            tx_id,
            tx_hash,
            signature: None,
        }
    }

    #[must_use]
    pub fn with_signature(mut self, signature: Option<Vec<u8>>) -> Self {
        self.signature = signature.filter(|s| !s.is_empty());
        self
    }

    /// Canonical byte encoding the server signs:
    /// `u32_be(|db|) || db || u64_be(txId) || txHash`.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let db = self.database.as_bytes();
        let mut buf = Vec::with_capacity(4 + db.len() + 8 + 32);
        buf.extend_from_slice(&(db.len() as u32).to_be_bytes());
        buf.extend_from_slice(db);
        buf.extend_from_slice(&self.tx_id.to_be_bytes());
        buf.extend_from_slice(&self.tx_hash);
        buf
    }

    pub fn check_signature(&self, key: &VerifyingKey) -> Result<(), StateSignatureError> {
        let raw = self
            .signature
            .as_deref()
            .ok_or(StateSignatureError::MissingSignature)?;
        let signature =
            Signature::from_slice(raw).map_err(|_| StateSignatureError::MalformedSignature)?;
        key.verify(&self.signing_payload(), &signature)
            .map_err(|_| StateSignatureError::SignatureVerification)
    }

    pub fn from_pb(pb: &pb::DatabaseState) -> Result<Self, ConversionError> {
        Ok(Self::new(pb.db.clone(), pb.tx_id, digest32(&pb.tx_hash)?)
            .with_signature(pb.signature.as_ref().map(|s| s.signature.clone())))
    }
}

mod base64_hash {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};
    use veridb_verifier::Hash32;

    pub fn serialize<S: Serializer>(hash: &Hash32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash32, D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)?;
        raw.as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("txHash must decode to 32 bytes"))
    }
}

mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(raw) => serializer.serialize_str(&STANDARD.encode(raw)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(t.as_bytes()))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
