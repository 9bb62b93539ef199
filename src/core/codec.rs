// Copyright (c) 2026 LibreSeed
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Canonical record codec.
//!
//! Signing bytes and wire bytes are compact JSON with field order fixed by
//! the record schema (struct declaration order, not alphabetical). Signature
//! fields are excluded by name before signing, so the signed payload has the
//! field *absent* rather than empty, and signing and verifying cannot drift
//! apart.
//!
//! Properties:
//! - numbers are unsigned decimal integers without leading zeros
//! - strings are verbatim UTF-8 (JSON-escaped where the grammar requires)
//! - nested objects and lists keep declared order
//! - no whitespace
//! - pure: identical input yields byte-identical output on every platform

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Canonical codec error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("record is not an object")]
    NotAnObject,
    #[error("size limit exceeded")]
    TooLarge,
}

/// Encode a record to canonical bytes with the named top-level fields omitted.
///
/// Passing the signature field name here produces the signing payload; passing
/// no exclusions produces the full wire form.
pub fn canonical_bytes<T: Serialize>(record: &T, exclude: &[&str]) -> Result<Vec<u8>, CodecError> {
    let mut value = serde_json::to_value(record).map_err(|_| CodecError::Serialize)?;
    if !exclude.is_empty() {
        let obj = value.as_object_mut().ok_or(CodecError::NotAnObject)?;
        for field in exclude {
            // shift_remove keeps the remaining fields in declared order.
            obj.shift_remove(*field);
        }
    }
    serde_json::to_vec(&value).map_err(|_| CodecError::Serialize)
}

/// Encode the full wire form (no exclusions).
pub fn wire_bytes<T: Serialize>(record: &T) -> Result<Vec<u8>, CodecError> {
    canonical_bytes(record, &[])
}

/// Decode a record from wire bytes with a hard size cap.
pub fn decode_limited<T: DeserializeOwned>(bytes: &[u8], max: usize) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    serde_json::from_slice(bytes).map_err(|_| CodecError::Deserialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Sample {
        protocol: String,
        name: String,
        timestamp: u64,
        signature: String,
    }

    #[test]
    fn field_order_is_declared_not_alphabetical() {
        let s = Sample {
            protocol: "libreseed/v1".into(),
            name: "pkg".into(),
            timestamp: 7,
            signature: "ed25519:00".into(),
        };
        let bytes = wire_bytes(&s).unwrap();
        assert_eq!(
            bytes,
            br#"{"protocol":"libreseed/v1","name":"pkg","timestamp":7,"signature":"ed25519:00"}"#
        );
    }

    #[test]
    fn exclusion_removes_field_entirely() {
        let s = Sample {
            protocol: "libreseed/v1".into(),
            name: "pkg".into(),
            timestamp: 7,
            signature: "ed25519:00".into(),
        };
        let bytes = canonical_bytes(&s, &["signature"]).unwrap();
        assert_eq!(bytes, br#"{"protocol":"libreseed/v1","name":"pkg","timestamp":7}"#);
    }

    #[test]
    fn canonical_is_idempotent_through_parse() {
        let s = Sample {
            protocol: "libreseed/v1".into(),
            name: "pkg".into(),
            timestamp: 7,
            signature: "ed25519:00".into(),
        };
        let first = wire_bytes(&s).unwrap();
        let parsed: Sample = decode_limited(&first, 8192).unwrap();
        let second = wire_bytes(&parsed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn decode_respects_size_cap() {
        let bytes = br#"{"protocol":"x","name":"y","timestamp":1,"signature":"s"}"#;
        assert_eq!(
            decode_limited::<Sample>(bytes, 8).unwrap_err(),
            CodecError::TooLarge
        );
    }
}
