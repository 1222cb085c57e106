//! Core types for the decoder

use crate::error::{DecoderError, DecoderResult};
use crate::fingerprint::SchemaFingerprint;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use uuid::Uuid;

/// Length of the raw stream identifier on the wire
pub const STREAM_ID_LEN: usize = 16;

/// 128-bit identifier of one logical telemetry/control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Parse the raw 16-byte form as produced by the agent
    pub fn from_slice(bytes: &[u8]) -> DecoderResult<Self> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|e| DecoderError::InvalidInput(format!("invalid stream id bytes: {}", e)))
    }

    /// Decode the URL-safe base64 form used in `DELETE /stream?stream_uuid=`
    pub fn from_url_safe(encoded: &str) -> DecoderResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| DecoderError::InvalidInput(format!("invalid stream_uuid: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// URL-safe base64 (no padding) of the raw bytes
    pub fn to_url_safe(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; STREAM_ID_LEN] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl FromStr for StreamId {
    type Err = DecoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DecoderError::InvalidInput(format!("invalid stream id '{}': {}", s, e)))
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A registered descriptor set, keyed by package name in the store
#[derive(Debug, Clone)]
pub struct RegisteredSchema {
    pub package: String,
    pub descriptor: Vec<u8>,
    pub fingerprint: SchemaFingerprint,
}

impl RegisteredSchema {
    pub fn new(package: impl Into<String>, descriptor: Vec<u8>) -> Self {
        let fingerprint = SchemaFingerprint::compute(&descriptor);
        Self {
            package: package.into(),
            descriptor,
            fingerprint,
        }
    }
}

/// Binding of a stream to a (package, message) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAssociation {
    pub package: String,
    /// Fully qualified message name inside the package's descriptor
    pub message: String,
}

impl StreamAssociation {
    pub fn new(package: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            message: message.into(),
        }
    }
}

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First registration for this package
    Inserted,
    /// Existing schema replaced by different bytes
    Replaced,
    /// Same fingerprint as the current schema, nothing changed
    Skipped,
}

impl UpsertOutcome {
    pub fn applied(&self) -> bool {
        !matches!(self, UpsertOutcome::Skipped)
    }
}

/// Outcome of an associate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociateOutcome {
    Created,
    /// The identical pair was already bound
    AlreadyAssociated,
    /// The stream is bound to something else; nothing changed
    Conflict(StreamAssociation),
}

/// Outcome of a disassociate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisassociateOutcome {
    Removed(StreamAssociation),
    NotFound,
}

// ============================================================================
// Control-plane request bodies
// ============================================================================

/// Body of `POST /schema`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSchemaRequest {
    #[serde(
        rename = "ProtoDescriptor",
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub proto_descriptor: Vec<u8>,
}

/// Body of `POST /stream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociateStreamRequest {
    #[serde(rename = "StreamUUID")]
    pub stream_uuid: StreamId,
    #[serde(rename = "ProtoPackage")]
    pub proto_package: String,
    #[serde(rename = "ProtoMessage")]
    pub proto_message: String,
}

/// Body of `POST /control`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendControlRequest {
    #[serde(rename = "StreamUUID")]
    pub stream_uuid: StreamId,
    /// JSON text of the target message
    #[serde(rename = "Payload")]
    pub payload: String,
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn test_stream_id_string_and_raw_forms_agree() {
        let id: StreamId = ID.parse().unwrap();
        assert_eq!(id.to_string(), ID);
        assert_eq!(id.as_bytes(), &[0x11u8; 16]);
        assert_eq!(StreamId::from_slice(&[0x11u8; 16]).unwrap(), id);
    }

    #[test]
    fn test_stream_id_url_safe() {
        let id = StreamId::new(Uuid::from_bytes([0xfb; 16]));
        let encoded = id.to_url_safe();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        assert_eq!(StreamId::from_url_safe(&encoded).unwrap(), id);
    }

    #[test]
    fn test_stream_id_rejects_bad_input() {
        assert!("not-a-uuid".parse::<StreamId>().is_err());
        assert!(StreamId::from_slice(&[0u8; 10]).is_err());
        assert!(StreamId::from_url_safe("%%%").is_err());
        // valid base64 but wrong length
        assert!(StreamId::from_url_safe("AAAA").is_err());
    }

    #[test]
    fn test_upsert_request_wire_format() {
        let req = UpsertSchemaRequest {
            proto_descriptor: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"ProtoDescriptor":"AQID"}"#);
        let back: UpsertSchemaRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_associate_request_wire_format() {
        let json = format!(
            r#"{{"StreamUUID":"{}","ProtoPackage":"example","ProtoMessage":"Status"}}"#,
            ID
        );
        let req: AssociateStreamRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.stream_uuid.to_string(), ID);
        assert_eq!(req.proto_package, "example");
        assert_eq!(req.proto_message, "Status");
    }

    #[test]
    fn test_upsert_outcome_applied() {
        assert!(UpsertOutcome::Inserted.applied());
        assert!(UpsertOutcome::Replaced.applied());
        assert!(!UpsertOutcome::Skipped.applied());
    }
}
