//! Runtime message-type resolution
//!
//! Turns a stream identifier into a reflective protobuf message by walking
//! the store: stream -> association -> package descriptor -> message
//! descriptor. Nothing is cached; every call re-reads the current store, so a
//! schema overwrite is picked up by the very next packet.

use crate::error::{DecoderError, DecoderResult};
use crate::store::SchemaStore;
use crate::types::StreamId;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, ReflectMessage};
use std::path::Path;
use std::sync::Arc;

/// A validated descriptor set holding exactly one file
#[derive(Debug, Clone)]
pub struct ParsedDescriptor {
    /// Declared file name minus its extension
    pub package: String,
    pub pool: DescriptorPool,
}

/// Parse and validate raw descriptor-set bytes
///
/// The set must contain exactly one file descriptor so that the package name
/// maps to a single file unambiguously.
pub fn parse_descriptor(bytes: &[u8]) -> DecoderResult<ParsedDescriptor> {
    let set = prost_types::FileDescriptorSet::decode(bytes)
        .map_err(|e| DecoderError::MalformedDescriptor(e.to_string()))?;

    if set.file.len() != 1 {
        return Err(DecoderError::MalformedDescriptor(format!(
            "expected exactly one file descriptor in the set, got {}",
            set.file.len()
        )));
    }

    let file_name = set.file[0].name().to_string();
    let package = package_name_from_file(&file_name).ok_or_else(|| {
        DecoderError::MalformedDescriptor("file descriptor has no name".to_string())
    })?;

    let pool = DescriptorPool::from_file_descriptor_set(set)
        .map_err(|e| DecoderError::MalformedDescriptor(e.to_string()))?;

    Ok(ParsedDescriptor { package, pool })
}

/// `dir/example.proto` -> `dir/example`
fn package_name_from_file(file_name: &str) -> Option<String> {
    if file_name.is_empty() {
        return None;
    }
    let stripped = Path::new(file_name).with_extension("");
    let package = stripped.to_string_lossy().into_owned();
    (!package.is_empty()).then_some(package)
}

/// A short-lived reflective message bound to one message descriptor
#[derive(Debug, Clone)]
pub struct DynamicInstance {
    message: DynamicMessage,
}

impl DynamicInstance {
    pub fn new(descriptor: MessageDescriptor) -> Self {
        Self {
            message: DynamicMessage::new(descriptor),
        }
    }

    pub fn descriptor(&self) -> MessageDescriptor {
        self.message.descriptor()
    }

    pub fn full_name(&self) -> String {
        self.message.descriptor().full_name().to_string()
    }

    /// Replace the contents with the protobuf binary in `bytes`
    pub fn decode_binary(&mut self, bytes: &[u8]) -> DecoderResult<()> {
        self.message.clear();
        self.message.merge(bytes)?;
        Ok(())
    }

    pub fn encode_binary(&self) -> Vec<u8> {
        self.message.encode_to_vec()
    }

    /// Replace the contents with the canonical protobuf JSON in `json`
    pub fn decode_json(&mut self, json: &str) -> DecoderResult<()> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        let message = DynamicMessage::deserialize(self.descriptor(), &mut deserializer)?;
        deserializer.end()?;
        self.message = message;
        Ok(())
    }

    /// Canonical protobuf JSON of the current contents
    pub fn encode_json(&self) -> DecoderResult<Vec<u8>> {
        serde_json::to_vec(&self.message).map_err(|e| DecoderError::Encode(e.to_string()))
    }
}

/// Builds [`DynamicInstance`]s from the current store contents
#[derive(Debug, Clone)]
pub struct MessageResolver {
    store: Arc<SchemaStore>,
}

impl MessageResolver {
    pub fn new(store: Arc<SchemaStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    /// Resolve `stream` to a fresh message instance
    pub fn build_instance(&self, stream: StreamId) -> DecoderResult<DynamicInstance> {
        let association = self.store.resolve(stream)?;
        let schema = self.store.lookup_schema(&association.package)?;
        instance_from_descriptor(
            &association.package,
            &schema.descriptor,
            &association.message,
        )
    }
}

/// Build an instance of `message` from the raw descriptor set of `package`
pub fn instance_from_descriptor(
    package: &str,
    descriptor: &[u8],
    message: &str,
) -> DecoderResult<DynamicInstance> {
    let parsed = parse_descriptor(descriptor)?;
    let descriptor = parsed
        .pool
        .get_message_by_name(message)
        .ok_or_else(|| DecoderError::MessageNotFound {
            package: package.to_string(),
            message: message.to_string(),
        })?;
    Ok(DynamicInstance::new(descriptor))
}
