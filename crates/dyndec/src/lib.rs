//! # dyndec
//!
//! Dynamic protobuf decoder and control dispatcher for telemetry agents.
//!
//! The agent emits schema-less binary packets over UDP. Each packet starts
//! with a 16-byte stream identifier; the message type for a stream is bound at
//! runtime through the control-plane API, so new schemas can be rolled out
//! without restarting or recompiling the decoder.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           dyndec                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Control-plane API (HTTP, JSON)                               │
//! │  ├── POST   /schema    register proto package                 │
//! │  ├── POST   /stream    bind stream -> (package, message)      │
//! │  ├── DELETE /stream    unbind stream                          │
//! │  └── POST   /control   JSON -> protobuf -> agent (optional)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Schema store (package -> descriptor, stream -> message)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Data listener (UDP)       │  Control dispatch (TCP)          │
//! │  [stream id][protobuf]     │  [u16 LE len][stream id][proto]  │
//! │        -> JSON sink        │                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dyndec::{DecoderConfig, PacketSink, StreamId, Supervisor};
//! use std::sync::Arc;
//!
//! let supervisor = Supervisor::bind(DecoderConfig::default()).await?;
//! let sink: Arc<dyn PacketSink> = Arc::new(|stream: StreamId, json: Vec<u8>| {
//!     println!("{}: {}", stream, String::from_utf8_lossy(&json));
//! });
//! supervisor.run(sink).await?;
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod listener;
pub mod loader;
pub mod metrics;
pub mod resolver;
pub mod server;
pub mod store;
pub mod supervisor;
pub mod types;

// Re-exports for convenience
pub use client::ControlPlaneClient;
pub use config::{ApiConfig, DataConfig, DecoderConfig, DispatchConfig};
pub use dispatch::{encode_frame, DispatchClient};
pub use error::{error_codes, DecoderError, DecoderResult, ErrorKind};
pub use fingerprint::SchemaFingerprint;
pub use listener::{decode_packet, DataListener, PacketSink};
pub use loader::{load_plan_from_files, unload_plan_from_files, LoadPlan, PackageLoad, UnloadPlan};
pub use metrics::{DecoderMetrics, DropReason};
pub use resolver::{
    instance_from_descriptor, parse_descriptor, DynamicInstance, MessageResolver, ParsedDescriptor,
};
pub use server::{router, ControlPlaneServer, ServerState};
pub use store::SchemaStore;
pub use supervisor::Supervisor;
pub use types::{
    AssociateOutcome, DisassociateOutcome, RegisteredSchema, StreamAssociation, StreamId,
    UpsertOutcome, STREAM_ID_LEN,
};
