//! Prometheus metrics for the decoder
//!
//! # Metrics Overview
//!
//! ## Counters
//! - `dyndec_packets_received_total` - Datagrams read from the data socket
//! - `dyndec_packets_decoded_total` - Datagrams decoded and handed to the sink
//! - `dyndec_packets_dropped_total{reason}` - Datagrams discarded, by reason
//! - `dyndec_control_messages_sent_total` - Control frames written to the agent
//! - `dyndec_control_dispatch_failures_total` - Control frames that failed to send
//!
//! ## Gauges
//! - `dyndec_schemas` - Registered proto packages
//! - `dyndec_stream_associations` - Streams bound to a message type

use crate::store::SchemaStore;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

/// Why a datagram was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Shorter than a stream identifier
    TooShort,
    /// No usable schema for the stream
    Unresolved,
    /// Payload did not match the message type
    DecodeFailed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::TooShort => "too_short",
            DropReason::Unresolved => "unresolved",
            DropReason::DecodeFailed => "decode_failed",
        }
    }
}

/// Decoder metrics, one instance per process
#[derive(Clone)]
pub struct DecoderMetrics {
    registry: Registry,

    packets_received: Counter,
    packets_decoded: Counter,
    packets_dropped: CounterVec,
    control_sent: Counter,
    control_failures: Counter,

    schemas: Gauge,
    associations: Gauge,
}

impl DecoderMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered into an existing registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let packets_received = Counter::new(
            "dyndec_packets_received_total",
            "Total number of datagrams received on the data socket",
        )?;
        let packets_decoded = Counter::new(
            "dyndec_packets_decoded_total",
            "Total number of datagrams decoded to JSON",
        )?;
        let packets_dropped = CounterVec::new(
            Opts::new(
                "dyndec_packets_dropped_total",
                "Total number of datagrams discarded",
            ),
            &["reason"],
        )?;
        let control_sent = Counter::new(
            "dyndec_control_messages_sent_total",
            "Total number of control frames written to the agent",
        )?;
        let control_failures = Counter::new(
            "dyndec_control_dispatch_failures_total",
            "Total number of control frames that could not be sent",
        )?;

        let schemas = Gauge::new("dyndec_schemas", "Current number of registered packages")?;
        let associations = Gauge::new(
            "dyndec_stream_associations",
            "Current number of stream associations",
        )?;

        registry.register(Box::new(packets_received.clone()))?;
        registry.register(Box::new(packets_decoded.clone()))?;
        registry.register(Box::new(packets_dropped.clone()))?;
        registry.register(Box::new(control_sent.clone()))?;
        registry.register(Box::new(control_failures.clone()))?;
        registry.register(Box::new(schemas.clone()))?;
        registry.register(Box::new(associations.clone()))?;

        Ok(Self {
            registry,
            packets_received,
            packets_decoded,
            packets_dropped,
            control_sent,
            control_failures,
            schemas,
            associations,
        })
    }

    pub fn record_received(&self) {
        self.packets_received.inc();
    }

    pub fn record_decoded(&self) {
        self.packets_decoded.inc();
    }

    pub fn record_dropped(&self, reason: DropReason) {
        self.packets_dropped
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    /// Record the outcome of one control dispatch
    pub fn record_control(&self, success: bool) {
        if success {
            self.control_sent.inc();
        } else {
            self.control_failures.inc();
        }
    }

    /// Refresh the gauges from the store
    pub fn update_store_gauges(&self, store: &SchemaStore) {
        self.schemas.set(store.schema_count() as f64);
        self.associations.set(store.association_count() as f64);
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}
