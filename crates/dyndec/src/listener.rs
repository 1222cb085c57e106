//! Data-plane UDP listener
//!
//! Each datagram carries a raw 16-byte stream identifier followed by the
//! binary message payload. The listener resolves the current schema for the
//! stream, decodes the payload and hands the JSON text to a [`PacketSink`].
//! A bad packet is logged and dropped; only a socket error ends the loop.

use crate::config::DataConfig;
use crate::error::{DecoderError, DecoderResult};
use crate::metrics::{DecoderMetrics, DropReason};
use crate::resolver::MessageResolver;
use crate::types::{StreamId, STREAM_ID_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receiver of decoded packets
pub trait PacketSink: Send + Sync {
    fn deliver(&self, stream: StreamId, json: Vec<u8>);
}

impl<F> PacketSink for F
where
    F: Fn(StreamId, Vec<u8>) + Send + Sync,
{
    fn deliver(&self, stream: StreamId, json: Vec<u8>) {
        self(stream, json)
    }
}

/// Decode one datagram into `(stream, json)`
pub fn decode_packet(
    resolver: &MessageResolver,
    packet: &[u8],
) -> DecoderResult<(StreamId, Vec<u8>)> {
    if packet.len() < STREAM_ID_LEN {
        return Err(DecoderError::InvalidInput(format!(
            "packet too short: {} bytes",
            packet.len()
        )));
    }
    let (id, payload) = packet.split_at(STREAM_ID_LEN);
    let stream = StreamId::from_slice(id)?;

    let mut instance = resolver.build_instance(stream)?;
    instance.decode_binary(payload)?;
    let json = instance.encode_json()?;
    Ok((stream, json))
}

fn drop_reason(err: &DecoderError) -> DropReason {
    match err {
        DecoderError::InvalidInput(_) => DropReason::TooShort,
        DecoderError::Decode(_) | DecoderError::Encode(_) => DropReason::DecodeFailed,
        _ => DropReason::Unresolved,
    }
}

/// UDP receive loop
pub struct DataListener {
    socket: UdpSocket,
    config: DataConfig,
    resolver: MessageResolver,
    metrics: DecoderMetrics,
}

impl DataListener {
    pub async fn bind(
        config: DataConfig,
        resolver: MessageResolver,
        metrics: DecoderMetrics,
    ) -> DecoderResult<Self> {
        let socket = UdpSocket::bind(config.bind_addr()).await?;
        info!(address = %socket.local_addr()?, "Data listener bound");
        Ok(Self {
            socket,
            config,
            resolver,
            metrics,
        })
    }

    pub fn local_addr(&self) -> DecoderResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until `cancel` fires or the socket fails
    pub async fn run(
        self,
        cancel: CancellationToken,
        sink: Arc<dyn PacketSink>,
    ) -> DecoderResult<()> {
        let mut buf = vec![0u8; self.config.buffer_size];
        let read_timeout = self.config.read_timeout();

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Data listener stopping");
                    return Ok(());
                }
                r = tokio::time::timeout(read_timeout, self.socket.recv_from(&mut buf)) => r,
            };

            let (len, peer) = match received {
                Err(_) => continue,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    error!(error = %e, "Data socket read failed");
                    return Err(DecoderError::Io(e));
                }
            };

            self.metrics.record_received();
            match decode_packet(&self.resolver, &buf[..len]) {
                Ok((stream, json)) => {
                    self.metrics.record_decoded();
                    sink.deliver(stream, json);
                }
                Err(e) => {
                    let reason = drop_reason(&e);
                    self.metrics.record_dropped(reason);
                    match reason {
                        DropReason::TooShort => {
                            debug!(peer = %peer, bytes = len, "Dropping packet: {}", e)
                        }
                        _ => warn!(peer = %peer, bytes = len, "Dropping packet: {}", e),
                    }
                }
            }
        }
    }
}
