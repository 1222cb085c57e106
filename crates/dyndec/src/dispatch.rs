//! Control dispatch client
//!
//! Writes length-prefixed control frames to the agent over one persistent TCP
//! connection:
//!
//! ```text
//! +----------------+-------------------+------------------------+
//! | len: u16 (LE)  | stream id (16 B)  | binary message payload |
//! +----------------+-------------------+------------------------+
//! ```
//!
//! The connection is opened on first use. Any write error drops it so the
//! next call reconnects; a failed call is never retried here.

use crate::config::DispatchConfig;
use crate::error::{DecoderError, DecoderResult};
use crate::loader::LoadPlan;
use crate::types::{StreamId, STREAM_ID_LEN};
use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Length prefix size on the wire
pub const FRAME_HEADER_LEN: usize = 2;

/// Largest payload a u16 length prefix can describe
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Frame `payload` with its u16 little-endian length
pub fn encode_frame(payload: &[u8]) -> DecoderResult<BytesMut> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(DecoderError::FrameTooLarge(
            payload.len(),
            MAX_FRAME_PAYLOAD,
        ));
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf)
}

/// Persistent, lazily connected TCP client towards the agent
#[derive(Debug)]
pub struct DispatchClient {
    config: DispatchConfig,
    conn: Option<TcpStream>,
}

impl DispatchClient {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config, conn: None }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Send a control message for `stream`
    pub async fn send_control(&mut self, stream: StreamId, message: &[u8]) -> DecoderResult<()> {
        let mut payload = Vec::with_capacity(STREAM_ID_LEN + message.len());
        payload.extend_from_slice(stream.as_bytes());
        payload.extend_from_slice(message);
        self.write(&payload).await
    }

    /// Encode `json` as the message `plan` binds to `stream` and send it,
    /// bypassing the control-plane API
    pub async fn forward(
        &mut self,
        plan: &LoadPlan,
        stream: StreamId,
        json: &str,
    ) -> DecoderResult<()> {
        let mut instance = plan.build_instance(stream)?;
        instance.decode_json(json)?;
        info!(stream_id = %stream, message = %instance.full_name(), "Forwarding control message");
        self.send_control(stream, &instance.encode_binary()).await
    }

    /// Write one framed payload, connecting first if needed
    pub async fn write(&mut self, payload: &[u8]) -> DecoderResult<()> {
        let frame = encode_frame(payload)?;

        if self.conn.is_none() {
            self.conn = Some(self.connect().await?);
        }

        let Some(conn) = self.conn.as_mut() else {
            return Err(DecoderError::Connection(
                "no dispatch connection".to_string(),
            ));
        };

        let result = match conn.write_all(&frame).await {
            Ok(()) => conn.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(address = %self.config.address(), error = %e, "Dispatch write failed, dropping connection");
            self.conn = None;
            return Err(DecoderError::Io(e));
        }

        debug!(bytes = frame.len(), "Control frame written");
        Ok(())
    }

    async fn connect(&self) -> DecoderResult<TcpStream> {
        let address = self.config.address();
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| DecoderError::Connection(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true).ok();

        if let Some(idle) = self.config.keep_alive() {
            let sock_ref = socket2::SockRef::from(&stream);
            let keepalive = socket2::TcpKeepalive::new().with_time(idle);
            if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
                debug!("TCP keepalive setup failed for {}: {}", address, e);
            }
        }

        info!(address = %address, "Connected to agent control socket");
        Ok(stream)
    }
}
