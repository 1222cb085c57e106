//! End-to-end tests over real sockets

use dyndec::{
    ControlPlaneClient, DecoderConfig, DispatchConfig, PacketSink, StreamId, Supervisor,
};
use dyndec::{ApiConfig, DataConfig};
use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STREAM: &str = "11111111-1111-1111-1111-111111111111";

/// `example.proto`: `message Status { int32 code = 1; }`
fn example_descriptor() -> Vec<u8> {
    FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("example.proto".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Status".to_string()),
                field: vec![FieldDescriptorProto {
                    name: Some("code".to_string()),
                    number: Some(1),
                    label: Some(Label::Optional as i32),
                    r#type: Some(Type::Int32 as i32),
                    json_name: Some("code".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
    .encode_to_vec()
}

struct Harness {
    client: ControlPlaneClient,
    data_addr: SocketAddr,
    decoded: mpsc::UnboundedReceiver<(StreamId, Vec<u8>)>,
    shutdown: CancellationToken,
    handle: JoinHandle<dyndec::DecoderResult<()>>,
}

impl Harness {
    async fn start(dispatch: DispatchConfig) -> Self {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let config = DecoderConfig::default()
            .with_api(ApiConfig::default().with_host(localhost).with_port(0))
            .with_data(
                DataConfig::default()
                    .with_host(localhost)
                    .with_port(0)
                    .with_read_timeout(Duration::from_millis(100)),
            )
            .with_dispatch(dispatch)
            .with_shutdown_timeout(Duration::from_secs(5));

        let supervisor = Supervisor::bind(config).await.unwrap();
        let api_addr = supervisor.api_addr().unwrap();
        let data_addr = supervisor.data_addr().unwrap();
        let shutdown = supervisor.shutdown_token();

        let (tx, decoded) = mpsc::unbounded_channel();
        let sink: Arc<dyn PacketSink> = Arc::new(move |stream: StreamId, json: Vec<u8>| {
            let _ = tx.send((stream, json));
        });
        let handle = tokio::spawn(supervisor.run(sink));

        Self {
            client: ControlPlaneClient::new(format!("http://{}", api_addr)),
            data_addr,
            decoded,
            shutdown,
            handle,
        }
    }

    async fn send_datagram(&self, bytes: &[u8]) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(bytes, self.data_addr).await.unwrap();
    }

    async fn next_decoded(&mut self) -> (StreamId, serde_json::Value) {
        let (stream, json) = tokio::time::timeout(Duration::from_secs(5), self.decoded.recv())
            .await
            .expect("no packet decoded in time")
            .expect("sink closed");
        (stream, serde_json::from_slice(&json).unwrap())
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}

fn packet(stream: StreamId, payload: &[u8]) -> Vec<u8> {
    let mut bytes = stream.as_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

#[tokio::test]
async fn test_register_associate_decode() {
    let mut harness = Harness::start(DispatchConfig::default()).await;
    let stream: StreamId = STREAM.parse().unwrap();

    harness
        .client
        .upsert_schema(example_descriptor())
        .await
        .unwrap();
    harness
        .client
        .associate(stream, "example", "Status")
        .await
        .unwrap();

    harness.send_datagram(&packet(stream, &[0x08, 0x07])).await;

    let (decoded_stream, json) = harness.next_decoded().await;
    assert_eq!(decoded_stream, stream);
    assert_eq!(json, serde_json::json!({ "code": 7 }));

    harness.stop().await;
}

#[tokio::test]
async fn test_bad_packets_do_not_stop_listener() {
    let mut harness = Harness::start(DispatchConfig::default()).await;
    let stream: StreamId = STREAM.parse().unwrap();
    harness
        .client
        .upsert_schema(example_descriptor())
        .await
        .unwrap();
    harness
        .client
        .associate(stream, "example", "Status")
        .await
        .unwrap();

    // too short to carry a stream id
    harness.send_datagram(&[0u8; 10]).await;
    // well-formed but nobody bound this stream
    let unknown = StreamId::from_slice(&[0x33; 16]).unwrap();
    harness.send_datagram(&packet(unknown, &[0x08, 0x07])).await;
    // bound stream, payload not a Status
    harness.send_datagram(&packet(stream, &[0x08])).await;

    harness.send_datagram(&packet(stream, &[0x08, 0x2a])).await;
    let (decoded_stream, json) = harness.next_decoded().await;
    assert_eq!(decoded_stream, stream);
    assert_eq!(json, serde_json::json!({ "code": 42 }));
    assert!(harness.decoded.try_recv().is_err());

    harness.stop().await;
}

#[tokio::test]
async fn test_disassociate_stops_decoding() {
    let mut harness = Harness::start(DispatchConfig::default()).await;
    let stream: StreamId = STREAM.parse().unwrap();
    harness
        .client
        .upsert_schema(example_descriptor())
        .await
        .unwrap();
    harness
        .client
        .associate(stream, "example", "Status")
        .await
        .unwrap();
    harness.client.disassociate(stream).await.unwrap();
    // disassociating twice is still accepted
    harness.client.disassociate(stream).await.unwrap();

    harness.send_datagram(&packet(stream, &[0x08, 0x07])).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.decoded.try_recv().is_err());

    harness.stop().await;
}

#[tokio::test]
async fn test_control_dispatch_frame() {
    let agent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let agent_port = agent.local_addr().unwrap().port();
    let harness = Harness::start(DispatchConfig::enabled("127.0.0.1", agent_port)).await;
    let stream: StreamId = STREAM.parse().unwrap();

    harness
        .client
        .upsert_schema(example_descriptor())
        .await
        .unwrap();
    harness
        .client
        .associate(stream, "example", "Status")
        .await
        .unwrap();
    harness
        .client
        .send_control(stream, r#"{"code": 7}"#)
        .await
        .unwrap();

    let (mut socket, _) = agent.accept().await.unwrap();
    let mut len = [0u8; 2];
    socket.read_exact(&mut len).await.unwrap();
    let n = u16::from_le_bytes(len) as usize;
    assert_eq!(n, 16 + 2);

    let mut payload = vec![0u8; n];
    socket.read_exact(&mut payload).await.unwrap();
    assert_eq!(&payload[..16], stream.as_bytes());
    assert_eq!(&payload[16..], &[0x08, 0x07]);

    harness.stop().await;
}
