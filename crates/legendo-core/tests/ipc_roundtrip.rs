use anyhow::Result;
use legendo_core::ipc::{
    serve_connection, IpcEnvelope, IpcHandler, IpcRequest, IpcResponse, RequestEnvelope,
};
use legendo_core::ipc_client::IpcClient;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use zeroize::Zeroizing;

struct EchoHandler;

#[async_trait::async_trait]
impl IpcHandler for EchoHandler {
    async fn handle(&self, request: IpcRequest) -> Result<IpcResponse> {
        match request {
            IpcRequest::Ping => Ok(IpcResponse::Pong),
            IpcRequest::Store { payload } => Ok(IpcResponse::Payload {
                id: "echo".into(),
                payload,
            }),
            IpcRequest::Retrieve { id } => Ok(IpcResponse::NotFound { id }),
            _ => Err(anyhow::anyhow!("unsupported request")),
        }
    }
}

const SECRET: [u8; 32] = [42u8; 32];

fn spawn_server(stream: tokio::io::DuplexStream) -> tokio::task::JoinHandle<Result<()>> {
    let secret = Arc::new(Zeroizing::new(SECRET.to_vec()));
    tokio::spawn(serve_connection(stream, secret, Arc::new(EchoHandler)))
}

#[tokio::test]
async fn client_and_server_exchange_requests() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let server = spawn_server(server_io);

    let mut client = IpcClient::handshake(client_io, &SECRET).await.unwrap();
    assert_eq!(client.send(IpcRequest::Ping).await.unwrap(), IpcResponse::Pong);
    let resp = client
        .send(IpcRequest::Store {
            payload: json!({"title": "doc"}),
        })
        .await
        .unwrap();
    assert_eq!(
        resp,
        IpcResponse::Payload {
            id: "echo".into(),
            payload: json!({"title": "doc"})
        }
    );

    // handler errors are reported but keep the connection open
    let err = client.send(IpcRequest::Sweep).await.unwrap_err();
    assert!(err.to_string().contains("unsupported request"));
    assert_eq!(client.send(IpcRequest::Ping).await.unwrap(), IpcResponse::Pong);

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn float_payloads_authenticate_and_survive_exactly() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let server = spawn_server(server_io);
    let mut client = IpcClient::handshake(client_io, &SECRET).await.unwrap();

    let amounts = [
        -2.2108631172437083e-12,
        0.1 + 0.2,
        1e-300,
        123456789.12345679,
        f64::MAX,
        f64::MIN_POSITIVE,
    ];
    for amount in amounts {
        let payload = json!({"amount": amount, "nested": [amount, {"x": amount}]});
        let resp = client
            .send(IpcRequest::Store {
                payload: payload.clone(),
            })
            .await
            .unwrap();
        match resp {
            IpcResponse::Payload { payload: echoed, .. } => {
                assert_eq!(echoed["amount"].as_f64().unwrap().to_bits(), amount.to_bits());
                assert_eq!(echoed, payload);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn wrong_secret_is_rejected() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let server = spawn_server(server_io);

    let mut client = IpcClient::handshake(client_io, &[0u8; 32]).await.unwrap();
    let err = client.send(IpcRequest::Ping).await.unwrap_err();
    assert!(err.to_string().contains("authentication failed"));
    assert!(server.await.unwrap().is_err());
}

async fn read_envelope<R>(reader: &mut BufReader<R>) -> IpcEnvelope
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    serde_json::from_str(line.trim_end()).unwrap()
}

#[tokio::test]
async fn replayed_sequence_number_closes_connection() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let server = spawn_server(server_io);
    let (read_half, mut writer) = tokio::io::split(client_io);
    let mut reader = BufReader::new(read_half);

    let nonce = match read_envelope(&mut reader).await {
        IpcEnvelope::Greeting {
            connection_nonce, ..
        } => connection_nonce,
        other => panic!("unexpected {other:?}"),
    };

    let request = IpcEnvelope::Request(
        RequestEnvelope::signed(&SECRET, &nonce, 1, &IpcRequest::Ping).unwrap(),
    );
    let mut line = serde_json::to_vec(&request).unwrap();
    line.push(b'\n');

    writer.write_all(&line).await.unwrap();
    assert!(matches!(
        read_envelope(&mut reader).await,
        IpcEnvelope::Response(_)
    ));

    writer.write_all(&line).await.unwrap();
    match read_envelope(&mut reader).await {
        IpcEnvelope::Error { message } => assert_eq!(message, "replay detected"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(server.await.unwrap().is_err());
}

#[tokio::test]
async fn request_signed_for_another_connection_is_rejected() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let server = spawn_server(server_io);
    let (read_half, mut writer) = tokio::io::split(client_io);
    let mut reader = BufReader::new(read_half);
    let _greeting = read_envelope(&mut reader).await;

    let request = IpcEnvelope::Request(
        RequestEnvelope::signed(&SECRET, "some-other-connection", 1, &IpcRequest::Ping).unwrap(),
    );
    let mut line = serde_json::to_vec(&request).unwrap();
    line.push(b'\n');
    writer.write_all(&line).await.unwrap();

    assert!(matches!(
        read_envelope(&mut reader).await,
        IpcEnvelope::Error { .. }
    ));
    assert!(server.await.unwrap().is_err());
}
