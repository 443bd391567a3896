use crate::ipc::{
    IpcEnvelope, IpcRequest, IpcResponse, RequestEnvelope, ResponseEnvelope,
    IPC_PROTOCOL_VERSION,
};
use anyhow::{anyhow, Result};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use zeroize::Zeroizing;

#[cfg(unix)]
use tokio::net::UnixStream;

pub struct IpcClient<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    secret: Zeroizing<Vec<u8>>,
    connection_nonce: String,
    seq: u64,
}

#[cfg(unix)]
impl IpcClient<UnixStream> {
    pub async fn connect(socket_path: &Path, secret: &[u8]) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| anyhow!("ipc connect {}: {e}", socket_path.display()))?;
        Self::handshake(stream, secret).await
    }
}

impl<S> IpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read the server greeting and check the protocol version.
    pub async fn handshake(stream: S, secret: &[u8]) -> Result<Self> {
        let (read_half, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(anyhow!("server closed before greeting"));
        }
        let connection_nonce = match serde_json::from_str::<IpcEnvelope>(line.trim_end())? {
            IpcEnvelope::Greeting {
                protocol_version,
                connection_nonce,
            } => {
                if protocol_version != IPC_PROTOCOL_VERSION {
                    return Err(anyhow!(
                        "protocol version mismatch: server {protocol_version}, client {IPC_PROTOCOL_VERSION}"
                    ));
                }
                connection_nonce
            }
            IpcEnvelope::Error { message } => return Err(anyhow!(message)),
            _ => return Err(anyhow!("expected Greeting")),
        };

        Ok(Self {
            reader,
            writer,
            secret: Zeroizing::new(secret.to_vec()),
            connection_nonce,
            seq: 0,
        })
    }

    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.seq += 1;
        let envelope = IpcEnvelope::Request(RequestEnvelope::signed(
            &self.secret,
            &self.connection_nonce,
            self.seq,
            &request,
        )?);
        let mut out = serde_json::to_vec(&envelope)?;
        out.push(b'\n');
        self.writer.write_all(&out).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(anyhow!("server closed connection"));
        }
        match serde_json::from_str::<IpcEnvelope>(line.trim_end())? {
            IpcEnvelope::Response(ResponseEnvelope { seq, response }) => {
                if seq != self.seq {
                    return Err(anyhow!("response seq {seq} does not match request {}", self.seq));
                }
                Ok(response)
            }
            IpcEnvelope::Error { message } => Err(anyhow!("request failed: {message}")),
            _ => Err(anyhow!("unexpected response")),
        }
    }
}

/// Connect, send one request, return the response.
#[cfg(unix)]
pub async fn send_request(
    socket_path: &Path,
    secret: &[u8],
    request: IpcRequest,
) -> Result<IpcResponse> {
    let mut client = IpcClient::connect(socket_path, secret).await?;
    client.send(request).await
}
