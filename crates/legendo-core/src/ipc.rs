//! Local control protocol: line-delimited JSON over a Unix socket.
//!
//! The server speaks first with a [`IpcEnvelope::Greeting`] carrying a random
//! per-connection nonce. Every request carries a strictly increasing `seq`
//! and an HMAC-SHA256 over `nonce || seq || request` keyed by the shared
//! secret, so a captured request cannot be replayed on the same or on another
//! connection. The request travels as JSON text inside the envelope and the
//! MAC covers exactly that text; it is parsed only after it verifies.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::cache::CacheStatus;
use crate::sweeper::SweepReport;

pub const IPC_PROTOCOL_VERSION: u32 = 1;
pub const SHARED_SECRET_LEN: usize = 32;
const CONNECTION_NONCE_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcEnvelope {
    Greeting {
        protocol_version: u32,
        connection_nonce: String,
    },
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub seq: u64,
    /// JSON text of an [`IpcRequest`], signed byte for byte.
    pub request: String,
    pub mac: String,
}

impl RequestEnvelope {
    pub fn signed(
        secret: &[u8],
        connection_nonce: &str,
        seq: u64,
        request: &IpcRequest,
    ) -> Result<Self> {
        let request = serde_json::to_string(request)?;
        let mac = sign_request(secret, connection_nonce, seq, &request)?;
        Ok(Self { seq, request, mac })
    }

    /// Parse the carried request. Only meaningful after [`verify_request`].
    pub fn parse_request(&self) -> Result<IpcRequest> {
        serde_json::from_str(&self.request).map_err(|e| anyhow!("malformed request: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub seq: u64,
    pub response: IpcResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", content = "data")]
pub enum IpcRequest {
    Ping,
    Store { payload: Value },
    Retrieve { id: String },
    Status,
    Sweep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", content = "data")]
pub enum IpcResponse {
    Pong,
    Stored { id: String },
    Payload { id: String, payload: Value },
    NotFound { id: String },
    Status { status: CacheStatus },
    Swept { report: SweepReport },
}

type HmacSha256 = Hmac<Sha256>;

fn request_mac(
    secret: &[u8],
    connection_nonce: &str,
    seq: u64,
    request_json: &str,
) -> Result<HmacSha256> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| anyhow!("mac init: {e}"))?;
    mac.update(connection_nonce.as_bytes());
    mac.update(&seq.to_be_bytes());
    mac.update(request_json.as_bytes());
    Ok(mac)
}

pub fn sign_request(
    secret: &[u8],
    connection_nonce: &str,
    seq: u64,
    request_json: &str,
) -> Result<String> {
    let mac = request_mac(secret, connection_nonce, seq, request_json)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_request(
    secret: &[u8],
    connection_nonce: &str,
    envelope: &RequestEnvelope,
) -> Result<()> {
    let tag = hex::decode(&envelope.mac).map_err(|_| anyhow!("malformed mac"))?;
    request_mac(secret, connection_nonce, envelope.seq, &envelope.request)?
        .verify_slice(&tag)
        .map_err(|_| anyhow!("invalid mac"))
}

pub fn generate_shared_secret() -> Zeroizing<Vec<u8>> {
    let mut secret = Zeroizing::new(vec![0u8; SHARED_SECRET_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut secret[..]);
    secret
}

/// Write the base64 secret to a file that is owner-only from creation.
///
/// An existing file is replaced rather than rewritten, so it cannot keep
/// wider permissions from an earlier run.
pub fn persist_shared_secret(path: &Path, secret: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(anyhow!("remove old ipc secret {}: {e}", path.display())),
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .map_err(|e| anyhow!("create ipc secret {}: {e}", path.display()))?;
    let encoded = Zeroizing::new(general_purpose::STANDARD.encode(secret));
    file.write_all(encoded.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

pub fn load_shared_secret(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let encoded = Zeroizing::new(
        std::fs::read_to_string(path)
            .map_err(|e| anyhow!("read ipc secret {}: {e}", path.display()))?,
    );
    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| anyhow!("decode ipc secret: {e}"))?;
    Ok(Zeroizing::new(decoded))
}

#[async_trait::async_trait]
pub trait IpcHandler: Send + Sync {
    async fn handle(&self, request: IpcRequest) -> Result<IpcResponse>;
}

pub struct IpcServer {
    secret: Arc<Zeroizing<Vec<u8>>>,
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new(secret: Zeroizing<Vec<u8>>, socket_path: PathBuf) -> Self {
        Self {
            secret: Arc::new(secret),
            socket_path,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    #[cfg(unix)]
    pub async fn start(self: Arc<Self>, handler: Arc<dyn IpcHandler>) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        use tokio::net::UnixListener;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                anyhow!("remove stale socket {}: {e}", self.socket_path.display())
            })?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        debug!(path = %self.socket_path.display(), "ipc listening");

        loop {
            let (stream, _addr) = listener.accept().await?;
            let secret = self.secret.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_connection(stream, secret, handler).await {
                    warn!(error = %err, "ipc connection closed with error");
                }
            });
        }
    }

    #[cfg(not(unix))]
    pub async fn start(self: Arc<Self>, _handler: Arc<dyn IpcHandler>) -> Result<()> {
        Err(anyhow!("ipc is only available on unix via UDS transport"))
    }
}

async fn write_envelope<W>(writer: &mut W, envelope: &IpcEnvelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Drive one connection to completion. Returns an error (after telling the
/// peer) on malformed input, replayed sequence numbers, or a bad MAC.
pub async fn serve_connection<S>(
    stream: S,
    secret: Arc<Zeroizing<Vec<u8>>>,
    handler: Arc<dyn IpcHandler>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let mut nonce_bytes = [0u8; CONNECTION_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let connection_nonce = hex::encode(nonce_bytes);
    write_envelope(
        &mut writer,
        &IpcEnvelope::Greeting {
            protocol_version: IPC_PROTOCOL_VERSION,
            connection_nonce: connection_nonce.clone(),
        },
    )
    .await?;

    let mut last_seq = 0u64;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let req_env = match serde_json::from_str::<IpcEnvelope>(line.trim_end()) {
            Ok(IpcEnvelope::Request(r)) => r,
            Ok(_) | Err(_) => {
                reject(&mut writer, "expected Request envelope").await?;
                return Err(anyhow!("malformed envelope"));
            }
        };
        if req_env.seq <= last_seq {
            reject(&mut writer, "replay detected").await?;
            return Err(anyhow!("replay detected: seq {} not increasing", req_env.seq));
        }
        if verify_request(&secret, &connection_nonce, &req_env).is_err() {
            reject(&mut writer, "authentication failed").await?;
            return Err(anyhow!("invalid request mac"));
        }
        last_seq = req_env.seq;

        let request = match req_env.parse_request() {
            Ok(request) => request,
            Err(err) => {
                reject(&mut writer, "malformed request").await?;
                return Err(err);
            }
        };
        let reply = match handler.handle(request).await {
            Ok(response) => IpcEnvelope::Response(ResponseEnvelope {
                seq: req_env.seq,
                response,
            }),
            Err(err) => IpcEnvelope::Error {
                message: err.to_string(),
            },
        };
        write_envelope(&mut writer, &reply).await?;
    }
    Ok(())
}

async fn reject<W>(writer: &mut W, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_envelope(
        writer,
        &IpcEnvelope::Error {
            message: message.to_string(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_binds_nonce_seq_and_request() {
        let secret = [7u8; 32];
        let ping = r#"{"request":"Ping"}"#;
        let base = sign_request(&secret, "n1", 1, ping).unwrap();
        assert_ne!(base, sign_request(&secret, "n2", 1, ping).unwrap());
        assert_ne!(base, sign_request(&secret, "n1", 2, ping).unwrap());
        assert_ne!(base, sign_request(&secret, "n1", 1, r#"{"request":"Status"}"#).unwrap());
        assert_ne!(base, sign_request(&[8u8; 32], "n1", 1, ping).unwrap());
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let secret = [1u8; 32];
        let request = IpcRequest::Retrieve { id: "abc".into() };
        let mut env = RequestEnvelope::signed(&secret, "nonce", 3, &request).unwrap();
        verify_request(&secret, "nonce", &env).unwrap();
        assert_eq!(env.parse_request().unwrap(), request);

        env.seq = 4;
        assert!(verify_request(&secret, "nonce", &env).is_err());
        env.seq = 3;
        env.mac = "zz".into();
        assert!(verify_request(&secret, "nonce", &env).is_err());
    }

    #[test]
    fn mac_covers_request_text_as_sent() {
        let secret = [3u8; 32];
        // not what serde_json would produce for this request
        let text = r#"{ "data": {"payload": {"amount": 1.50}}, "request": "Store" }"#;
        let env = RequestEnvelope {
            seq: 1,
            request: text.to_string(),
            mac: sign_request(&secret, "n", 1, text).unwrap(),
        };
        verify_request(&secret, "n", &env).unwrap();
        assert_eq!(
            env.parse_request().unwrap(),
            IpcRequest::Store {
                payload: serde_json::json!({"amount": 1.5})
            }
        );

        let mut reformatted = env.clone();
        reformatted.request = text.replace(' ', "");
        assert!(verify_request(&secret, "n", &reformatted).is_err());
    }

    #[test]
    fn secret_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.secret");
        let secret = generate_shared_secret();
        persist_shared_secret(&path, &secret).unwrap();
        let loaded = load_shared_secret(&path).unwrap();
        assert_eq!(loaded.as_slice(), secret.as_slice());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn secret_file_replaces_world_readable_leftover() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.secret");
        std::fs::write(&path, "stale secret that is much longer than the new one").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let secret = generate_shared_secret();
        persist_shared_secret(&path, &secret).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(load_shared_secret(&path).unwrap().as_slice(), secret.as_slice());
    }

    struct NoopHandler;

    #[async_trait::async_trait]
    impl IpcHandler for NoopHandler {
        async fn handle(&self, _request: IpcRequest) -> Result<IpcResponse> {
            Ok(IpcResponse::Pong)
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unremovable_stale_socket_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("cache.ipc");
        std::fs::create_dir(&socket).unwrap();

        let server = Arc::new(IpcServer::new(generate_shared_secret(), socket));
        let err = server.start(Arc::new(NoopHandler)).await.unwrap_err();
        assert!(err.to_string().contains("remove stale socket"), "{err}");
    }

    #[test]
    fn request_wire_shape() {
        let v = serde_json::to_value(IpcRequest::Retrieve { id: "x".into() }).unwrap();
        assert_eq!(v, serde_json::json!({"request": "Retrieve", "data": {"id": "x"}}));
    }
}
