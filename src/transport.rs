use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quinn::{ClientConfig, Connection, Endpoint};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::protocol::{ConfigMessage, TAG_CONFIG, TAG_FRAME};

/// Upper bound on a single framed message; anything larger is treated as a
/// corrupt stream.
pub const MAX_MESSAGE_SIZE: u32 = 8 * 1024 * 1024;

const ALPN_PROTOCOL: &[u8] = b"motion-analysis/1.0";

/// Transport options for the analyzer connection.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub server_name: String,
    pub connection_timeout: Duration,
    pub keep_alive_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            connection_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(5),
        }
    }
}

/// Send half of the duplex channel to the analyzer.
///
/// Send attempts while the channel is closed return errors rather than
/// panic; the streaming controller's tick guard keeps them rare.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send_config(&self, message: &ConfigMessage) -> Result<(), TransportError>;

    async fn send_frame(&self, payload: &[u8]) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

/// Write one outbound message: `[tag][len u32 LE][payload]`.
pub async fn write_framed<W>(writer: &mut W, tag: u8, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[tag]).await?;
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one outbound message from the peer side. `Ok(None)` on clean EOF.
pub async fn read_framed<R>(reader: &mut R) -> std::io::Result<Option<(u8, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("framed message too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some((tag[0], payload)))
}

/// Write one inbound-direction result: `[len u32 LE][JSON]`.
pub async fn write_result<W>(writer: &mut W, json: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(json.len() as u32).to_le_bytes()).await?;
    writer.write_all(json).await?;
    writer.flush().await
}

/// Read one result message. `Ok(None)` on clean EOF.
pub async fn read_result<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("result message too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// QUIC duplex channel to the analyzer: one bidirectional stream carries
/// framed outbound messages and length-prefixed inbound results.
pub struct QuicAnalyzerChannel;

impl QuicAnalyzerChannel {
    /// Connect and split the channel: the sender half goes to the streaming
    /// controller, the receiver yields raw inbound JSON strings. The
    /// receiver ending is terminal for the run; no reconnect is attempted.
    pub async fn connect(
        server_address: SocketAddr,
        options: &ChannelOptions,
    ) -> Result<(QuicChannelSender, mpsc::Receiver<String>), TransportError> {
        let endpoint = Endpoint::client("0.0.0.0:0".parse().map_err(|e| {
            TransportError::ConfigurationError {
                message: format!("Invalid bind address: {}", e),
            }
        })?)
        .map_err(|e| TransportError::ConnectionFailed {
            reason: format!("Failed to create endpoint: {}", e),
        })?;

        let client_config = Self::create_client_config(options)?;

        let connecting = endpoint
            .connect_with(client_config, server_address, &options.server_name)
            .map_err(|e| TransportError::ConnectionFailed {
                reason: format!("Failed to initiate connection: {}", e),
            })?;

        let connection = tokio::time::timeout(options.connection_timeout, connecting)
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                reason: format!("Connection timed out after {:?}", options.connection_timeout),
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                reason: format!("Connection failed: {}", e),
            })?;

        let (send_stream, recv_stream) =
            connection
                .open_bi()
                .await
                .map_err(|e| TransportError::StreamCreationFailed {
                    reason: format!("Failed to open duplex stream: {}", e),
                })?;

        let (message_tx, message_rx) = mpsc::channel(32);
        tokio::spawn(Self::read_loop(recv_stream, message_tx));

        debug!(peer = %server_address, "analyzer channel established");

        Ok((
            QuicChannelSender {
                connection,
                send_stream: Arc::new(Mutex::new(send_stream)),
            },
            message_rx,
        ))
    }

    async fn read_loop(mut recv_stream: quinn::RecvStream, message_tx: mpsc::Sender<String>) {
        loop {
            match read_result(&mut recv_stream).await {
                Ok(Some(payload)) => match String::from_utf8(payload) {
                    Ok(raw) => {
                        if message_tx.send(raw).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "discarding non-UTF8 analyzer message");
                    }
                },
                Ok(None) => {
                    debug!("analyzer closed the result stream");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "analyzer channel read failed");
                    break;
                }
            }
        }
        // Dropping the sender ends the receiver; the client treats this as
        // terminal for the current run.
    }

    fn create_client_config(options: &ChannelOptions) -> Result<ClientConfig, TransportError> {
        let mut crypto = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
            .with_no_client_auth();

        crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.keep_alive_interval(Some(options.keep_alive_interval));

        let mut client_config = ClientConfig::new(Arc::new(crypto));
        client_config.transport_config(Arc::new(transport_config));

        Ok(client_config)
    }
}

/// Send half handed to the streaming controller.
#[derive(Clone)]
pub struct QuicChannelSender {
    connection: Connection,
    send_stream: Arc<Mutex<quinn::SendStream>>,
}

impl QuicChannelSender {
    async fn send_message(&self, tag: u8, payload: &[u8]) -> Result<(), TransportError> {
        let mut stream = self.send_stream.lock().await;
        write_framed(&mut *stream, tag, payload)
            .await
            .map_err(|e| TransportError::SendFailed {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ChannelSender for QuicChannelSender {
    async fn send_config(&self, message: &ConfigMessage) -> Result<(), TransportError> {
        let json = serde_json::to_vec(message).map_err(|e| TransportError::SerializationError {
            message: e.to_string(),
        })?;
        self.send_message(TAG_CONFIG, &json).await
    }

    async fn send_frame(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.send_message(TAG_FRAME, payload).await
    }

    fn is_open(&self) -> bool {
        self.connection.close_reason().is_none()
    }
}

struct SkipServerVerification;

impl rustls::client::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
