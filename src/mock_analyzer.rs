use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{Endpoint, ServerConfig};
use rand::Rng;
use rustls::{Certificate, PrivateKey, ServerConfig as TlsServerConfig};
use tracing::{debug, info, warn};

use crate::encoder::decode_dimensions;
use crate::errors::TransportError;
use crate::protocol::{ConfigMessage, ResultMessage, TAG_CONFIG, TAG_FRAME};
use crate::transport::{read_framed, write_result};
use crate::types::ExerciseMode;

const ALPN_PROTOCOL: &[u8] = b"motion-analysis/1.0";

/// How many frames between synthetic image-less replies, exercising the
/// client's ack path.
const IMAGE_SKIP_INTERVAL: u64 = 50;

/// Frames that must pass between two counted reps (the analyzer's cooldown,
/// expressed in frames so sessions are deterministic).
const REP_COOLDOWN_FRAMES: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepPhase {
    Start,
    Down,
    Up,
}

/// Replays the analyzer's observable rep-counting contract: a rep is
/// counted when the tracked joint angle completes a full excursion for the
/// configured mode, subject to a cooldown.
pub struct MockExerciseJudge {
    mode: ExerciseMode,
    phase: RepPhase,
    reps: u32,
    frames_seen: u64,
    last_rep_frame: u64,
}

/// One judged frame: feedback text plus its wire color.
pub struct Judgement {
    pub feedback: String,
    pub color: String,
}

impl MockExerciseJudge {
    pub fn new(mode: ExerciseMode) -> Self {
        Self {
            mode,
            phase: RepPhase::Start,
            reps: 0,
            frames_seen: 0,
            last_rep_frame: 0,
        }
    }

    /// Configuration resets the whole session, count included.
    pub fn reset(&mut self, mode: ExerciseMode) {
        *self = Self::new(mode);
    }

    pub fn reps(&self) -> u32 {
        self.reps
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn observe(&mut self, angle: f64) -> Judgement {
        self.frames_seen += 1;
        match self.mode {
            ExerciseMode::Squat => {
                if angle < 95.0 {
                    self.phase = RepPhase::Down;
                    Judgement {
                        feedback: "GOOD DEPTH!".to_string(),
                        color: "green".to_string(),
                    }
                } else if angle > 160.0 {
                    self.try_count_rep();
                    Judgement {
                        feedback: "STAND".to_string(),
                        color: "cyan".to_string(),
                    }
                } else {
                    Judgement {
                        feedback: "LOWER...".to_string(),
                        color: "orange".to_string(),
                    }
                }
            }
            ExerciseMode::Curl => {
                if angle > 140.0 {
                    self.phase = RepPhase::Down;
                    Judgement {
                        feedback: "STRETCH".to_string(),
                        color: "cyan".to_string(),
                    }
                } else if angle < 80.0 {
                    self.try_count_rep();
                    Judgement {
                        feedback: "PERFECT!".to_string(),
                        color: "green".to_string(),
                    }
                } else {
                    Judgement {
                        feedback: "CURL...".to_string(),
                        color: "orange".to_string(),
                    }
                }
            }
        }
    }

    fn try_count_rep(&mut self) {
        if self.phase == RepPhase::Down
            && self.frames_seen - self.last_rep_frame > REP_COOLDOWN_FRAMES
        {
            self.reps += 1;
            self.last_rep_frame = self.frames_seen;
            self.phase = RepPhase::Up;
        }
    }
}

/// Mock remote analyzer: accepts the client's duplex channel and answers
/// every frame with a synthesized result.
pub struct MockAnalyzerServer {
    endpoint: Option<Endpoint>,
}

impl MockAnalyzerServer {
    pub fn new() -> Self {
        Self { endpoint: None }
    }

    /// Start listening and return the bound address.
    pub async fn start(&mut self, bind_addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        let server_config = Self::create_server_config()?;
        let endpoint = Endpoint::server(server_config, bind_addr).map_err(|e| {
            TransportError::ConnectionFailed {
                reason: format!("Failed to bind server endpoint: {}", e),
            }
        })?;
        let local_addr = endpoint
            .local_addr()
            .map_err(|e| TransportError::ConfigurationError {
                message: e.to_string(),
            })?;

        info!("mock analyzer listening on {}", local_addr);

        let accept_endpoint = endpoint.clone();
        tokio::spawn(async move {
            while let Some(connecting) = accept_endpoint.accept().await {
                tokio::spawn(async move {
                    if let Err(e) = Self::handle_connection(connecting).await {
                        warn!(error = %e, "analyzer session ended with error");
                    }
                });
            }
        });

        self.endpoint = Some(endpoint);
        Ok(local_addr)
    }

    pub fn shutdown(&self) {
        if let Some(endpoint) = &self.endpoint {
            endpoint.close(0u32.into(), b"shutdown");
        }
    }

    async fn handle_connection(connecting: quinn::Connecting) -> Result<(), TransportError> {
        let connection = connecting
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                reason: e.to_string(),
            })?;
        info!(peer = %connection.remote_address(), "client connected");

        let (mut send_stream, mut recv_stream) =
            connection
                .accept_bi()
                .await
                .map_err(|e| TransportError::StreamCreationFailed {
                    reason: e.to_string(),
                })?;

        let mut judge = MockExerciseJudge::new(ExerciseMode::default());

        loop {
            let (tag, payload) = match read_framed(&mut recv_stream).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    info!("client closed the channel");
                    return Ok(());
                }
                Err(e) => {
                    return Err(TransportError::ConnectionClosed {
                        reason: e.to_string(),
                    })
                }
            };

            match tag {
                TAG_CONFIG => match serde_json::from_slice::<ConfigMessage>(&payload) {
                    Ok(config) => {
                        info!(mode = %config.mode, "configured, counters reset");
                        judge.reset(config.mode);
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed config"),
                },
                TAG_FRAME => {
                    let response = Self::judge_frame(&mut judge, &payload);
                    let json = serde_json::to_vec(&response).map_err(|e| {
                        TransportError::SerializationError {
                            message: e.to_string(),
                        }
                    })?;
                    write_result(&mut send_stream, &json).await.map_err(|e| {
                        TransportError::SendFailed {
                            message: e.to_string(),
                        }
                    })?;
                }
                other => {
                    debug!(tag = other, "ignoring unknown message tag");
                }
            }
        }
    }

    /// Produce one synthesized result for a received frame: a smoothed
    /// angle sweep drives the rep state machine, and the annotated frame is
    /// an opaque token derived from the payload.
    fn judge_frame(judge: &mut MockExerciseJudge, payload: &[u8]) -> ResultMessage {
        let jitter: f64 = rand::thread_rng().gen_range(-3.0..3.0);
        let phase = judge.frames_seen() as f64 * 0.15;
        let angle = (115.0 + 55.0 * phase.sin() + jitter).clamp(40.0, 180.0);

        let judgement = judge.observe(angle);

        let processed_image = if judge.frames_seen() % IMAGE_SKIP_INTERVAL == 0 {
            None
        } else {
            let (width, height) = decode_dimensions(payload).unwrap_or((0, 0));
            Some(format!("mock:{}x{}#{}", width, height, judge.frames_seen()))
        };

        ResultMessage {
            processed_image,
            reps: judge.reps(),
            feedback: Some(judgement.feedback),
            color: judgement.color,
            angle: Some(angle.round()),
        }
    }

    fn create_server_config() -> Result<ServerConfig, TransportError> {
        // Self-signed certificate; the client skips verification.
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| TransportError::ConfigurationError {
                message: e.to_string(),
            })?;

        let cert_der = cert
            .serialize_der()
            .map_err(|e| TransportError::ConfigurationError {
                message: e.to_string(),
            })?;
        let priv_key = cert.serialize_private_key_der();

        let mut tls_config = TlsServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(vec![Certificate(cert_der)], PrivateKey(priv_key))
            .map_err(|e| TransportError::ConfigurationError {
                message: e.to_string(),
            })?;

        tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let mut server_config = ServerConfig::with_crypto(Arc::new(tls_config));
        if let Some(transport_config) = Arc::get_mut(&mut server_config.transport) {
            transport_config.max_concurrent_bidi_streams(8u32.into());
            transport_config.max_idle_timeout(Some(
                std::time::Duration::from_secs(30)
                    .try_into()
                    .map_err(|_| TransportError::ConfigurationError {
                        message: "idle timeout out of range".to_string(),
                    })?,
            ));
        }

        Ok(server_config)
    }
}

impl Default for MockAnalyzerServer {
    fn default() -> Self {
        Self::new()
    }
}
