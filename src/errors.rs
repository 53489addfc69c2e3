use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to establish connection: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    #[error("Stream creation failed: {reason}")]
    StreamCreationFailed { reason: String },

    #[error("Send failed: {message}")]
    SendFailed { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to acquire capture device: {reason}")]
    DeviceAcquisition { reason: String },

    #[error("Frame capture failed: {message}")]
    CaptureFailed { message: String },
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Surface has no pixel data")]
    EmptySurface,

    #[error("Surface buffer does not match dimensions: expected {expected} bytes, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

// Main application error type
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
