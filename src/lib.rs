pub mod types;
pub mod errors;
pub mod protocol;
pub mod serde_helpers;
pub mod config;
pub mod source;
pub mod encoder;
pub mod transport;
#[cfg(test)]
mod transport_test;
pub mod controller;
#[cfg(test)]
mod controller_test;
pub mod session;
pub mod history;
pub mod sinks;
pub mod app;
pub mod mock_analyzer;

pub use errors::*;
pub use types::*;
