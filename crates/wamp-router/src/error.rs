//! Router error types

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] wamp_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] wamp_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sessions still open after {0:?}")]
    ShutdownTimeout(Duration),
}
