// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for warden-server.

use thiserror::Error;
use warden_protocol::FrameError;
use warden_protocol::messages::ErrorResponse;

use crate::container::State;

fn states(expected: &[State]) -> String {
    expected
        .iter()
        .map(State::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Daemon errors.
///
/// Everything except configuration, I/O and frame errors is a domain error
/// and is reported to the client as an error response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol violation.
    #[error("Protocol error: {0}")]
    Frame(#[from] FrameError),

    /// Request is not valid in the container's current state.
    #[error("Container state is {state}, expected one of: {}", states(.expected))]
    InvalidState {
        state: State,
        expected: &'static [State],
    },

    /// No container is registered under this handle.
    #[error("Unknown handle: {0}")]
    UnknownHandle(String),

    /// The container has no job with this id.
    #[error("Unknown job: {0}")]
    UnknownJob(u32),

    /// A container with this handle already exists.
    #[error("Handle already in use: {0}")]
    HandleTaken(String),

    /// Backend driver operation failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A resource pool is empty.
    #[error("No {0} available")]
    ResourceExhausted(&'static str),

    /// The backend does not implement this operation.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Error response sent to the client.
    pub fn to_response(&self) -> ErrorResponse {
        let data = match self {
            Error::InvalidState { state, .. } => Some(state.to_string()),
            Error::UnknownHandle(handle) | Error::HandleTaken(handle) => Some(handle.clone()),
            _ => None,
        };
        ErrorResponse {
            message: Some(self.to_string()),
            data,
            backtrace: Vec::new(),
        }
    }

    /// Whether this error is expected during racing teardown and can be
    /// ignored by best-effort cleanup.
    pub fn is_domain(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Io(_) | Error::Frame(_))
    }
}

/// Result type using daemon Error.
pub type Result<T> = std::result::Result<T, Error>;
