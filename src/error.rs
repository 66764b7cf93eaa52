//! Error types for the reminder seams
//!
//! None of these cross the public scheduler API. They travel between the
//! scheduler and its capabilities (stores, channels, the worker) and end up
//! logged, cascaded, or folded into `ReminderStatus::initialization_error`.

use thiserror::Error;

use crate::channel::ChannelKind;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("preference store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{channel} delivery failed: {message}")]
    Delivery { channel: ChannelKind, message: String },

    #[error("background worker is not reachable")]
    WorkerUnreachable,

    #[error("worker registration failed: {0}")]
    Registration(String),

    #[error("permission query failed: {0}")]
    Permission(String),
}

impl ReminderError {
    pub fn delivery(channel: ChannelKind, message: impl Into<String>) -> Self {
        ReminderError::Delivery {
            channel,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReminderError>;
