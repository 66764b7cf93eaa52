//! Capability seams between the scheduler and the host.
//!
//! The scheduler only talks to these traits. Hosts plug in real
//! implementations (see `tauri_host`); tests plug in recorders.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{PermissionState, ReminderNotice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    Native,
    Dialog,
    InPage,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelKind::Native => "native",
            ChannelKind::Dialog => "dialog",
            ChannelKind::InPage => "in-page",
        };
        f.write_str(label)
    }
}

/// Something that can put a reminder in front of the user.
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn deliver(&self, notice: &ReminderNotice) -> Result<()>;

    /// Takes a shown notice down again once its `auto_dismiss` is up.
    /// Channels without a close primitive keep this no-op.
    fn retract(&self, _tag: &str) -> Result<()> {
        Ok(())
    }
}

/// Gatekeeper for the native notification primitive.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    /// Current state without prompting.
    fn current(&self) -> Result<PermissionState>;

    /// Ask the user. May never resolve; callers bound it with a timeout.
    async fn request(&self) -> Result<PermissionState>;
}
