//! Client-side meeting reminders.
//!
//! [`ReminderScheduler`] arms reminders 5, 30 and 60 minutes before each
//! meeting, hands them to a background worker when one is registered or
//! keeps a local timer otherwise, and at fire time walks a fallback cascade
//! of native notification, blocking dialog and in-page toast.

use std::sync::OnceLock;

use log::LevelFilter;

pub mod channel;
pub mod config;
pub mod environment;
pub mod error;
pub mod file_logger;
pub mod models;
pub mod overlay;
pub mod scheduler;
pub mod worker;

#[cfg(feature = "tauri")]
pub mod tauri_host;

pub use channel::{ChannelKind, NotificationChannel, PermissionPrompt};
pub use config::{FileStore, MemoryStore, PreferenceStore};
pub use environment::{BrowserFamily, Clock, Environment, FixedClock, SystemClock};
pub use error::ReminderError;
pub use models::{
    LeadTime, Meeting, PermissionState, ReminderKey, ReminderNotice, ReminderStatus, WorkerEvent, WorkerMessage,
};
pub use overlay::{OverlayElement, OverlayKind, OverlayLayer};
pub use scheduler::{DeliveryOutcome, PendingReminder, Platform, ReminderScheduler, PERMISSION_TIMEOUT};
pub use worker::{BackgroundWorker, TokioWorker, TokioWorkerRegistrar, WorkerRegistrar};

static BASE_LOG_LEVEL: OnceLock<LevelFilter> = OnceLock::new();

fn log_env() -> env_logger::Env<'static> {
    env_logger::Env::default().default_filter_or("info")
}

/// Installs `env_logger` once; `RUST_LOG` decides (default `info`). This
/// crate's `debug` records pass only while debug mode is on, see
/// [`set_debug_logging`]. A no-op when the host already installed a logger.
pub fn init_logging(debug_mode: bool) {
    let base = env_logger::Builder::from_env(log_env()).build().filter();
    let mut builder = env_logger::Builder::from_env(log_env());
    if base < LevelFilter::Debug {
        builder.filter_module("meeting_reminders", LevelFilter::Debug);
    }
    let logger = builder.build();
    let max = logger.filter();
    if log::set_boxed_logger(Box::new(logger)).is_err() {
        return;
    }
    log::set_max_level(max);
    let _ = BASE_LOG_LEVEL.set(base);
    set_debug_logging(debug_mode);
}

/// Raises or restores the global level for debug mode. Only acts on the
/// logger [`init_logging`] installed.
pub fn set_debug_logging(debug_mode: bool) {
    let Some(base) = BASE_LOG_LEVEL.get().copied() else {
        return;
    };
    log::set_max_level(if debug_mode { base.max(LevelFilter::Debug) } else { base });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_mode_moves_the_global_level() {
        init_logging(false);
        let Some(base) = BASE_LOG_LEVEL.get().copied() else {
            // Another logger won the race; nothing of ours to adjust.
            return;
        };
        assert_eq!(log::max_level(), base);

        set_debug_logging(true);
        assert!(log::max_level() >= LevelFilter::Debug);

        set_debug_logging(false);
        assert_eq!(log::max_level(), base);
    }
}
