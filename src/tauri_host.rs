//! Tauri 2 host: native notifications, message dialogs, the overlay bridge
//! to the webview, and the plugin commands the settings panel calls.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;
use tauri::plugin::{Builder as PluginBuilder, TauriPlugin};
use tauri::{AppHandle, Emitter, Manager, Runtime};
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};
use tauri_plugin_notification::{NotificationExt, PermissionState as TauriPermission};

use crate::channel::{ChannelKind, NotificationChannel, PermissionPrompt};
use crate::config::{FileStore, MemoryStore, PreferenceStore};
use crate::environment::Environment;
use crate::error::{ReminderError, Result};
use crate::file_logger::Journal;
use crate::models::{Meeting, PermissionState, ReminderKey, ReminderNotice, ReminderStatus};
use crate::overlay::OverlayLayer;
use crate::scheduler::{Platform, ReminderScheduler};
use crate::worker::TokioWorkerRegistrar;

pub const OVERLAY_EVENT: &str = "reminder-overlay";
pub const OPEN_MEETING_EVENT: &str = "reminder-open-meeting";
const MAIN_WINDOW: &str = "main";
const APP_ORIGIN: &str = "tauri://localhost";
const SETTINGS_FILE_NAME: &str = "reminders.json";

/// Same tag, same id: the OS replaces rather than stacks the notification.
fn notification_id(tag: &str) -> i32 {
    let mut hasher = DefaultHasher::new();
    tag.hash(&mut hasher);
    (hasher.finish() & 0x7fff_ffff) as i32
}

fn map_permission(state: TauriPermission) -> PermissionState {
    match state {
        TauriPermission::Granted => PermissionState::Granted,
        TauriPermission::Denied => PermissionState::Denied,
        _ => PermissionState::Default,
    }
}

pub struct TauriNotifications<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> TauriNotifications<R> {
    pub fn new(app: AppHandle<R>) -> Self {
        Self { app }
    }
}

impl<R: Runtime> NotificationChannel for TauriNotifications<R> {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Native
    }

    fn deliver(&self, notice: &ReminderNotice) -> Result<()> {
        self.app
            .notification()
            .builder()
            .id(notification_id(&notice.tag))
            .title(&notice.title)
            .body(&notice.body)
            .show()
            .map_err(|err| ReminderError::delivery(ChannelKind::Native, err.to_string()))
    }

    // Desktop `show()` hands back no handle: expiry and click handling stay
    // with the OS notification centre there.
    #[cfg(any(target_os = "android", target_os = "ios"))]
    fn retract(&self, tag: &str) -> Result<()> {
        self.app
            .notification()
            .remove_active(vec![notification_id(tag)])
            .map_err(|err| ReminderError::delivery(ChannelKind::Native, err.to_string()))
    }
}

#[async_trait]
impl<R: Runtime> PermissionPrompt for TauriNotifications<R> {
    fn current(&self) -> Result<PermissionState> {
        self.app
            .notification()
            .permission_state()
            .map(map_permission)
            .map_err(|err| ReminderError::Permission(err.to_string()))
    }

    async fn request(&self) -> Result<PermissionState> {
        self.app
            .notification()
            .request_permission()
            .map(map_permission)
            .map_err(|err| ReminderError::Permission(err.to_string()))
    }
}

pub struct TauriDialog<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> TauriDialog<R> {
    pub fn new(app: AppHandle<R>) -> Self {
        Self { app }
    }
}

impl<R: Runtime> NotificationChannel for TauriDialog<R> {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Dialog
    }

    fn deliver(&self, notice: &ReminderNotice) -> Result<()> {
        if self.app.get_webview_window(MAIN_WINDOW).is_none() {
            return Err(ReminderError::delivery(ChannelKind::Dialog, "main window is not available"));
        }
        self.app
            .dialog()
            .message(notice.body.clone())
            .title(notice.title.clone())
            .kind(MessageDialogKind::Info)
            .show(|_| {});
        Ok(())
    }
}

/// Forwards every overlay snapshot to the webview.
pub fn bridge_overlay<R: Runtime>(app: AppHandle<R>, overlay: OverlayLayer) {
    let mut rx = overlay.subscribe();
    tauri::async_runtime::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if let Err(err) = app.emit(OVERLAY_EVENT, snapshot) {
                warn!("failed to emit overlay snapshot: {}", err);
            }
        }
    });
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenMeeting {
    meeting_id: String,
    route: String,
}

/// Brings the main window to the front and asks the UI to open the meeting.
pub fn focus_meeting_window<R: Runtime>(app: &AppHandle<R>, meeting_id: &str) -> std::result::Result<(), String> {
    let win = app
        .get_webview_window(MAIN_WINDOW)
        .ok_or_else(|| "main window is missing".to_string())?;
    let _ = win.unminimize();
    let _ = win.show();
    let _ = win.set_focus();
    app.emit(
        OPEN_MEETING_EVENT,
        OpenMeeting {
            meeting_id: meeting_id.to_string(),
            route: format!("/meetings/{meeting_id}"),
        },
    )
    .map_err(|err| format!("failed to emit {OPEN_MEETING_EVENT}: {err}"))
}

pub fn platform<R: Runtime>(app: &AppHandle<R>, store: Arc<dyn PreferenceStore>) -> Platform {
    let notifications = Arc::new(TauriNotifications::new(app.clone()));
    let platform = Platform::new(Environment::interactive(APP_ORIGIN), store)
        .with_native(notifications.clone(), notifications)
        .with_dialog(Arc::new(TauriDialog::new(app.clone())))
        .with_worker(Arc::new(TokioWorkerRegistrar::new()));

    let journal_dir = match app.path().app_config_dir() {
        Ok(dir) => Some(dir.join("logs")),
        Err(err) => {
            warn!("failed to resolve app config dir, falling back to the user data dir: {}", err);
            Journal::default_dir()
        }
    };
    match journal_dir {
        Some(dir) => platform.with_journal(Journal::new(dir)),
        None => {
            warn!("no log dir available, reminder journal disabled");
            platform
        }
    }
}

#[tauri::command]
async fn request_permission(state: tauri::State<'_, ReminderScheduler>) -> std::result::Result<bool, String> {
    Ok(state.request_permission().await)
}

#[tauri::command]
async fn schedule_meeting_reminders(
    state: tauri::State<'_, ReminderScheduler>,
    meeting: Meeting,
) -> std::result::Result<Vec<ReminderKey>, String> {
    Ok(state.schedule_meeting_reminders(&meeting).await)
}

#[tauri::command]
async fn reschedule_all(
    state: tauri::State<'_, ReminderScheduler>,
    meetings: Vec<Meeting>,
) -> std::result::Result<(), String> {
    state.reschedule_all(&meetings).await;
    Ok(())
}

#[tauri::command]
async fn clear_reminder(
    state: tauri::State<'_, ReminderScheduler>,
    key: ReminderKey,
) -> std::result::Result<bool, String> {
    Ok(state.clear_reminder(&key).await)
}

#[tauri::command]
async fn clear_all(state: tauri::State<'_, ReminderScheduler>) -> std::result::Result<(), String> {
    state.clear_all().await;
    Ok(())
}

#[tauri::command]
async fn set_enabled(state: tauri::State<'_, ReminderScheduler>, enabled: bool) -> std::result::Result<(), String> {
    state.set_enabled(enabled).await;
    Ok(())
}

#[tauri::command]
async fn get_status(state: tauri::State<'_, ReminderScheduler>) -> std::result::Result<ReminderStatus, String> {
    Ok(state.status().await)
}

#[tauri::command]
async fn dismiss_overlay(state: tauri::State<'_, ReminderScheduler>, id: u64) -> std::result::Result<bool, String> {
    Ok(state.overlay().map_or(false, |overlay| overlay.dismiss(id)))
}

#[tauri::command]
async fn focus_meeting<R: Runtime>(app: AppHandle<R>, meeting_id: String) -> std::result::Result<(), String> {
    focus_meeting_window(&app, &meeting_id)
}

/// Registers the scheduler as managed state plus the `reminders` commands.
pub fn plugin<R: Runtime>() -> TauriPlugin<R> {
    PluginBuilder::new("reminders")
        .invoke_handler(tauri::generate_handler![
            request_permission,
            schedule_meeting_reminders,
            reschedule_all,
            clear_reminder,
            clear_all,
            set_enabled,
            get_status,
            dismiss_overlay,
            focus_meeting
        ])
        .setup(|app, _api| {
            crate::init_logging(false);
            let settings_path = app.path().app_config_dir().map(|dir| dir.join(SETTINGS_FILE_NAME));
            let handle = app.clone();
            let scheduler = tauri::async_runtime::block_on(async move {
                let opened = match settings_path {
                    Ok(path) => FileStore::open(path).await,
                    Err(err) => {
                        warn!("failed to resolve app config dir, using the user config dir: {}", err);
                        FileStore::open_default().await
                    }
                };
                let store: Arc<dyn PreferenceStore> = match opened {
                    Ok(store) => Arc::new(store),
                    Err(err) => {
                        error!("failed to load reminder settings, using in-memory defaults: {}", err);
                        Arc::new(MemoryStore::new())
                    }
                };
                ReminderScheduler::new(platform(&handle, store)).await
            });

            if let Some(overlay) = scheduler.overlay() {
                bridge_overlay(app.clone(), overlay.clone());
            }
            app.manage(scheduler);
            info!("reminders plugin ready");
            Ok(())
        })
        .build()
}
