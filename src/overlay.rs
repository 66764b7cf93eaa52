//! In-page overlay: the last-resort reminder toast and the
//! permission-denied help panel.
//!
//! The layer holds what should currently be drawn over the page. Hosts
//! subscribe to snapshots and render them; the layer removes elements on its
//! own once their lifetime is up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::channel::{ChannelKind, NotificationChannel};
use crate::environment::BrowserFamily;
use crate::error::Result;
use crate::models::ReminderNotice;

pub const TOAST_LIFETIME: Duration = Duration::from_secs(10);
pub const HELP_PANEL_LIFETIME: Duration = Duration::from_secs(30);

const TOAST_STYLE: &str = "position:fixed;top:20px;right:20px;z-index:10000;max-width:320px;\
padding:16px;border-radius:8px;background:#1f2937;color:#fff;\
box-shadow:0 4px 12px rgba(0,0,0,.25);font-family:system-ui,sans-serif;white-space:pre-line";
const HELP_PANEL_STYLE: &str = "position:fixed;bottom:20px;left:50%;transform:translateX(-50%);\
z-index:10001;max-width:420px;padding:20px;border-radius:10px;background:#fff;color:#111827;\
border:1px solid #f59e0b;box-shadow:0 8px 24px rgba(0,0,0,.2);font-family:system-ui,sans-serif";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayKind {
    ReminderToast,
    PermissionHelp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayElement {
    pub id: u64,
    pub kind: OverlayKind,
    pub title: String,
    pub lines: Vec<String>,
    /// Inline CSS, so hosts can inject the element without a stylesheet.
    pub style: String,
    pub dismissible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

struct OverlayInner {
    elements: watch::Sender<Vec<OverlayElement>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct OverlayLayer {
    inner: Arc<OverlayInner>,
}

impl Default for OverlayLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayLayer {
    pub fn new() -> Self {
        let (elements, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(OverlayInner {
                elements,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<OverlayElement>> {
        self.inner.elements.subscribe()
    }

    pub fn snapshot(&self) -> Vec<OverlayElement> {
        self.inner.elements.borrow().clone()
    }

    pub fn show_toast(&self, notice: &ReminderNotice) -> u64 {
        let id = self.next_id();
        self.inner.elements.send_modify(|elements| {
            elements.push(OverlayElement {
                id,
                kind: OverlayKind::ReminderToast,
                title: notice.title.clone(),
                lines: notice.body.lines().map(str::to_string).collect(),
                style: TOAST_STYLE.to_string(),
                dismissible: true,
                route: Some(notice.route.clone()),
            })
        });
        debug!("overlay: toast {} shown for {}", id, notice.tag);
        self.remove_after(id, TOAST_LIFETIME);
        id
    }

    /// Shows the re-enable instructions unless a panel is already up.
    pub fn show_permission_help(&self, family: BrowserFamily) -> Option<u64> {
        let id = self.next_id();
        let mut lines = vec![format!(
            "Notifications are blocked for this site in {}. To get meeting reminders again:",
            family.label()
        )];
        lines.extend(
            family
                .reenable_steps()
                .iter()
                .enumerate()
                .map(|(idx, step)| format!("{}. {}", idx + 1, step)),
        );

        let shown = self.inner.elements.send_if_modified(|elements| {
            if elements.iter().any(|e| e.kind == OverlayKind::PermissionHelp) {
                return false;
            }
            elements.push(OverlayElement {
                id,
                kind: OverlayKind::PermissionHelp,
                title: "Meeting reminders are blocked".to_string(),
                lines,
                style: HELP_PANEL_STYLE.to_string(),
                dismissible: true,
                route: None,
            });
            true
        });

        if !shown {
            debug!("overlay: permission help already visible");
            return None;
        }
        info!("overlay: permission help shown ({})", family.label());
        self.remove_after(id, HELP_PANEL_LIFETIME);
        Some(id)
    }

    pub fn dismiss(&self, id: u64) -> bool {
        self.inner.elements.send_if_modified(|elements| {
            let before = elements.len();
            elements.retain(|e| e.id != id);
            elements.len() != before
        })
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn remove_after(&self, id: u64, lifetime: Duration) {
        let Ok(handle) = Handle::try_current() else {
            warn!("overlay: no runtime, element {} stays until dismissed", id);
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(lifetime).await;
            if let Some(inner) = weak.upgrade() {
                OverlayLayer { inner }.dismiss(id);
            }
        });
    }
}

impl NotificationChannel for OverlayLayer {
    fn kind(&self) -> ChannelKind {
        ChannelKind::InPage
    }

    fn deliver(&self, notice: &ReminderNotice) -> Result<()> {
        self.show_toast(notice);
        Ok(())
    }
}
