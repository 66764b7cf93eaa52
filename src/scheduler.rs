use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::channel::{ChannelKind, NotificationChannel, PermissionPrompt};
use crate::config::{self, PreferenceStore, DEBUG_KEY, ENABLED_KEY};
use crate::environment::{Clock, Environment, SystemClock};
use crate::file_logger::{self, Journal, LogEntry};
use crate::models::{
    LeadTime, Meeting, PermissionState, ReminderKey, ReminderNotice, ReminderStatus, WorkerEvent, WorkerMessage,
};
use crate::overlay::OverlayLayer;
use crate::worker::{BackgroundWorker, WorkerRegistrar, REMINDER_WORKER_PATH};

/// Upper bound on how long a permission prompt may stay unanswered.
pub const PERMISSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the scheduler needs from its host.
pub struct Platform {
    pub environment: Environment,
    pub permissions: Option<Arc<dyn PermissionPrompt>>,
    pub native: Option<Arc<dyn NotificationChannel>>,
    pub dialog: Option<Arc<dyn NotificationChannel>>,
    pub overlay: OverlayLayer,
    pub worker: Option<Arc<dyn WorkerRegistrar>>,
    pub store: Arc<dyn PreferenceStore>,
    pub clock: Arc<dyn Clock>,
    pub journal: Option<Journal>,
}

impl Platform {
    pub fn new(environment: Environment, store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            environment,
            permissions: None,
            native: None,
            dialog: None,
            overlay: OverlayLayer::new(),
            worker: None,
            store,
            clock: Arc::new(SystemClock),
            journal: None,
        }
    }

    pub fn with_native(
        mut self,
        permissions: Arc<dyn PermissionPrompt>,
        native: Arc<dyn NotificationChannel>,
    ) -> Self {
        self.permissions = Some(permissions);
        self.native = Some(native);
        self
    }

    pub fn with_dialog(mut self, dialog: Arc<dyn NotificationChannel>) -> Self {
        self.dialog = Some(dialog);
        self
    }

    pub fn with_overlay(mut self, overlay: OverlayLayer) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_worker(mut self, registrar: Arc<dyn WorkerRegistrar>) -> Self {
        self.worker = Some(registrar);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }
}

/// Which tier ended up showing a fired reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryOutcome {
    Native,
    Dialog,
    InPage,
    /// Every tier failed; the firing was only logged.
    LoggedOnly,
}

/// Read-only view of one outstanding reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReminder {
    pub key: ReminderKey,
    pub fire_at: NaiveDateTime,
    pub delegated: bool,
}

enum Delivery {
    LocalTimer(JoinHandle<()>),
    /// The worker holds the timer under the key's wire id.
    DelegatedToWorker,
}

struct ReminderRecord {
    fire_at: NaiveDateTime,
    generation: u64,
    delivery: Delivery,
}

struct Flags {
    permission: PermissionState,
    enabled: bool,
    debug_mode: bool,
}

struct SchedulerInner {
    platform: Platform,
    supported: bool,
    secure_context: bool,
    worker: Option<Arc<dyn BackgroundWorker>>,
    initialization_error: Option<String>,
    flags: RwLock<Flags>,
    registry: Mutex<HashMap<ReminderKey, ReminderRecord>>,
    generation: AtomicU64,
}

/// Meeting reminder scheduler.
///
/// Create one at application start and share it (it is a cheap `Clone`
/// handle). In a non-interactive environment it is inert: every call is a
/// no-op and status reports no support.
#[derive(Clone, Default)]
pub struct ReminderScheduler {
    inner: Option<Arc<SchedulerInner>>,
}

impl ReminderScheduler {
    pub async fn new(platform: Platform) -> Self {
        if !platform.environment.interactive {
            info!("reminders: non-interactive environment, scheduler is inert");
            return Self::inert();
        }
        let (inner, worker_events) = SchedulerInner::init(platform).await;
        let inner = Arc::new(inner);
        if let Some(events) = worker_events {
            SchedulerInner::listen(Arc::downgrade(&inner), events);
        }
        Self { inner: Some(inner) }
    }

    pub fn inert() -> Self {
        Self { inner: None }
    }

    pub fn is_inert(&self) -> bool {
        self.inner.is_none()
    }

    pub async fn request_permission(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.request_permission().await,
            None => false,
        }
    }

    /// Arms one reminder. `None` when reminders are off, not permitted, or
    /// the lead time has already passed.
    pub async fn schedule_reminder(&self, meeting: &Meeting, lead: LeadTime) -> Option<ReminderKey> {
        match &self.inner {
            Some(inner) => inner.schedule_reminder(meeting, lead).await,
            None => None,
        }
    }

    pub async fn schedule_meeting_reminders(&self, meeting: &Meeting) -> Vec<ReminderKey> {
        match &self.inner {
            Some(inner) => inner.schedule_meeting_reminders(meeting).await,
            None => Vec::new(),
        }
    }

    /// Replaces the whole registry with reminders for upcoming meetings.
    pub async fn reschedule_all(&self, meetings: &[Meeting]) {
        if let Some(inner) = &self.inner {
            inner.reschedule_all(meetings).await;
        }
    }

    pub async fn clear_reminder(&self, key: &ReminderKey) -> bool {
        match &self.inner {
            Some(inner) => inner.clear_reminder(key).await,
            None => false,
        }
    }

    pub async fn clear_all(&self) {
        if let Some(inner) = &self.inner {
            inner.clear_all().await;
        }
    }

    pub async fn set_enabled(&self, enabled: bool) {
        if let Some(inner) = &self.inner {
            inner.set_enabled(enabled).await;
        }
    }

    pub async fn is_enabled(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.flags.read().await.enabled,
            None => false,
        }
    }

    pub async fn set_debug_mode(&self, debug_mode: bool) {
        if let Some(inner) = &self.inner {
            inner.set_debug_mode(debug_mode).await;
        }
    }

    pub async fn has_permission(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.refresh_permission().await.is_granted(),
            None => false,
        }
    }

    pub async fn status(&self) -> ReminderStatus {
        match &self.inner {
            Some(inner) => inner.status().await,
            None => ReminderStatus::default(),
        }
    }

    pub async fn pending(&self) -> Vec<PendingReminder> {
        match &self.inner {
            Some(inner) => inner.pending().await,
            None => Vec::new(),
        }
    }

    /// Runs the delivery cascade right away, e.g. for a "send test reminder" button.
    pub async fn deliver(&self, meeting: &Meeting, lead: LeadTime) -> DeliveryOutcome {
        match &self.inner {
            Some(inner) => inner.deliver(meeting, lead).await,
            None => {
                info!("reminders: inert scheduler, {} not delivered", ReminderKey::new(meeting.id.clone(), lead));
                DeliveryOutcome::LoggedOnly
            }
        }
    }

    pub fn overlay(&self) -> Option<&OverlayLayer> {
        self.inner.as_ref().map(|inner| &inner.platform.overlay)
    }
}

impl SchedulerInner {
    async fn init(platform: Platform) -> (Self, Option<mpsc::UnboundedReceiver<WorkerEvent>>) {
        let mut failures: Vec<String> = Vec::new();
        let store = platform.store.clone();

        let persisted_debug = match config::read_flag(store.as_ref(), DEBUG_KEY).await {
            Ok(value) => value,
            Err(err) => {
                failures.push(format!("reading debug flag: {err}"));
                None
            }
        };
        let debug_mode = persisted_debug.unwrap_or_else(config::debug_from_env);

        let supported = platform.permissions.is_some() && platform.native.is_some();
        let permission = match (&platform.permissions, supported) {
            (Some(prompt), true) => match prompt.current() {
                Ok(state) => state,
                Err(err) => {
                    failures.push(format!("reading notification permission: {err}"));
                    PermissionState::Default
                }
            },
            _ => PermissionState::Unsupported,
        };

        let enabled = match config::read_flag(store.as_ref(), ENABLED_KEY).await {
            Ok(value) => value.unwrap_or(true),
            Err(err) => {
                failures.push(format!("reading reminder preference: {err}"));
                true
            }
        };

        let secure_context = platform.environment.is_secure_context();
        if !secure_context {
            warn!(
                "reminders: origin {:?} is not a secure context, notification permission requests will likely fail",
                platform.environment.origin
            );
        }

        let (worker, worker_events) = match &platform.worker {
            Some(registrar) => {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                match registrar.register(REMINDER_WORKER_PATH, events_tx).await {
                    Ok(worker) => {
                        info!("reminders: background worker registered at {}", REMINDER_WORKER_PATH);
                        (Some(worker), Some(events_rx))
                    }
                    Err(err) => {
                        warn!("reminders: background worker unavailable, using local timers: {}", err);
                        (None, None)
                    }
                }
            }
            None => {
                debug!("reminders: no background worker support, using local timers");
                (None, None)
            }
        };

        let initialization_error = if failures.is_empty() {
            None
        } else {
            let message = format!("failed to initialise reminders: {}", failures.join("; "));
            warn!("{}", message);
            Some(message)
        };

        if debug_mode {
            if let Some(journal) = &platform.journal {
                journal.cleanup_old_logs().await;
            }
        }

        crate::set_debug_logging(debug_mode);
        info!(
            "reminders initialised: supported={}, permission={:?}, enabled={}, worker={}, debug={}",
            supported,
            permission,
            enabled,
            worker.is_some(),
            debug_mode
        );

        let inner = Self {
            platform,
            supported,
            secure_context,
            worker,
            initialization_error,
            flags: RwLock::new(Flags {
                permission,
                enabled,
                debug_mode,
            }),
            registry: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(1),
        };
        (inner, worker_events)
    }

    /// Runs worker reports through the scheduler until the worker goes away.
    fn listen(weak: Weak<Self>, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_worker_event(event).await;
            }
            debug!("reminders: worker event stream closed");
        });
    }

    async fn on_worker_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::ReminderFired {
                id,
                meeting,
                lead_minutes,
            } => {
                let Some(lead) = LeadTime::from_minutes(lead_minutes) else {
                    warn!("reminders: worker fired {} with unsupported lead {} min", id, lead_minutes);
                    return;
                };
                let key = ReminderKey::new(meeting.id.clone(), lead);
                let fire_at = meeting.reminder_at(lead);
                {
                    let mut registry = self.registry.lock().await;
                    let current = registry.get(&key).map_or(false, |record| {
                        matches!(record.delivery, Delivery::DelegatedToWorker) && Some(record.fire_at) == fire_at
                    });
                    if current {
                        registry.remove(&key);
                    }
                }
                debug!("reminders: worker reported {} fired", id);
                self.deliver(&meeting, lead).await;
            }
        }
    }

    async fn request_permission(&self) -> bool {
        if let Some(err) = &self.initialization_error {
            warn!("reminders: permission request skipped, {}", err);
            return false;
        }
        let Some(prompt) = self.platform.permissions.clone().filter(|_| self.supported) else {
            warn!("reminders: notifications are not supported here");
            return false;
        };

        match self.refresh_permission().await {
            PermissionState::Granted => return true,
            PermissionState::Denied => {
                info!("reminders: permission previously denied, showing re-enable help");
                let family = self.platform.environment.browser_family();
                self.platform.overlay.show_permission_help(family);
                return false;
            }
            PermissionState::Unsupported => return false,
            PermissionState::Default => {}
        }

        let outcome = match time::timeout(PERMISSION_TIMEOUT, prompt.request()).await {
            Ok(Ok(state)) => state,
            Ok(Err(err)) => {
                warn!("reminders: permission request failed: {}", err);
                return false;
            }
            Err(_) => {
                warn!(
                    "reminders: permission prompt unanswered after {}s",
                    PERMISSION_TIMEOUT.as_secs()
                );
                return false;
            }
        };

        self.flags.write().await.permission = outcome;
        info!("reminders: permission request resolved to {:?}", outcome);
        outcome.is_granted()
    }

    /// Re-reads the permission. Losing a grant clears every reminder.
    async fn refresh_permission(&self) -> PermissionState {
        if !self.supported {
            return PermissionState::Unsupported;
        }
        let Some(prompt) = &self.platform.permissions else {
            return PermissionState::Unsupported;
        };
        let current = match prompt.current() {
            Ok(state) => state,
            Err(err) => {
                warn!("reminders: permission query failed: {}", err);
                return self.flags.read().await.permission;
            }
        };

        let previous = std::mem::replace(&mut self.flags.write().await.permission, current);
        if previous.is_granted() && !current.is_granted() {
            warn!("reminders: notification permission revoked ({:?}), clearing reminders", current);
            self.clear_all().await;
        }
        current
    }

    async fn schedule_reminder(self: &Arc<Self>, meeting: &Meeting, lead: LeadTime) -> Option<ReminderKey> {
        // Flags are read under the registry lock: a disable or revocation
        // clears the registry after flipping them, so it cannot miss this record.
        let mut registry = self.registry.lock().await;
        let (permission, enabled) = {
            let flags = self.flags.read().await;
            (flags.permission, flags.enabled)
        };
        if !permission.is_granted() {
            debug!("reminders: not scheduling {} ({:?})", meeting.id, permission);
            return None;
        }
        if !enabled {
            debug!("reminders: not scheduling {}, reminders disabled", meeting.id);
            return None;
        }

        let key = ReminderKey::new(meeting.id.clone(), lead);
        let Some(fire_at) = meeting.reminder_at(lead) else {
            warn!("reminders: {} has no representable fire time", key);
            return None;
        };
        let now = self.platform.clock.now();
        self.prune_delegated(&mut registry, now);
        if let Some(previous) = registry.remove(&key) {
            debug!("reminders: replacing {}", key);
            self.cancel_record(&key, previous);
        }

        let delay = match (fire_at - now).to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                debug!("reminders: {} lead time already passed", key);
                return None;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let delivery = if self.delegate(&key, meeting, lead, delay) {
            Delivery::DelegatedToWorker
        } else {
            Delivery::LocalTimer(self.arm_timer(key.clone(), generation, meeting.clone(), delay))
        };
        let delegated = matches!(delivery, Delivery::DelegatedToWorker);
        registry.insert(
            key.clone(),
            ReminderRecord {
                fire_at,
                generation,
                delivery,
            },
        );
        drop(registry);

        info!(
            "reminders: {} scheduled for {} ({}s, {})",
            key,
            fire_at.format("%Y-%m-%d %H:%M"),
            delay.as_secs(),
            if delegated { "worker" } else { "local timer" }
        );
        self.journal(file_logger::event_entry(
            "scheduled",
            Some(&key.to_string()),
            Some(serde_json::json!({ "delayMs": delay.as_millis() as u64, "delegated": delegated })),
        ))
        .await;
        Some(key)
    }

    async fn schedule_meeting_reminders(self: &Arc<Self>, meeting: &Meeting) -> Vec<ReminderKey> {
        let mut armed = Vec::with_capacity(LeadTime::ALL.len());
        for lead in LeadTime::ALL {
            if let Some(key) = self.schedule_reminder(meeting, lead).await {
                armed.push(key);
            }
        }
        armed
    }

    async fn reschedule_all(self: &Arc<Self>, meetings: &[Meeting]) {
        self.clear_all().await;
        let now = self.platform.clock.now();
        let mut armed = 0;
        let mut upcoming = 0;
        for meeting in meetings.iter().filter(|m| m.is_upcoming(now)) {
            upcoming += 1;
            armed += self.schedule_meeting_reminders(meeting).await.len();
        }
        info!(
            "reminders: rescheduled {} reminder(s) for {} upcoming of {} meeting(s)",
            armed,
            upcoming,
            meetings.len()
        );
    }

    /// Posts the reminder to the worker. False means use a local timer.
    fn delegate(&self, key: &ReminderKey, meeting: &Meeting, lead: LeadTime, delay: Duration) -> bool {
        let Some(worker) = &self.worker else {
            return false;
        };
        let message = WorkerMessage::ScheduleReminder {
            id: key.to_string(),
            meeting: meeting.clone(),
            lead_minutes: lead.minutes(),
            delay_ms: delay.as_millis() as u64,
        };
        match worker.post(message) {
            Ok(()) => true,
            Err(err) => {
                warn!("reminders: {} not delegated, falling back to local timer: {}", key, err);
                false
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, key: ReminderKey, generation: u64, meeting: Meeting, delay: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Leave the registry before delivering so a revocation-triggered
            // clear does not abort this task mid-cascade.
            inner.release(&key, generation).await;
            inner.deliver(&meeting, key.lead).await;
        })
    }

    async fn release(&self, key: &ReminderKey, generation: u64) {
        let mut registry = self.registry.lock().await;
        if registry.get(key).map_or(false, |record| record.generation == generation) {
            registry.remove(key);
        }
    }

    fn cancel_record(&self, key: &ReminderKey, record: ReminderRecord) {
        match record.delivery {
            Delivery::LocalTimer(handle) => handle.abort(),
            Delivery::DelegatedToWorker => {
                let Some(worker) = &self.worker else {
                    return;
                };
                if let Err(err) = worker.post(WorkerMessage::CancelReminder { id: key.to_string() }) {
                    warn!("reminders: cancel for {} not delivered to worker: {}", key, err);
                }
            }
        }
    }

    /// Delegated records never hear back from the worker; drop the ones
    /// whose fire time has passed.
    fn prune_delegated(&self, registry: &mut HashMap<ReminderKey, ReminderRecord>, now: NaiveDateTime) {
        registry.retain(|_, record| {
            !(matches!(record.delivery, Delivery::DelegatedToWorker) && record.fire_at <= now)
        });
    }

    async fn clear_reminder(&self, key: &ReminderKey) -> bool {
        let removed = self.registry.lock().await.remove(key);
        match removed {
            Some(record) => {
                self.cancel_record(key, record);
                debug!("reminders: {} cleared", key);
                true
            }
            None => false,
        }
    }

    async fn clear_all(&self) {
        let drained: Vec<(ReminderKey, ReminderRecord)> = self.registry.lock().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        for (key, record) in drained {
            self.cancel_record(&key, record);
        }
        info!("reminders: cleared {} reminder(s)", count);
    }

    async fn set_enabled(&self, enabled: bool) {
        self.flags.write().await.enabled = enabled;
        if let Err(err) = config::write_flag(self.platform.store.as_ref(), ENABLED_KEY, enabled).await {
            warn!("reminders: failed to persist reminder preference: {}", err);
        }
        if !enabled {
            self.clear_all().await;
        }
        info!("reminders: {}", if enabled { "enabled" } else { "disabled" });
    }

    async fn set_debug_mode(&self, debug_mode: bool) {
        self.flags.write().await.debug_mode = debug_mode;
        crate::set_debug_logging(debug_mode);
        if let Err(err) = config::write_flag(self.platform.store.as_ref(), DEBUG_KEY, debug_mode).await {
            warn!("reminders: failed to persist debug flag: {}", err);
        }
        info!("reminders: debug mode {}", if debug_mode { "on" } else { "off" });
    }

    async fn status(&self) -> ReminderStatus {
        let permission = self.refresh_permission().await;
        let (enabled, debug_mode) = {
            let flags = self.flags.read().await;
            (flags.enabled, flags.debug_mode)
        };
        let active_reminder_count = {
            let mut registry = self.registry.lock().await;
            self.prune_delegated(&mut registry, self.platform.clock.now());
            registry.len()
        };

        ReminderStatus {
            supported: self.supported,
            has_permission: permission.is_granted(),
            enabled,
            is_secure_context: self.secure_context,
            has_background_worker: self.worker.is_some(),
            debug_mode,
            active_reminder_count,
            initialization_error: self.initialization_error.clone(),
        }
    }

    async fn pending(&self) -> Vec<PendingReminder> {
        let mut registry = self.registry.lock().await;
        self.prune_delegated(&mut registry, self.platform.clock.now());
        let mut pending: Vec<PendingReminder> = registry
            .iter()
            .map(|(key, record)| PendingReminder {
                key: key.clone(),
                fire_at: record.fire_at,
                delegated: matches!(record.delivery, Delivery::DelegatedToWorker),
            })
            .collect();
        pending.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.key.cmp(&b.key)));
        pending
    }

    /// Native notification, then dialog, then in-page toast. Never fails.
    async fn deliver(&self, meeting: &Meeting, lead: LeadTime) -> DeliveryOutcome {
        let notice = ReminderNotice::for_meeting(meeting, lead);
        info!("reminder fired: {}", notice.summary());
        self.journal(file_logger::event_entry("fired", Some(&notice.tag), None)).await;

        if let Some(native) = self.platform.native.clone() {
            if self.refresh_permission().await.is_granted() {
                if self.attempt(native.as_ref(), &notice).await {
                    retract_after(native, &notice);
                    return DeliveryOutcome::Native;
                }
            } else {
                debug!("reminders: native tier skipped for {}, permission not granted", notice.tag);
            }
        }

        if let Some(dialog) = self.platform.dialog.clone() {
            if self.attempt(dialog.as_ref(), &notice).await {
                return DeliveryOutcome::Dialog;
            }
        }

        if self.attempt(&self.platform.overlay, &notice).await {
            return DeliveryOutcome::InPage;
        }

        warn!("reminders: {} could not be shown on any channel", notice.tag);
        DeliveryOutcome::LoggedOnly
    }

    async fn attempt(&self, channel: &dyn NotificationChannel, notice: &ReminderNotice) -> bool {
        let kind: ChannelKind = channel.kind();
        match channel.deliver(notice) {
            Ok(()) => {
                debug!("reminders: {} shown via {}", notice.tag, kind);
                self.journal(file_logger::delivery_entry(&notice.tag, kind, None)).await;
                true
            }
            Err(err) => {
                warn!("reminders: {} tier failed for {}: {}", kind, notice.tag, err);
                self.journal(file_logger::delivery_entry(&notice.tag, kind, Some(&err.to_string())))
                    .await;
                false
            }
        }
    }

    async fn journal(&self, entry: LogEntry) {
        if !self.flags.read().await.debug_mode {
            return;
        }
        let Some(journal) = &self.platform.journal else {
            return;
        };
        if let Err(err) = journal.append(entry).await {
            warn!("reminders: failed to write journal: {}", err);
        }
    }
}

fn retract_after(channel: Arc<dyn NotificationChannel>, notice: &ReminderNotice) {
    let tag = notice.tag.clone();
    let after = notice.auto_dismiss;
    tokio::spawn(async move {
        time::sleep(after).await;
        if let Err(err) = channel.retract(&tag) {
            debug!("reminders: {} could not be retracted: {}", tag, err);
        }
    });
}
