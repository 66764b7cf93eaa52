#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::mpsc;

use meeting_reminders::error::Result;
use meeting_reminders::{
    BackgroundWorker, ChannelKind, Environment, FixedClock, MemoryStore, Meeting, NotificationChannel,
    PermissionPrompt, PermissionState, Platform, PreferenceStore, ReminderError, ReminderNotice,
    ReminderScheduler, WorkerEvent, WorkerMessage, WorkerRegistrar,
};

pub const CHROME_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

pub fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(hh, mm, 0).unwrap()
}

pub fn meeting(id: &str, starts: NaiveDateTime) -> Meeting {
    Meeting {
        id: id.to_string(),
        title: format!("Meeting {id}"),
        date: starts.date(),
        time: starts.time(),
        location: "Room 1".to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PromptBehavior {
    Grant,
    Deny,
    Hang,
    Fail,
}

/// Permission source whose state tests flip directly.
pub struct ScriptedPermissions {
    state: Mutex<PermissionState>,
    behavior: PromptBehavior,
    fail_current: AtomicBool,
    pub requests: AtomicUsize,
}

impl ScriptedPermissions {
    pub fn new(state: PermissionState, behavior: PromptBehavior) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            behavior,
            fail_current: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, state: PermissionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn fail_queries(&self) {
        self.fail_current.store(true, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionPrompt for ScriptedPermissions {
    fn current(&self) -> Result<PermissionState> {
        if self.fail_current.load(Ordering::SeqCst) {
            return Err(ReminderError::Permission("query blew up".into()));
        }
        Ok(*self.state.lock().unwrap())
    }

    async fn request(&self) -> Result<PermissionState> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            PromptBehavior::Grant => {
                self.set(PermissionState::Granted);
                Ok(PermissionState::Granted)
            }
            PromptBehavior::Deny => {
                self.set(PermissionState::Denied);
                Ok(PermissionState::Denied)
            }
            PromptBehavior::Hang => std::future::pending().await,
            PromptBehavior::Fail => Err(ReminderError::Permission("prompt rejected".into())),
        }
    }
}

/// Channel that records every notice and can be told to fail.
pub struct RecordingChannel {
    kind: ChannelKind,
    failing: AtomicBool,
    delivered: Mutex<Vec<ReminderNotice>>,
    retracted: Mutex<Vec<String>>,
    tx: mpsc::UnboundedSender<(ChannelKind, ReminderNotice)>,
}

impl RecordingChannel {
    pub fn new(kind: ChannelKind, tx: mpsc::UnboundedSender<(ChannelKind, ReminderNotice)>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            failing: AtomicBool::new(false),
            delivered: Mutex::new(Vec::new()),
            retracted: Mutex::new(Vec::new()),
            tx,
        })
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<ReminderNotice> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn retracted(&self) -> Vec<String> {
        self.retracted.lock().unwrap().clone()
    }
}

impl NotificationChannel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn deliver(&self, notice: &ReminderNotice) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReminderError::delivery(self.kind, "forced failure"));
        }
        self.delivered.lock().unwrap().push(notice.clone());
        let _ = self.tx.send((self.kind, notice.clone()));
        Ok(())
    }

    fn retract(&self, tag: &str) -> Result<()> {
        self.retracted.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

/// Worker that only records what it is told. It reports back only when a
/// test calls [`RecordingWorker::report`].
#[derive(Default)]
pub struct RecordingWorker {
    pub messages: Mutex<Vec<WorkerMessage>>,
    unreachable: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<WorkerEvent>>>,
}

impl RecordingWorker {
    pub fn report(&self, event: WorkerEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn go_away(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<WorkerMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl BackgroundWorker for RecordingWorker {
    fn post(&self, message: WorkerMessage) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ReminderError::WorkerUnreachable);
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

pub struct StaticRegistrar(pub Arc<RecordingWorker>);

#[async_trait]
impl WorkerRegistrar for StaticRegistrar {
    async fn register(
        &self,
        _path: &str,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Arc<dyn BackgroundWorker>> {
        *self.0.events.lock().unwrap() = Some(events);
        Ok(self.0.clone())
    }
}

pub struct FailingRegistrar;

#[async_trait]
impl WorkerRegistrar for FailingRegistrar {
    async fn register(
        &self,
        path: &str,
        _events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Arc<dyn BackgroundWorker>> {
        Err(ReminderError::Registration(format!("{path} not found")))
    }
}

pub struct BrokenStore;

#[async_trait]
impl PreferenceStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(ReminderError::Store("storage disabled".into()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(ReminderError::Store("storage disabled".into()))
    }
}

/// A scheduler wired to recording doubles.
pub struct Harness {
    pub scheduler: ReminderScheduler,
    pub clock: FixedClock,
    pub permissions: Arc<ScriptedPermissions>,
    pub native: Arc<RecordingChannel>,
    pub dialog: Arc<RecordingChannel>,
    pub store: Arc<MemoryStore>,
    pub deliveries: mpsc::UnboundedReceiver<(ChannelKind, ReminderNotice)>,
}

pub struct HarnessBuilder {
    now: NaiveDateTime,
    permission: PermissionState,
    behavior: PromptBehavior,
    store: Arc<MemoryStore>,
    worker: Option<Arc<dyn WorkerRegistrar>>,
    environment: Environment,
}

impl HarnessBuilder {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            permission: PermissionState::Granted,
            behavior: PromptBehavior::Grant,
            store: Arc::new(MemoryStore::new()),
            worker: None,
            environment: Environment::interactive("https://dashboard.example.com").with_user_agent(CHROME_UA),
        }
    }

    pub fn permission(mut self, state: PermissionState, behavior: PromptBehavior) -> Self {
        self.permission = state;
        self.behavior = behavior;
        self
    }

    pub fn store(mut self, store: MemoryStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn worker(mut self, registrar: Arc<dyn WorkerRegistrar>) -> Self {
        self.worker = Some(registrar);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub async fn build(self) -> Harness {
        let (tx, deliveries) = mpsc::unbounded_channel();
        let clock = FixedClock::new(self.now);
        let permissions = ScriptedPermissions::new(self.permission, self.behavior);
        let native = RecordingChannel::new(ChannelKind::Native, tx.clone());
        let dialog = RecordingChannel::new(ChannelKind::Dialog, tx);

        let mut platform = Platform::new(self.environment, self.store.clone())
            .with_native(permissions.clone(), native.clone())
            .with_dialog(dialog.clone())
            .with_clock(Arc::new(clock.clone()));
        if let Some(registrar) = self.worker {
            platform = platform.with_worker(registrar);
        }

        Harness {
            scheduler: ReminderScheduler::new(platform).await,
            clock,
            permissions,
            native,
            dialog,
            store: self.store,
            deliveries,
        }
    }
}
