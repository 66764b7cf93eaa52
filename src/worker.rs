//! Background delivery worker.
//!
//! The scheduler hands reminders to the worker with one-way messages; the
//! worker keeps its own timers, keyed by the reminder's wire id, and reports
//! each elapsed timer back as a [`WorkerEvent`]. Showing the reminder stays
//! with the scheduler's delivery cascade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ReminderError, Result};
use crate::models::{WorkerEvent, WorkerMessage};

/// Resource path the worker is registered under.
pub const REMINDER_WORKER_PATH: &str = "/reminder-worker.js";

pub trait BackgroundWorker: Send + Sync {
    /// Fire-and-forget. An error means the worker cannot be reached.
    fn post(&self, message: WorkerMessage) -> Result<()>;
}

#[async_trait]
pub trait WorkerRegistrar: Send + Sync {
    /// `events` is where the worker reports fired reminders.
    async fn register(
        &self,
        path: &str,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Arc<dyn BackgroundWorker>>;
}

/// Worker running as a tokio task next to the scheduler.
pub struct TokioWorker {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    task: JoinHandle<()>,
}

impl TokioWorker {
    pub fn spawn(events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run(rx, events));
        Self { tx, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished() && !self.tx.is_closed()
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    async fn run(mut rx: mpsc::UnboundedReceiver<WorkerMessage>, events: mpsc::UnboundedSender<WorkerEvent>) {
        info!("reminder worker started");
        let mut timers: HashMap<String, JoinHandle<()>> = HashMap::new();

        while let Some(message) = rx.recv().await {
            timers.retain(|_, timer| !timer.is_finished());

            match message {
                WorkerMessage::ScheduleReminder {
                    id,
                    meeting,
                    lead_minutes,
                    delay_ms,
                } => {
                    if let Some(previous) = timers.remove(&id) {
                        previous.abort();
                    }
                    debug!("worker: {} armed, fires in {} ms", id, delay_ms);
                    let events = events.clone();
                    let timer_id = id.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        info!("worker: reminder {} fired", timer_id);
                        let fired = WorkerEvent::ReminderFired {
                            id: timer_id.clone(),
                            meeting,
                            lead_minutes,
                        };
                        if events.send(fired).is_err() {
                            warn!("worker: reminder {} fired but the scheduler is gone", timer_id);
                        }
                    });
                    timers.insert(id, timer);
                }
                WorkerMessage::CancelReminder { id } => match timers.remove(&id) {
                    Some(timer) => {
                        timer.abort();
                        debug!("worker: {} cancelled", id);
                    }
                    None => debug!("worker: cancel for unknown {}", id),
                },
            }
        }

        for (_, timer) in timers.drain() {
            timer.abort();
        }
        info!("reminder worker stopped");
    }
}

impl BackgroundWorker for TokioWorker {
    fn post(&self, message: WorkerMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| ReminderError::WorkerUnreachable)
    }
}

impl Drop for TokioWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Registers a [`TokioWorker`] on the current runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioWorkerRegistrar;

impl TokioWorkerRegistrar {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerRegistrar for TokioWorkerRegistrar {
    async fn register(
        &self,
        path: &str,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Arc<dyn BackgroundWorker>> {
        info!("registering reminder worker at {}", path);
        Ok(Arc::new(TokioWorker::spawn(events)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;
    use crate::models::Meeting;

    fn schedule(id: &str, delay_ms: u64) -> WorkerMessage {
        WorkerMessage::ScheduleReminder {
            id: id.to_string(),
            meeting: Meeting {
                id: "m-1".into(),
                title: "Planning".into(),
                date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                location: String::new(),
            },
            lead_minutes: 5,
            delay_ms,
        }
    }

    fn fired_ids(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(WorkerEvent::ReminderFired { id, .. }) = rx.try_recv() {
            ids.push(id);
        }
        ids
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_and_cancels_by_id() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let worker = TokioWorker::spawn(events);

        worker.post(schedule("m-1-5", 1_000)).unwrap();
        worker.post(schedule("m-2-5", 1_000)).unwrap();
        settle().await;
        worker.post(WorkerMessage::CancelReminder { id: "m-2-5".into() }).unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        settle().await;
        assert_eq!(fired_ids(&mut rx), vec!["m-1-5".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_same_id_replaces_timer() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let worker = TokioWorker::spawn(events);

        worker.post(schedule("m-1-5", 1_000)).unwrap();
        worker.post(schedule("m-1-5", 5_000)).unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        settle().await;
        assert!(fired_ids(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(4_000)).await;
        settle().await;
        assert_eq!(fired_ids(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn stopped_worker_is_unreachable() {
        let (events, _rx) = mpsc::unbounded_channel();
        let worker = TokioWorker::spawn(events);
        assert!(worker.is_running());
        worker.stop();
        settle().await;
        assert!(matches!(
            worker.post(WorkerMessage::CancelReminder { id: "x".into() }),
            Err(ReminderError::WorkerUnreachable)
        ));
    }
}
