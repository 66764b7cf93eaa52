use std::fmt;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// How long a native notification stays up before it is closed automatically.
pub const NATIVE_AUTO_DISMISS: Duration = Duration::from_secs(30);

/// Snapshot of a meeting handed in by the meetings collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    /// `HH:MM` or `HH:MM:SS`, local wall-clock.
    #[serde(with = "wall_clock")]
    pub time: NaiveTime,
    #[serde(default)]
    pub location: String,
}

impl Meeting {
    /// Local wall-clock start. No timezone is attached.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    /// When the `lead` reminder is due. `None` when that instant is out of range.
    pub fn reminder_at(&self, lead: LeadTime) -> Option<NaiveDateTime> {
        self.starts_at().checked_sub_signed(lead.as_chrono())
    }

    /// Strictly in the future: a later date, or the same date with a later time.
    pub fn is_upcoming(&self, now: NaiveDateTime) -> bool {
        match self.date.cmp(&now.date()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.time > now.time(),
        }
    }

    fn location_is_link(&self) -> bool {
        let trimmed = self.location.trim();
        trimmed.starts_with("https://") || trimmed.starts_with("http://")
    }
}

/// The fixed set of lead times a meeting is reminded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum LeadTime {
    FiveMinutes,
    ThirtyMinutes,
    OneHour,
}

impl LeadTime {
    pub const ALL: [LeadTime; 3] = [LeadTime::FiveMinutes, LeadTime::ThirtyMinutes, LeadTime::OneHour];

    pub fn minutes(self) -> u32 {
        match self {
            LeadTime::FiveMinutes => 5,
            LeadTime::ThirtyMinutes => 30,
            LeadTime::OneHour => 60,
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        LeadTime::ALL.into_iter().find(|lead| lead.minutes() == minutes)
    }

    pub fn as_chrono(self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.minutes()))
    }

    fn describe(self) -> &'static str {
        match self {
            LeadTime::FiveMinutes => "5 minutes",
            LeadTime::ThirtyMinutes => "30 minutes",
            LeadTime::OneHour => "1 hour",
        }
    }
}

impl From<LeadTime> for u32 {
    fn from(lead: LeadTime) -> Self {
        lead.minutes()
    }
}

impl TryFrom<u32> for LeadTime {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        LeadTime::from_minutes(minutes).ok_or_else(|| format!("unsupported lead time: {minutes} min"))
    }
}

/// Identity of one outstanding reminder: a meeting and one of its lead times.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderKey {
    pub meeting_id: String,
    pub lead: LeadTime,
}

impl ReminderKey {
    pub fn new(meeting_id: impl Into<String>, lead: LeadTime) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            lead,
        }
    }
}

/// Wire form used as the worker timer id and the notification tag.
impl fmt::Display for ReminderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.meeting_id, self.lead.minutes())
    }
}

/// A rendered reminder, ready for any delivery channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderNotice {
    pub title: String,
    pub body: String,
    /// Dedup tag: the same meeting and lead time always produce the same tag.
    pub tag: String,
    pub meeting_id: String,
    pub route: String,
    #[serde(with = "duration_ms")]
    pub auto_dismiss: Duration,
}

impl ReminderNotice {
    pub fn for_meeting(meeting: &Meeting, lead: LeadTime) -> Self {
        let key = ReminderKey::new(meeting.id.clone(), lead);
        let mut body = format!("{}\nTime: {}", meeting.title, meeting.time.format("%H:%M"));
        let location = meeting.location.trim();
        if !location.is_empty() {
            let label = if meeting.location_is_link() { "Join" } else { "Location" };
            body.push_str(&format!("\n{label}: {location}"));
        }

        Self {
            title: format!("Meeting in {}", lead.describe()),
            body,
            tag: key.to_string(),
            meeting_id: meeting.id.clone(),
            route: format!("/meetings/{}", meeting.id),
            auto_dismiss: NATIVE_AUTO_DISMISS,
        }
    }

    /// Single-line text for dialogs and logs.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.title, self.body.replace('\n', " | "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionState {
    /// No notification primitive on this host.
    Unsupported,
    /// Never asked.
    Default,
    Denied,
    Granted,
}

impl PermissionState {
    pub fn is_granted(self) -> bool {
        self == PermissionState::Granted
    }
}

/// Capability and health snapshot rendered by the settings panel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderStatus {
    pub supported: bool,
    pub has_permission: bool,
    pub enabled: bool,
    pub is_secure_context: bool,
    pub has_background_worker: bool,
    pub debug_mode: bool,
    pub active_reminder_count: usize,
    pub initialization_error: Option<String>,
}

/// One-way messages posted to the background worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    #[serde(rename_all = "camelCase")]
    ScheduleReminder {
        id: String,
        meeting: Meeting,
        lead_minutes: u32,
        delay_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    CancelReminder { id: String },
}

impl WorkerMessage {
    pub fn id(&self) -> &str {
        match self {
            WorkerMessage::ScheduleReminder { id, .. } | WorkerMessage::CancelReminder { id } => id,
        }
    }
}

/// Reports a background worker sends back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    /// A delegated timer elapsed; the scheduler runs the delivery cascade.
    #[serde(rename_all = "camelCase")]
    ReminderFired {
        id: String,
        meeting: Meeting,
        lead_minutes: u32,
    },
}

mod wall_clock {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
            .map_err(|err| de::Error::custom(format!("invalid meeting time '{raw}': {err}")))
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meeting(location: &str) -> Meeting {
        Meeting {
            id: "m-1".into(),
            title: "Budget review".into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            location: location.into(),
        }
    }

    fn at(date: (i32, u32, u32), hm: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(hm.0, hm.1, 0)
            .unwrap()
    }

    #[test]
    fn upcoming_compares_date_then_time() {
        let m = meeting("");
        assert!(m.is_upcoming(at((2025, 5, 31), (23, 59))));
        assert!(m.is_upcoming(at((2025, 6, 1), (13, 59))));
        assert!(!m.is_upcoming(at((2025, 6, 1), (14, 0))));
        assert!(!m.is_upcoming(at((2025, 6, 2), (9, 0))));
    }

    #[test]
    fn reminder_time_at_the_edge_of_the_calendar_is_none() {
        let mut m = meeting("");
        assert_eq!(m.reminder_at(LeadTime::OneHour), Some(at((2025, 6, 1), (13, 0))));

        m.date = NaiveDate::MIN;
        m.time = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert_eq!(m.reminder_at(LeadTime::FiveMinutes), None);
    }

    #[test]
    fn worker_event_wire_shape() {
        let event = WorkerEvent::ReminderFired {
            id: "m-1-5".into(),
            meeting: meeting(""),
            lead_minutes: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "REMINDER_FIRED");
        assert_eq!(json["leadMinutes"], 5);
        assert_eq!(json["meeting"]["time"], "14:00");
    }

    #[test]
    fn key_display_is_meeting_and_minutes() {
        let key = ReminderKey::new("abc-5", LeadTime::ThirtyMinutes);
        assert_eq!(key.to_string(), "abc-5-30");
        // Structured identity keeps ids that look alike apart.
        assert_ne!(ReminderKey::new("abc", LeadTime::FiveMinutes), ReminderKey::new("abc-5", LeadTime::FiveMinutes));
    }

    #[test]
    fn notice_wording_follows_lead_and_location() {
        let notice = ReminderNotice::for_meeting(&meeting("Room 4"), LeadTime::OneHour);
        assert_eq!(notice.title, "Meeting in 1 hour");
        assert_eq!(notice.body, "Budget review\nTime: 14:00\nLocation: Room 4");
        assert_eq!(notice.tag, "m-1-60");
        assert_eq!(notice.route, "/meetings/m-1");
        assert_eq!(notice.auto_dismiss, NATIVE_AUTO_DISMISS);

        let online = ReminderNotice::for_meeting(&meeting("https://meet.example.com/x"), LeadTime::FiveMinutes);
        assert_eq!(online.title, "Meeting in 5 minutes");
        assert!(online.body.ends_with("Join: https://meet.example.com/x"));

        let nowhere = ReminderNotice::for_meeting(&meeting("  "), LeadTime::ThirtyMinutes);
        assert_eq!(nowhere.body, "Budget review\nTime: 14:00");
    }

    #[test]
    fn lead_time_rejects_unknown_minutes() {
        assert_eq!(LeadTime::from_minutes(30), Some(LeadTime::ThirtyMinutes));
        assert!(LeadTime::try_from(15).is_err());
        let parsed: LeadTime = serde_json::from_str("60").unwrap();
        assert_eq!(parsed, LeadTime::OneHour);
    }

    #[test]
    fn worker_message_wire_shape() {
        let msg = WorkerMessage::CancelReminder { id: "m-1-5".into() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "CANCEL_REMINDER", "id": "m-1-5" }));
        assert_eq!(msg.id(), "m-1-5");
    }

    #[test]
    fn meeting_accepts_camel_case_json() {
        let raw = r#"{"id":"m-9","title":"Standup","date":"2025-06-01","time":"09:30"}"#;
        let parsed: Meeting = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.location, "");
        assert_eq!(parsed.starts_at(), at((2025, 6, 1), (9, 30)));

        let with_seconds = raw.replace("09:30", "09:30:00");
        assert_eq!(serde_json::from_str::<Meeting>(&with_seconds).unwrap(), parsed);
        assert!(serde_json::from_str::<Meeting>(&raw.replace("09:30", "9h30")).is_err());
    }
}
