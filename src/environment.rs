use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDateTime};
use log::warn;
use serde::{Deserialize, Serialize};
use url::Url;

/// What the scheduler knows about the context it runs in.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// False for server-side or headless execution; the scheduler goes inert.
    pub interactive: bool,
    /// Origin the UI is served from, e.g. `https://app.example.com`.
    pub origin: Option<String>,
    pub user_agent: Option<String>,
}

impl Environment {
    pub fn interactive(origin: impl Into<String>) -> Self {
        Self {
            interactive: true,
            origin: Some(origin.into()),
            user_agent: None,
        }
    }

    pub fn headless() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// HTTPS (or an app-bundled scheme), or a loopback host over plain HTTP.
    pub fn is_secure_context(&self) -> bool {
        let Some(origin) = self.origin.as_deref() else {
            return false;
        };
        let parsed = match Url::parse(origin) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("environment: unparsable origin '{}': {}", origin, err);
                return false;
            }
        };
        match parsed.scheme() {
            "https" | "tauri" | "file" => true,
            _ => matches!(
                parsed.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1")
            ),
        }
    }

    pub fn browser_family(&self) -> BrowserFamily {
        self.user_agent
            .as_deref()
            .map(BrowserFamily::detect)
            .unwrap_or(BrowserFamily::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Other,
}

impl BrowserFamily {
    pub fn detect(user_agent: &str) -> Self {
        // Edge and Chrome both advertise "Chrome/", Chrome and Safari both "Safari/".
        if user_agent.contains("Edg/") || user_agent.contains("Edge/") {
            BrowserFamily::Edge
        } else if user_agent.contains("Firefox/") || user_agent.contains("FxiOS") {
            BrowserFamily::Firefox
        } else if user_agent.contains("Chrome/") || user_agent.contains("CriOS") {
            BrowserFamily::Chrome
        } else if user_agent.contains("Safari/") {
            BrowserFamily::Safari
        } else {
            BrowserFamily::Other
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BrowserFamily::Chrome => "Chrome",
            BrowserFamily::Firefox => "Firefox",
            BrowserFamily::Safari => "Safari",
            BrowserFamily::Edge => "Edge",
            BrowserFamily::Other => "your browser",
        }
    }

    /// Literal steps for turning notifications back on.
    pub fn reenable_steps(self) -> &'static [&'static str] {
        match self {
            BrowserFamily::Chrome => &[
                "Click the lock icon to the left of the address bar",
                "Open \"Site settings\"",
                "Set \"Notifications\" to \"Allow\"",
                "Reload this page",
            ],
            BrowserFamily::Firefox => &[
                "Click the lock icon to the left of the address bar",
                "Next to \"Send Notifications\", clear the \"Blocked\" permission",
                "Reload this page and allow notifications when asked",
            ],
            BrowserFamily::Safari => &[
                "Open Safari > Settings > Websites",
                "Select \"Notifications\" in the sidebar",
                "Find this website and choose \"Allow\"",
                "Reload this page",
            ],
            BrowserFamily::Edge => &[
                "Click the lock icon to the left of the address bar",
                "Open \"Permissions for this site\"",
                "Set \"Notifications\" to \"Allow\"",
                "Reload this page",
            ],
            BrowserFamily::Other => &[
                "Open your browser's site settings for this page",
                "Allow notifications",
                "Reload this page",
            ],
        }
    }
}

/// Local wall-clock source for delay computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
    const EDGE_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0";
    const SAFARI_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15";
    const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0";

    #[test]
    fn detects_browser_families() {
        assert_eq!(BrowserFamily::detect(CHROME_UA), BrowserFamily::Chrome);
        assert_eq!(BrowserFamily::detect(EDGE_UA), BrowserFamily::Edge);
        assert_eq!(BrowserFamily::detect(SAFARI_UA), BrowserFamily::Safari);
        assert_eq!(BrowserFamily::detect(FIREFOX_UA), BrowserFamily::Firefox);
        assert_eq!(BrowserFamily::detect("curl/8.0"), BrowserFamily::Other);
        assert_eq!(Environment::interactive("https://x.test").browser_family(), BrowserFamily::Other);
    }

    #[test]
    fn every_family_has_steps() {
        for family in [
            BrowserFamily::Chrome,
            BrowserFamily::Firefox,
            BrowserFamily::Safari,
            BrowserFamily::Edge,
            BrowserFamily::Other,
        ] {
            assert!(!family.reenable_steps().is_empty(), "{family:?}");
        }
    }

    #[test]
    fn secure_context_rules() {
        assert!(Environment::interactive("https://app.example.com").is_secure_context());
        assert!(Environment::interactive("http://localhost:3000").is_secure_context());
        assert!(Environment::interactive("http://127.0.0.1:8080").is_secure_context());
        assert!(Environment::interactive("tauri://localhost").is_secure_context());
        assert!(!Environment::interactive("http://intranet.office").is_secure_context());
        assert!(!Environment::interactive("not a url").is_secure_context());
        assert!(!Environment::headless().is_secure_context());
    }

    #[test]
    fn fixed_clock_moves_only_on_request() {
        let start = chrono::NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }
}
