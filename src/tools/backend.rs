//! External collaborator seams: calendar store and user directory.
//!
//! The runtime only touches calendars and user records through these
//! traits. In-memory implementations ship for tests and single-process
//! use; production backends live outside this crate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValetError};

/// Start or end of an event: timed (RFC 3339) or all-day.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    pub fn timed(date_time: impl Into<String>) -> Self {
        Self {
            date_time: Some(date_time.into()),
            date: None,
            time_zone: None,
        }
    }

    pub fn all_day(date: impl Into<String>) -> Self {
        Self {
            date_time: None,
            date: Some(date.into()),
            time_zone: None,
        }
    }

    pub fn is_timed(&self) -> bool {
        self.date_time.is_some()
    }
}

/// A calendar event as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub calendar_id: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(default)]
    pub attendees: Vec<String>,
}

/// Partial update applied to an existing event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
}

/// A calendar visible to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarInfo {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub primary: bool,
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registered { user_id: String },
    NeedsAuth { auth_url: String },
}

/// Calendar read/write operations.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    async fn list_calendars(&self, user_id: &str) -> Result<Vec<CalendarInfo>>;

    async fn list_events(
        &self,
        user_id: &str,
        calendar_id: &str,
        time_min: &str,
        time_max: &str,
    ) -> Result<Vec<CalendarEvent>>;

    async fn insert_event(
        &self,
        user_id: &str,
        calendar_id: &str,
        event: CalendarEvent,
    ) -> Result<CalendarEvent>;

    async fn update_event(
        &self,
        user_id: &str,
        calendar_id: &str,
        event_id: &str,
        patch: EventPatch,
    ) -> Result<CalendarEvent>;

    async fn delete_event(&self, user_id: &str, calendar_id: &str, event_id: &str) -> Result<()>;
}

/// User identity and registration operations.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup_user(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn register_user(&self, email: &str) -> Result<RegistrationStatus>;

    async fn timezone_for(&self, user_id: &str) -> Result<Option<String>>;
}

/// Bundle of external collaborators handed to the runtime.
#[derive(Clone)]
pub struct Services {
    pub calendar: Arc<dyn CalendarBackend>,
    pub users: Arc<dyn UserDirectory>,
}

impl Services {
    pub fn new(calendar: Arc<dyn CalendarBackend>, users: Arc<dyn UserDirectory>) -> Self {
        Self { calendar, users }
    }

    /// Fully in-memory services, suitable for tests.
    pub fn in_memory() -> Self {
        Self {
            calendar: Arc::new(MemoryCalendar::new()),
            users: Arc::new(MemoryDirectory::new()),
        }
    }
}

/// In-memory calendar keyed by (user, calendar).
#[derive(Default)]
pub struct MemoryCalendar {
    inner: RwLock<HashMap<String, Vec<CalendarEvent>>>,
    calendars: RwLock<HashMap<String, Vec<CalendarInfo>>>,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, calendar_id: &str) -> String {
        format!("{user_id}/{calendar_id}")
    }

    /// Seed a calendar for a user. The first seeded calendar is primary.
    pub fn add_calendar(&self, user_id: &str, calendar_id: &str, summary: &str) {
        let mut cals = self.calendars.write().unwrap_or_else(|e| e.into_inner());
        let entry = cals.entry(user_id.to_string()).or_default();
        let primary = entry.is_empty();
        entry.push(CalendarInfo {
            id: calendar_id.to_string(),
            summary: summary.to_string(),
            primary,
        });
    }

    pub fn seed_event(&self, user_id: &str, event: CalendarEvent) {
        let key = Self::key(user_id, &event.calendar_id);
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .push(event);
    }
}

#[async_trait]
impl CalendarBackend for MemoryCalendar {
    async fn list_calendars(&self, user_id: &str) -> Result<Vec<CalendarInfo>> {
        Ok(self
            .calendars
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| {
                vec![CalendarInfo {
                    id: "primary".to_string(),
                    summary: "Primary".to_string(),
                    primary: true,
                }]
            }))
    }

    async fn list_events(
        &self,
        user_id: &str,
        calendar_id: &str,
        time_min: &str,
        time_max: &str,
    ) -> Result<Vec<CalendarEvent>> {
        let key = Self::key(user_id, calendar_id);
        let events = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .unwrap_or_default();
        Ok(events
            .into_iter()
            .filter(|ev| {
                let start = ev.start.date_time.as_deref().or(ev.start.date.as_deref());
                match start {
                    Some(s) => s >= time_min && s < time_max,
                    None => false,
                }
            })
            .collect())
    }

    async fn insert_event(
        &self,
        user_id: &str,
        calendar_id: &str,
        mut event: CalendarEvent,
    ) -> Result<CalendarEvent> {
        if event.id.is_empty() {
            event.id = uuid::Uuid::new_v4().to_string();
        }
        event.calendar_id = calendar_id.to_string();
        self.seed_event(user_id, event.clone());
        Ok(event)
    }

    async fn update_event(
        &self,
        user_id: &str,
        calendar_id: &str,
        event_id: &str,
        patch: EventPatch,
    ) -> Result<CalendarEvent> {
        let key = Self::key(user_id, calendar_id);
        let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let events = store
            .get_mut(&key)
            .ok_or_else(|| ValetError::InvalidArgument(format!("No such calendar: {calendar_id}")))?;
        let event = events
            .iter_mut()
            .find(|ev| ev.id == event_id)
            .ok_or_else(|| ValetError::InvalidArgument(format!("No such event: {event_id}")))?;
        if let Some(summary) = patch.summary {
            event.summary = summary;
        }
        if let Some(description) = patch.description {
            event.description = Some(description);
        }
        if let Some(location) = patch.location {
            event.location = Some(location);
        }
        if let Some(start) = patch.start {
            event.start = start;
        }
        if let Some(end) = patch.end {
            event.end = end;
        }
        Ok(event.clone())
    }

    async fn delete_event(&self, user_id: &str, calendar_id: &str, event_id: &str) -> Result<()> {
        let key = Self::key(user_id, calendar_id);
        let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let events = store
            .get_mut(&key)
            .ok_or_else(|| ValetError::InvalidArgument(format!("No such calendar: {calendar_id}")))?;
        let before = events.len();
        events.retain(|ev| ev.id != event_id);
        if events.len() == before {
            return Err(ValetError::InvalidArgument(format!(
                "No such event: {event_id}"
            )));
        }
        Ok(())
    }
}

/// In-memory user directory.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
    /// When set, registration reports this consent URL instead of
    /// completing, mimicking a user who has not granted calendar scope.
    pending_auth_url: RwLock<Option<String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, record: UserRecord) {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.email.clone(), record);
    }

    pub fn require_auth(&self, url: impl Into<String>) {
        *self
            .pending_auth_url
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(url.into());
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn lookup_user(&self, email: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(email)
            .cloned())
    }

    async fn register_user(&self, email: &str) -> Result<RegistrationStatus> {
        if let Some(url) = self
            .pending_auth_url
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Ok(RegistrationStatus::NeedsAuth { auth_url: url });
        }
        let record = UserRecord {
            user_id: format!("user-{}", uuid::Uuid::new_v4()),
            email: email.to_string(),
            timezone: None,
        };
        self.add_user(record.clone());
        Ok(RegistrationStatus::Registered {
            user_id: record.user_id,
        })
    }

    async fn timezone_for(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|u| u.user_id == user_id)
            .and_then(|u| u.timezone.clone()))
    }
}
