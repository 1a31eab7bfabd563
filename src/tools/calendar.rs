//! Calendar leaf tools: CRUD, conflict checks, and pre-create validation.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, ValetError};

use super::backend::{CalendarEvent, EventPatch, EventTime, Services};
use super::registry::{Handler, ToolRegistry, ToolSpec};
use super::types::{ToolContext, ToolParameters};

/// Hard cap on events returned across all calendars in one lookup.
pub const MAX_EVENTS_TOTAL: usize = 100;
/// Per-calendar cap applied before the total cap.
pub const MAX_EVENTS_PER_CALENDAR: usize = 50;
/// Default duration when an event is created without an end.
pub const DEFAULT_EVENT_MINUTES: i64 = 30;

const FALLBACK_TIMEZONE: &str = "UTC";

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn arg_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}

fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            ValetError::InvalidArgument(format!("{field} must be an RFC 3339 datetime: {value}"))
        })
}

/// Default lookup window: start of today until this time tomorrow.
fn default_window() -> (String, String) {
    let now = Utc::now();
    let start_of_today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(now);
    (
        start_of_today.to_rfc3339(),
        (now + Duration::days(1)).to_rfc3339(),
    )
}

/// Trimmed event shape handed to the model; full backend payloads are
/// too large for transcripts.
fn slim_event(event: &CalendarEvent) -> Value {
    json!({
        "id": event.id,
        "calendar_id": event.calendar_id,
        "summary": event.summary,
        "start": event.start,
        "end": event.end,
        "location": event.location,
    })
}

async fn resolve_timezone(services: &Services, ctx: &ToolContext) -> String {
    if let Some(ref tz) = ctx.timezone {
        return tz.clone();
    }
    match services.users.timezone_for(&ctx.user_id).await {
        Ok(Some(tz)) => tz,
        _ => FALLBACK_TIMEZONE.to_string(),
    }
}

/// Fill in the user's timezone on timed boundaries that lack one.
fn apply_default_timezone(time: &mut EventTime, timezone: &str) {
    if time.is_timed() && time.time_zone.is_none() {
        time.time_zone = Some(timezone.to_string());
    }
}

pub(super) async fn get_event(services: Services, args: Value, ctx: ToolContext) -> Result<Value> {
    let (default_min, default_max) = default_window();
    let time_min = arg_str(&args, "time_min").unwrap_or(default_min);
    let time_max = arg_str(&args, "time_max").unwrap_or(default_max);
    let query = arg_str(&args, "query").map(|q| q.to_lowercase());
    let event_id = arg_str(&args, "event_id");
    let search_all = arg_bool(&args, "search_all_calendars").unwrap_or(true);

    let calendar_ids: Vec<String> = if let Some(id) = arg_str(&args, "calendar_id") {
        vec![id]
    } else if search_all {
        services
            .calendar
            .list_calendars(&ctx.user_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect()
    } else {
        vec!["primary".to_string()]
    };

    let mut events = Vec::new();
    let mut truncated = false;

    'calendars: for calendar_id in &calendar_ids {
        let mut found = services
            .calendar
            .list_events(&ctx.user_id, calendar_id, &time_min, &time_max)
            .await?;
        if found.len() > MAX_EVENTS_PER_CALENDAR {
            found.truncate(MAX_EVENTS_PER_CALENDAR);
            truncated = true;
        }
        for event in &found {
            if let Some(ref id) = event_id {
                if &event.id != id {
                    continue;
                }
            }
            if let Some(ref q) = query {
                if !event.summary.to_lowercase().contains(q) {
                    continue;
                }
            }
            if events.len() >= MAX_EVENTS_TOTAL {
                truncated = true;
                break 'calendars;
            }
            events.push(slim_event(event));
        }
    }

    debug!(
        count = events.len(),
        truncated, "calendar lookup complete"
    );

    Ok(json!({
        "events": events,
        "count": events.len(),
        "truncated": truncated,
    }))
}

pub(super) async fn insert_event(
    services: Services,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let summary = arg_str(&args, "summary")
        .ok_or_else(|| ValetError::InvalidArgument("Missing required field: summary".into()))?;
    let start_raw = arg_str(&args, "start")
        .ok_or_else(|| ValetError::InvalidArgument("Missing required field: start".into()))?;
    let start_dt = parse_rfc3339("start", &start_raw)?;

    let end_raw = match arg_str(&args, "end") {
        Some(end) => {
            parse_rfc3339("end", &end)?;
            end
        }
        None => (start_dt + Duration::minutes(DEFAULT_EVENT_MINUTES)).to_rfc3339(),
    };

    let calendar_id = arg_str(&args, "calendar_id").unwrap_or_else(|| "primary".to_string());
    let timezone = match arg_str(&args, "timezone") {
        Some(tz) => tz,
        None => resolve_timezone(&services, &ctx).await,
    };

    let mut start = EventTime::timed(start_raw);
    let mut end = EventTime::timed(end_raw);
    apply_default_timezone(&mut start, &timezone);
    apply_default_timezone(&mut end, &timezone);

    let event = CalendarEvent {
        id: String::new(),
        calendar_id: calendar_id.clone(),
        summary,
        description: arg_str(&args, "description"),
        location: arg_str(&args, "location"),
        start,
        end,
        attendees: Vec::new(),
    };

    let created = services
        .calendar
        .insert_event(&ctx.user_id, &calendar_id, event)
        .await?;

    Ok(json!({ "created": slim_event(&created) }))
}

pub(super) async fn update_event(
    services: Services,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let event_id = arg_str(&args, "event_id")
        .ok_or_else(|| ValetError::InvalidArgument("event_id is required".into()))?;
    let calendar_id = arg_str(&args, "calendar_id").unwrap_or_else(|| "primary".to_string());

    let start = match arg_str(&args, "start") {
        Some(s) => {
            parse_rfc3339("start", &s)?;
            Some(EventTime::timed(s))
        }
        None => None,
    };
    let end = match arg_str(&args, "end") {
        Some(s) => {
            parse_rfc3339("end", &s)?;
            Some(EventTime::timed(s))
        }
        None => None,
    };

    let patch = EventPatch {
        summary: arg_str(&args, "summary"),
        description: arg_str(&args, "description"),
        location: arg_str(&args, "location"),
        start,
        end,
    };

    let updated = services
        .calendar
        .update_event(&ctx.user_id, &calendar_id, &event_id, patch)
        .await?;

    Ok(json!({ "updated": slim_event(&updated) }))
}

pub(super) async fn delete_event(
    services: Services,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let event_id = arg_str(&args, "event_id")
        .ok_or_else(|| ValetError::InvalidArgument("event_id is required".into()))?;
    let calendar_id = arg_str(&args, "calendar_id").unwrap_or_else(|| "primary".to_string());

    services
        .calendar
        .delete_event(&ctx.user_id, &calendar_id, &event_id)
        .await?;

    Ok(json!({ "deleted": true, "event_id": event_id }))
}

pub(super) async fn check_conflicts(
    services: Services,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let start_raw = arg_str(&args, "start")
        .ok_or_else(|| ValetError::InvalidArgument("start is required".into()))?;
    let end_raw = arg_str(&args, "end")
        .ok_or_else(|| ValetError::InvalidArgument("end is required".into()))?;
    let start = parse_rfc3339("start", &start_raw)?;
    let end = parse_rfc3339("end", &end_raw)?;
    let calendar_id = arg_str(&args, "calendar_id").unwrap_or_else(|| "primary".to_string());

    // Widen the fetch window by a day each side so events spanning the
    // boundary are still compared.
    let window_min = (start - Duration::days(1)).to_rfc3339();
    let window_max = (end + Duration::days(1)).to_rfc3339();

    let events = services
        .calendar
        .list_events(&ctx.user_id, &calendar_id, &window_min, &window_max)
        .await?;

    let conflicts: Vec<Value> = events
        .iter()
        .filter(|ev| {
            let ev_start = ev
                .start
                .date_time
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let ev_end = ev
                .end
                .date_time
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            match (ev_start, ev_end) {
                (Some(s), Some(e)) => s < end && e > start,
                _ => false,
            }
        })
        .map(slim_event)
        .collect();

    Ok(json!({
        "has_conflicts": !conflicts.is_empty(),
        "conflicts": conflicts,
    }))
}

pub(super) async fn select_calendar(
    services: Services,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let calendars = services.calendar.list_calendars(&ctx.user_id).await?;
    let wanted = arg_str(&args, "name").map(|n| n.to_lowercase());

    let chosen = wanted
        .as_deref()
        .and_then(|name| {
            calendars
                .iter()
                .find(|c| c.summary.to_lowercase().contains(name))
        })
        .or_else(|| calendars.iter().find(|c| c.primary))
        .or_else(|| calendars.first())
        .ok_or_else(|| ValetError::InvalidState("User has no calendars".into()))?;

    Ok(json!({ "calendar_id": chosen.id, "summary": chosen.summary }))
}

/// Combined pre-flight for event creation: user validity, timezone,
/// target calendar, and conflicts, gathered concurrently.
pub(super) async fn pre_create_validation(
    services: Services,
    args: Value,
    ctx: ToolContext,
) -> Result<Value> {
    let user_check = async {
        match ctx.email {
            Some(ref email) => services.users.lookup_user(email).await.map(|found| {
                json!({ "valid": found.is_some() })
            }),
            None => Ok(json!({ "valid": false, "error": "no email in context" })),
        }
    };
    let timezone = resolve_timezone(&services, &ctx);
    let calendar = select_calendar(services.clone(), args.clone(), ctx.clone());
    let conflicts = async {
        if args.get("start").is_some() && args.get("end").is_some() {
            check_conflicts(services.clone(), args.clone(), ctx.clone())
                .await
                .map(Some)
        } else {
            Ok(None)
        }
    };

    let (user, timezone, calendar, conflicts) =
        tokio::join!(user_check, timezone, calendar, conflicts);

    Ok(json!({
        "user": user?,
        "timezone": timezone,
        "calendar": calendar?,
        "conflicts": conflicts?,
    }))
}

/// Deterministic digest of a slim event list, used when the caller wants
/// prose instead of raw JSON.
pub(super) fn summarize_events(args: Value) -> Result<Value> {
    let events = args
        .get("events")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ValetError::InvalidArgument("events array is required".into()))?;

    if events.is_empty() {
        return Ok(json!({ "summary": "No events found." }));
    }

    let lines: Vec<String> = events
        .iter()
        .map(|ev| {
            let summary = ev
                .get("summary")
                .and_then(|s| s.as_str())
                .unwrap_or("(untitled)");
            let start = ev
                .get("start")
                .and_then(|s| s.get("date_time").or_else(|| s.get("date")))
                .and_then(|s| s.as_str())
                .unwrap_or("unknown time");
            format!("- {summary} at {start}")
        })
        .collect();

    Ok(json!({
        "summary": format!("{} event(s):\n{}", events.len(), lines.join("\n")),
    }))
}

/// Register every calendar leaf tool.
pub fn register_calendar_tools(registry: &mut ToolRegistry, services: Services) {
    let svc = services.clone();
    registry.register(ToolSpec::new(
        "get_event",
        "Look up calendar events by time window, text query, or id.",
        ToolParameters::object()
            .string("query", "Case-insensitive text to match against event titles", false)
            .string("event_id", "Exact event id to fetch", false)
            .string("time_min", "Window start, RFC 3339 (default: start of today)", false)
            .string("time_max", "Window end, RFC 3339 (default: 24h from now)", false)
            .string("calendar_id", "Restrict to one calendar", false)
            .boolean("search_all_calendars", "Search every visible calendar (default true)", false)
            .build(),
        Handler::params_and_ctx(move |args, ctx| get_event(svc.clone(), args, ctx)),
    ));

    let svc = services.clone();
    registry.register(ToolSpec::new(
        "insert_event",
        "Create a calendar event.",
        ToolParameters::object()
            .string("summary", "Event title", true)
            .string("start", "Start, RFC 3339", true)
            .string("end", "End, RFC 3339 (default: start + 30 minutes)", false)
            .string("description", "Longer description", false)
            .string("location", "Where the event happens", false)
            .string("calendar_id", "Target calendar (default: primary)", false)
            .string("timezone", "IANA timezone for timed events", false)
            .build(),
        Handler::params_and_ctx(move |args, ctx| insert_event(svc.clone(), args, ctx)),
    ));

    let svc = services.clone();
    registry.register(ToolSpec::new(
        "update_event",
        "Update fields on an existing event.",
        ToolParameters::object()
            .string("event_id", "Id of the event to update", true)
            .string("calendar_id", "Calendar holding the event (default: primary)", false)
            .string("summary", "New title", false)
            .string("start", "New start, RFC 3339", false)
            .string("end", "New end, RFC 3339", false)
            .string("description", "New description", false)
            .string("location", "New location", false)
            .build(),
        Handler::params_and_ctx(move |args, ctx| update_event(svc.clone(), args, ctx)),
    ));

    let svc = services.clone();
    registry.register(ToolSpec::new(
        "delete_event",
        "Delete an event by id.",
        ToolParameters::object()
            .string("event_id", "Id of the event to delete", true)
            .string("calendar_id", "Calendar holding the event (default: primary)", false)
            .build(),
        Handler::params_and_ctx(move |args, ctx| delete_event(svc.clone(), args, ctx)),
    ));

    let svc = services.clone();
    registry.register(ToolSpec::new(
        "check_conflicts",
        "List events overlapping a proposed time range.",
        ToolParameters::object()
            .string("start", "Range start, RFC 3339", true)
            .string("end", "Range end, RFC 3339", true)
            .string("calendar_id", "Calendar to check (default: primary)", false)
            .build(),
        Handler::params_and_ctx(move |args, ctx| check_conflicts(svc.clone(), args, ctx)),
    ));

    let svc = services.clone();
    registry.register(ToolSpec::new(
        "select_calendar",
        "Pick the calendar matching a name, falling back to primary.",
        ToolParameters::object()
            .string("name", "Calendar name to match", false)
            .build(),
        Handler::params_and_ctx(move |args, ctx| select_calendar(svc.clone(), args, ctx)),
    ));

    let svc = services.clone();
    registry.register(ToolSpec::new(
        "pre_create_validation",
        "Run user, timezone, calendar, and conflict checks in one shot.",
        ToolParameters::object()
            .string("start", "Proposed start, RFC 3339", false)
            .string("end", "Proposed end, RFC 3339", false)
            .string("name", "Preferred calendar name", false)
            .build(),
        Handler::params_and_ctx(move |args, ctx| pre_create_validation(svc.clone(), args, ctx)),
    ));

    registry.register(ToolSpec::new(
        "summarize_events",
        "Produce a short text digest of an event list.",
        ToolParameters::object().build(),
        Handler::sync(|args, _ctx| summarize_events(args)),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::backend::MemoryCalendar;
    use std::sync::Arc;

    fn services_with_events(per_calendar: usize) -> Services {
        let calendar = MemoryCalendar::new();
        calendar.add_calendar("u1", "primary", "Primary");
        calendar.add_calendar("u1", "work", "Work");
        let now = Utc::now();
        for cal in ["primary", "work"] {
            for i in 0..per_calendar {
                calendar.seed_event(
                    "u1",
                    CalendarEvent {
                        id: format!("{cal}-{i}"),
                        calendar_id: cal.to_string(),
                        summary: format!("Event {i}"),
                        start: EventTime::timed((now + Duration::minutes(i as i64)).to_rfc3339()),
                        end: EventTime::timed(
                            (now + Duration::minutes(i as i64 + 30)).to_rfc3339(),
                        ),
                        ..Default::default()
                    },
                );
            }
        }
        Services {
            calendar: Arc::new(calendar),
            users: Arc::new(crate::tools::backend::MemoryDirectory::new()),
        }
    }

    #[tokio::test]
    async fn lookup_caps_per_calendar_and_total() {
        let services = services_with_events(80);
        let result = get_event(services, json!({}), ToolContext::new("u1"))
            .await
            .unwrap();
        // 80 seeded per calendar, capped at 50 each, 100 overall.
        assert_eq!(result["count"], 100);
        assert_eq!(result["truncated"], true);
    }

    #[tokio::test]
    async fn lookup_filters_by_query() {
        let services = services_with_events(5);
        let result = get_event(
            services,
            json!({"query": "event 3", "search_all_calendars": false}),
            ToolContext::new("u1"),
        )
        .await
        .unwrap();
        assert_eq!(result["count"], 1);
    }

    #[tokio::test]
    async fn insert_requires_summary() {
        let services = Services::in_memory();
        let err = insert_event(
            services,
            json!({"start": "2026-08-25T10:00:00Z"}),
            ToolContext::new("u1"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Missing required field: summary"));
    }

    #[tokio::test]
    async fn insert_applies_default_end_and_timezone() {
        let services = Services::in_memory();
        let ctx = ToolContext::new("u1").with_timezone("America/New_York");
        let result = insert_event(
            services,
            json!({"summary": "Standup", "start": "2026-08-25T10:00:00Z"}),
            ctx,
        )
        .await
        .unwrap();
        let created = &result["created"];
        assert_eq!(created["start"]["time_zone"], "America/New_York");
        assert_eq!(created["end"]["date_time"], "2026-08-25T10:30:00+00:00");
    }

    #[tokio::test]
    async fn delete_requires_event_id() {
        let services = Services::in_memory();
        let err = delete_event(services, json!({}), ToolContext::new("u1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("event_id is required"));
    }

    #[tokio::test]
    async fn conflicts_detect_overlap() {
        let services = services_with_events(1);
        let now = Utc::now();
        let result = check_conflicts(
            services,
            json!({
                "start": now.to_rfc3339(),
                "end": (now + Duration::minutes(15)).to_rfc3339(),
            }),
            ToolContext::new("u1"),
        )
        .await
        .unwrap();
        assert_eq!(result["has_conflicts"], true);
    }

    #[test]
    fn summarize_handles_empty_list() {
        let result = summarize_events(json!({"events": []})).unwrap();
        assert_eq!(result["summary"], "No events found.");
    }
}
