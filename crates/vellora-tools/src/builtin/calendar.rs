use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use vellora_core::config::GoogleConfig;
use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::{
    CalendarEventAdapter, CalendarProvider, CalendarService, CredentialStore, Tool, ToolAdapter,
};
use vellora_core::types::{CalendarEventCreated, CalendarEventRequest, ToolContext, ToolResult};

const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";
const TOKENINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/tokeninfo";

// ── Event time handling ─────────────────────────────────────────

/// A calendar boundary: a whole day or an instant.
#[derive(Debug, Clone, PartialEq)]
enum EventTime {
    Date(NaiveDate),
    /// Carries its own UTC offset.
    Offset(DateTime<chrono::FixedOffset>),
    /// Wall-clock time in the event's timezone.
    Local(NaiveDateTime),
}

impl EventTime {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if !raw.contains('T') {
            return NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(EventTime::Date)
                .map_err(|_| invalid_time(raw));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(EventTime::Offset(dt));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
            .map(EventTime::Local)
            .map_err(|_| invalid_time(raw))
    }

    fn is_all_day(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// Google `start` / `end` object. Without a timezone, Google applies the calendar's own.
    fn to_google(&self, timezone: Option<&str>) -> serde_json::Value {
        let mut value = match self {
            EventTime::Date(d) => return json!({ "date": d.format("%Y-%m-%d").to_string() }),
            EventTime::Offset(dt) => json!({ "dateTime": dt.to_rfc3339() }),
            EventTime::Local(dt) => json!({ "dateTime": dt.format("%Y-%m-%dT%H:%M:%S").to_string() }),
        };
        if let Some(tz) = timezone {
            value["timeZone"] = json!(tz);
        }
        value
    }
}

fn invalid_time(raw: &str) -> VelloraError {
    VelloraError::ToolValidation(format!(
        "'{}' is not YYYY-MM-DD or an ISO 8601 date-time",
        raw
    ))
}

/// Check that start and end are the same kind and in order.
fn validate_times(start: &EventTime, end: &EventTime) -> Result<()> {
    let ordered = match (start, end) {
        (EventTime::Date(a), EventTime::Date(b)) => a <= b,
        (EventTime::Offset(a), EventTime::Offset(b)) => a <= b,
        (EventTime::Local(a), EventTime::Local(b)) => a <= b,
        (EventTime::Offset(a), EventTime::Local(b)) => a.naive_local() <= *b,
        (EventTime::Local(a), EventTime::Offset(b)) => *a <= b.naive_local(),
        _ => {
            return Err(VelloraError::ToolValidation(
                "start_time and end_time must both be dates or both be date-times".into(),
            ))
        }
    };
    if !ordered {
        return Err(VelloraError::ToolValidation(
            "end_time must not be before start_time".into(),
        ));
    }
    Ok(())
}

/// Build the Google event resource for a request.
pub fn event_body(req: &CalendarEventRequest) -> Result<serde_json::Value> {
    let start = EventTime::parse(&req.start_time)?;
    let end = EventTime::parse(&req.end_time)?;
    validate_times(&start, &end)?;

    let timezone = req.timezone.as_deref().map(str::trim).filter(|tz| !tz.is_empty());
    let mut body = json!({
        "summary": req.summary,
        "location": req.location,
        "description": req.description,
        "start": start.to_google(timezone),
        "end": end.to_google(timezone),
    });

    if req.conference && !start.is_all_day() {
        body["conferenceData"] = json!({
            "createRequest": {
                "requestId": format!("meet-{}", uuid::Uuid::new_v4()),
                "conferenceSolutionKey": { "type": "hangoutsMeet" },
            }
        });
    }

    let attendees: Vec<serde_json::Value> = req
        .attendees
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(|e| json!({ "email": e }))
        .collect();
    if !attendees.is_empty() {
        body["attendees"] = serde_json::Value::Array(attendees);
    }

    Ok(body)
}

/// First video entry point of the created event.
pub fn meet_link(event: &serde_json::Value) -> Option<String> {
    event["conferenceData"]["entryPoints"]
        .as_array()?
        .iter()
        .find(|ep| ep["entryPointType"] == "video")
        .and_then(|ep| ep["uri"].as_str())
        .map(String::from)
}

// ── Event creation adapter ──────────────────────────────────────

/// Create one event on an already-resolved calendar.
pub struct CreateCalendarEvent {
    calendar: Arc<dyn CalendarService>,
}

impl CreateCalendarEvent {
    pub fn new(calendar: Arc<dyn CalendarService>) -> Self {
        Self { calendar }
    }
}

impl ToolAdapter for CreateCalendarEvent {
    type Args = CalendarEventRequest;
    type Output = CalendarEventCreated;

    fn name(&self) -> &str {
        "create_calendar_event"
    }

    fn invoke(&self, req: CalendarEventRequest) -> BoxFuture<'_, Result<CalendarEventCreated>> {
        Box::pin(async move {
            let body = event_body(&req)?;
            let with_conference = body.get("conferenceData").is_some();
            let notify = body.get("attendees").is_some();
            debug!(summary = %req.summary, with_conference, notify, "Inserting calendar event");

            let event = self.calendar.insert_event(body, with_conference, notify).await?;

            let event_id = event["id"].as_str().unwrap_or_default().to_string();
            if event_id.is_empty() {
                return Err(VelloraError::ToolExecution {
                    tool: self.name().to_string(),
                    message: "calendar returned an event without an id".into(),
                });
            }

            let created = CalendarEventCreated {
                event_id,
                event_link: event["htmlLink"].as_str().unwrap_or_default().to_string(),
                summary: req.summary,
                meet_link: meet_link(&event),
            };
            info!(event_id = %created.event_id, "Calendar event created");
            Ok(created)
        })
    }
}

/// Model-facing wrapper around the event creation adapter.
pub struct CalendarEventTool {
    adapter: CalendarEventAdapter,
}

impl CalendarEventTool {
    pub fn new(adapter: CalendarEventAdapter) -> Self {
        Self { adapter }
    }

    fn parse(input: &serde_json::Value) -> Result<CalendarEventRequest> {
        // Accept both the flat shape and an `event_details` envelope
        let details = input.get("event_details").unwrap_or(input);
        let req: CalendarEventRequest = serde_json::from_value(details.clone())
            .map_err(|e| VelloraError::ToolValidation(e.to_string()))?;
        if req.summary.trim().is_empty() {
            return Err(VelloraError::ToolValidation("summary must not be empty".into()));
        }
        Ok(req)
    }
}

impl Tool for CalendarEventTool {
    fn name(&self) -> &str {
        "create_calendar_event"
    }

    fn description(&self) -> &str {
        "Create a Google Calendar event. Use YYYY-MM-DD for all-day events or ISO 8601 \
         date-times for timed events. Set conferenceData to true to attach a Meet link."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string", "description": "Event title" },
                "start_time": { "type": "string", "description": "Start: YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS" },
                "end_time": { "type": "string", "description": "End: YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS" },
                "description": { "type": "string" },
                "location": { "type": "string" },
                "attendees": { "type": "array", "items": { "type": "string" }, "description": "Attendee e-mail addresses" },
                "timezone": { "type": "string", "description": "IANA timezone name, e.g. Asia/Kolkata" },
                "conferenceData": { "type": "boolean", "description": "Attach a video meeting link" }
            },
            "required": ["summary", "start_time", "end_time"]
        })
    }

    fn validate(&self, input: &serde_json::Value) -> Result<()> {
        let req = Self::parse(input)?;
        let start = EventTime::parse(&req.start_time)?;
        let end = EventTime::parse(&req.end_time)?;
        validate_times(&start, &end)
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let mut req = Self::parse(&input)?;
            if req.timezone.as_deref().map_or(true, |tz| tz.trim().is_empty()) {
                req.timezone = Some(ctx.timezone);
            }
            let created = self.adapter.invoke(req).await?;
            let mut out = json!({
                "status": "success",
                "event_id": created.event_id,
                "event_link": created.event_link,
                "summary": created.summary,
            });
            if let Some(link) = created.meet_link {
                out["meet_link"] = json!(link);
            }
            Ok(ToolResult::success(out.to_string()))
        })
    }

    fn timeout_secs(&self) -> u64 {
        20
    }
}

// ── Google Calendar REST ────────────────────────────────────────

/// The primary calendar of one authenticated user.
pub struct GoogleCalendar {
    http: reqwest::Client,
    access_token: String,
}

impl GoogleCalendar {
    pub fn new(http: reqwest::Client, access_token: impl Into<String>) -> Self {
        Self {
            http,
            access_token: access_token.into(),
        }
    }
}

impl CalendarService for GoogleCalendar {
    fn insert_event(
        &self,
        body: serde_json::Value,
        with_conference: bool,
        notify_attendees: bool,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let err = |message: String| VelloraError::ToolExecution {
                tool: "create_calendar_event".into(),
                message,
            };

            let resp = self
                .http
                .post(EVENTS_URL)
                .bearer_auth(&self.access_token)
                .query(&[
                    ("conferenceDataVersion", if with_conference { "1" } else { "0" }),
                    ("sendUpdates", if notify_attendees { "all" } else { "none" }),
                ])
                .json(&body)
                .send()
                .await
                .map_err(|e| err(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(err(format!("HTTP {}: {}", status, text)));
            }

            resp.json().await.map_err(|e| err(e.to_string()))
        })
    }
}

/// Resolves a user's calendar from stored OAuth tokens, refreshing when needed.
pub struct GoogleCalendarProvider {
    http: reqwest::Client,
    oauth: GoogleConfig,
    credentials: Arc<dyn CredentialStore>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

impl GoogleCalendarProvider {
    pub fn new(oauth: GoogleConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            oauth,
            credentials,
        }
    }

    async fn token_is_valid(&self, access_token: &str) -> bool {
        match self
            .http
            .get(TOKENINFO_URL)
            .query(&[("access_token", access_token)])
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Token validation request failed");
                false
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> std::result::Result<String, String> {
        let resp = self
            .http
            .post(&self.oauth.token_uri)
            .form(&[
                ("client_id", self.oauth.client_id.as_str()),
                ("client_secret", self.oauth.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            return Err(format!("token endpoint returned {}", resp.status()));
        }
        resp.json::<RefreshResponse>()
            .await
            .map(|r| r.access_token)
            .map_err(|e| e.to_string())
    }
}

impl CalendarProvider for GoogleCalendarProvider {
    fn calendar_for(&self, user_id: &str) -> BoxFuture<'_, Result<Arc<dyn CalendarService>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let tokens = self.credentials.load_tokens(&user_id).await?.ok_or_else(|| {
                VelloraError::CalendarUnavailable("no calendar credentials on file".into())
            })?;

            if self.token_is_valid(&tokens.access_token).await {
                return Ok(Arc::new(GoogleCalendar::new(self.http.clone(), tokens.access_token))
                    as Arc<dyn CalendarService>);
            }

            match self.refresh(&tokens.refresh_token).await {
                Ok(access_token) => {
                    self.credentials
                        .save_access_token(&user_id, &access_token)
                        .await?;
                    info!(user_id = %user_id, "Refreshed calendar access token");
                    Ok(Arc::new(GoogleCalendar::new(self.http.clone(), access_token))
                        as Arc<dyn CalendarService>)
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Calendar token refresh failed, purging tokens");
                    self.credentials.purge_tokens(&user_id).await?;
                    Err(VelloraError::CalendarUnavailable(
                        "calendar authorization expired; please reconnect your calendar".into(),
                    ))
                }
            }
        })
    }
}

/// Used when no Google OAuth client is configured. Every lookup fails.
pub struct NoCalendarProvider;

impl CalendarProvider for NoCalendarProvider {
    fn calendar_for(&self, _user_id: &str) -> BoxFuture<'_, Result<Arc<dyn CalendarService>>> {
        Box::pin(async {
            Err(VelloraError::CalendarUnavailable(
                "calendar integration is not configured".into(),
            ))
        })
    }
}
