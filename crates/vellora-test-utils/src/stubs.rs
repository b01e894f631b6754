use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::{ActionStore, CalendarProvider, CalendarService, Catalog, ToolAdapter};
use vellora_core::types::{NewScheduledAction, ScheduledAction};

// ── Action store ────────────────────────────────────────────────

/// In-memory action store that counts every mutating call.
#[derive(Default)]
pub struct RecordingActionStore {
    actions: Mutex<HashMap<String, Vec<ScheduledAction>>>,
    invocations: AtomicUsize,
    next_id: AtomicUsize,
}

impl RecordingActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of append and remove calls received.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn actions(&self, user_id: &str) -> Vec<ScheduledAction> {
        self.actions
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl ActionStore for RecordingActionStore {
    fn append_scheduled_action(
        &self,
        user_id: &str,
        action: NewScheduledAction,
    ) -> BoxFuture<'_, Result<String>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let id = format!("act-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.actions
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .push(action.with_id(id.clone()));
        Box::pin(async move { Ok(id) })
    }

    fn remove_scheduled_action(
        &self,
        user_id: &str,
        action_id: &str,
    ) -> BoxFuture<'_, Result<bool>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let mut actions = self.actions.lock().unwrap();
        let list = actions.entry(user_id.to_string()).or_default();
        let before = list.len();
        list.retain(|a| a.action_id != action_id);
        let removed = list.len() < before;
        Box::pin(async move { Ok(removed) })
    }

    fn list_scheduled_actions(&self, user_id: &str) -> BoxFuture<'_, Result<Vec<ScheduledAction>>> {
        let actions = self.actions(user_id);
        Box::pin(async move { Ok(actions) })
    }
}

// ── Catalog ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubCatalog {
    lectures: HashMap<String, String>,
    attendees: HashMap<String, Vec<String>>,
}

impl StubCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lecture(mut self, lecture_id: &str, video_ref: &str) -> Self {
        self.lectures.insert(lecture_id.into(), video_ref.into());
        self
    }

    pub fn with_attendees(mut self, instructor_id: &str, emails: &[&str]) -> Self {
        self.attendees.insert(
            instructor_id.into(),
            emails.iter().map(|e| e.to_string()).collect(),
        );
        self
    }
}

impl Catalog for StubCatalog {
    fn video_reference(&self, lecture_id: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let found = self.lectures.get(lecture_id).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn attendee_emails(&self, instructor_id: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let emails = self.attendees.get(instructor_id).cloned().unwrap_or_default();
        Box::pin(async move { Ok(emails) })
    }
}

// ── Generic adapter ─────────────────────────────────────────────

type Responder<A, O> = Box<dyn Fn(A) -> Result<O> + Send + Sync>;

/// A tool adapter answering from a closure and counting invocations.
pub struct StubAdapter<A, O> {
    name: String,
    respond: Responder<A, O>,
    calls: AtomicUsize,
}

impl<A, O> StubAdapter<A, O> {
    pub fn new(name: &str, respond: impl Fn(A) -> Result<O> + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always return `value`.
    pub fn returning(name: &str, value: O) -> Self
    where
        O: Clone + Send + Sync + 'static,
    {
        Self::new(name, move |_| Ok(value.clone()))
    }

    /// Always fail with the error built by `make_err`.
    pub fn failing(name: &str, make_err: fn() -> VelloraError) -> Self {
        Self::new(name, move |_| Err(make_err()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<A, O> ToolAdapter for StubAdapter<A, O>
where
    A: Send + 'static,
    O: Send + 'static,
{
    type Args = A;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, args: A) -> BoxFuture<'_, Result<O>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.respond)(args);
        Box::pin(async move { result })
    }
}

// ── Calendar ────────────────────────────────────────────────────

/// An insert seen by [`StubCalendar`].
#[derive(Debug, Clone)]
pub struct InsertedEvent {
    pub body: serde_json::Value,
    pub with_conference: bool,
    pub notify_attendees: bool,
}

/// Calendar that accepts every insert and returns a plausible event resource.
#[derive(Default)]
pub struct StubCalendar {
    inserted: Mutex<Vec<InsertedEvent>>,
}

impl StubCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inserted(&self) -> Vec<InsertedEvent> {
        self.inserted.lock().unwrap().clone()
    }
}

impl CalendarService for StubCalendar {
    fn insert_event(
        &self,
        body: serde_json::Value,
        with_conference: bool,
        notify_attendees: bool,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let mut inserted = self.inserted.lock().unwrap();
        let n = inserted.len() + 1;
        let mut event = body.clone();
        event["id"] = serde_json::json!(format!("evt-{}", n));
        event["htmlLink"] = serde_json::json!(format!("https://calendar.example/evt-{}", n));
        if with_conference {
            event["conferenceData"] = serde_json::json!({
                "entryPoints": [
                    { "entryPointType": "video", "uri": format!("https://meet.example/evt-{}", n) }
                ]
            });
        }
        inserted.push(InsertedEvent {
            body,
            with_conference,
            notify_attendees,
        });
        Box::pin(async move { Ok(event) })
    }
}

/// Provider that either hands out one shared calendar or reports it unavailable.
pub struct StubCalendarProvider {
    calendar: Option<Arc<StubCalendar>>,
    lookups: AtomicUsize,
}

impl StubCalendarProvider {
    pub fn available(calendar: Arc<StubCalendar>) -> Self {
        Self {
            calendar: Some(calendar),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            calendar: None,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl CalendarProvider for StubCalendarProvider {
    fn calendar_for(&self, _user_id: &str) -> BoxFuture<'_, Result<Arc<dyn CalendarService>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let result = match &self.calendar {
            Some(c) => Ok(c.clone() as Arc<dyn CalendarService>),
            None => Err(VelloraError::CalendarUnavailable(
                "no calendar credentials on file".into(),
            )),
        };
        Box::pin(async move { result })
    }
}
