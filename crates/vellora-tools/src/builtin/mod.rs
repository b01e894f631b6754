pub mod calendar;
pub mod catalog;
pub mod scheduled_actions;
pub mod web_search;
pub mod youtube;

pub use calendar::{
    CalendarEventTool, CreateCalendarEvent, GoogleCalendar, GoogleCalendarProvider, NoCalendarProvider,
};
pub use catalog::LectureLookup;
pub use scheduled_actions::{
    CancelScheduledAction, CreateScheduledAction, CreateScheduledActionTool,
    DeleteScheduledActionTool,
};
pub use web_search::DuckDuckGoSearch;
pub use youtube::{video_url, YoutubeSearch, YoutubeTranscript};
