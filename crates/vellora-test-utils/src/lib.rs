//! Scripted collaborators for exercising nodes and whole runs without a network.

mod llm;
mod stubs;

pub use llm::{RecordedCall, ScriptedLlm, ScriptedReply};
pub use stubs::{
    InsertedEvent, RecordingActionStore, StubAdapter, StubCalendar, StubCalendarProvider,
    StubCatalog,
};

use vellora_core::config::AppConfig;

/// Minimal config pointing at a fake model.
pub fn test_config() -> AppConfig {
    toml_config(
        r#"
[model]
model_id = "test-model"
"#,
    )
}

/// Parse an inline TOML config, panicking on error.
pub fn toml_config(src: &str) -> AppConfig {
    vellora_core::config::AppConfig::from_toml_str(src).expect("valid test config")
}
