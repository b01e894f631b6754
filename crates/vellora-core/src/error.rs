use thiserror::Error;

#[derive(Debug, Error)]
pub enum VelloraError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    /// Structured output did not match the declared schema.
    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Data-unavailable conditions
    #[error("No captions available: {0}")]
    NoCaptions(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Calendar unavailable: {0}")]
    CalendarUnavailable(String),

    // Routing defects
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node {from} routed to undeclared successor {to}")]
    UndeclaredSuccessor { from: String, to: String },

    #[error("Run exceeded hop limit ({0})")]
    HopLimitExceeded(usize),

    #[error("Graph compile error: {0}")]
    Compile(String),

    // Agent loop errors
    #[error("Agent exceeded max duration ({0}s)")]
    MaxDurationExceeded(u64),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VelloraError {
    /// Routing defects abort a run; everything else is contained at the node boundary.
    pub fn is_routing_defect(&self) -> bool {
        matches!(
            self,
            Self::UnknownNode(_)
                | Self::UndeclaredSuccessor { .. }
                | Self::HopLimitExceeded(_)
                | Self::Compile(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VelloraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_defects_are_classified() {
        assert!(VelloraError::UnknownNode("x".into()).is_routing_defect());
        assert!(VelloraError::HopLimitExceeded(16).is_routing_defect());
        assert!(!VelloraError::NoCaptions("vid".into()).is_routing_defect());
        assert!(!VelloraError::LlmRequest("HTTP 500".into()).is_routing_defect());
        assert!(!VelloraError::MaxDurationExceeded(30).is_routing_defect());
    }
}
