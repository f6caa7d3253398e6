use serde::{Deserialize, Serialize};

/// Readiness of a managed process as determined by its readiness monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumIs)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

impl ReadyState {
    pub fn style(&self) -> String {
        let s = self.to_string();
        match self {
            ReadyState::Pending => console::style(s).yellow().to_string(),
            ReadyState::Ready => console::style(s).green().to_string(),
            ReadyState::Failed(_) => console::style(s).red().to_string(),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ReadyState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Pending is the only state that can still change.
    pub fn is_resolved(&self) -> bool {
        !self.is_pending()
    }
}
