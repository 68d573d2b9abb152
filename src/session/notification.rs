use crate::core::RowId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Failure,
}

/// Toast-style, non-blocking message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub row: Option<RowId>,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
            row: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Failure,
            message: message.into(),
            row: None,
        }
    }

    pub fn for_row(mut self, row: &RowId) -> Self {
        self.row = Some(row.clone());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.level == NotificationLevel::Failure
    }
}
